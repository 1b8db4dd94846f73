//! bootseq-lib: container bootstrap sequencing.
//!
//! This crate provides the stages that take a service image from a lock
//! specification to a running listener:
//! - `deps`: resolve and materialize a pinned dependency set
//! - `variant`: select the image shape (serving or admin) and render its recipe
//! - `context`: stage code and migration assets into an exclusively owned build context
//! - `migrate`: apply pending schema migrations, one transaction each
//! - `launch`: bind and run the service process
//! - `sequence`: the state machine composing all of the above

pub mod config;
pub mod consts;
pub mod context;
pub mod deps;
pub mod exec;
pub mod launch;
pub mod migrate;
pub mod sequence;
pub mod util;
pub mod variant;
