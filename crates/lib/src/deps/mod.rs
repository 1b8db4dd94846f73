//! Dependency materialization.
//!
//! Turns a [`lock::LockSpecification`] into a pinned [`resolve::ResolvedEnvironment`]
//! using a [`index::PackageIndex`], then installs it into a fresh directory.

pub mod index;
pub mod lock;
mod materialize;
pub mod resolve;

pub use index::{FileIndex, HttpIndex, IndexError, IndexSource, PackageIndex};
pub use lock::{LockError, LockSpecification, LockedPackage};
pub use materialize::{ENVIRONMENT_FILENAME, MaterializeError, Materializer, REQUIREMENTS_FILENAME, read_environment};
pub use resolve::{ResolveError, ResolvedEnvironment, ResolvedPackage, resolve};
