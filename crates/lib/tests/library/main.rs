//! Integration tests for bootseq-lib's public API.

mod common;
mod migrate_tests;
mod sequence_tests;
