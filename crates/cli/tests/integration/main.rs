mod common;

mod build_tests;
mod migrate_tests;
mod start_tests;
