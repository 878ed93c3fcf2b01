mod common;

mod cas_tests;
mod run_tests;
mod upload_tests;
