mod execute_tests;
mod store_tests;
