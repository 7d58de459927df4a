//! Property test modules

mod credential_tests;
mod store_tests;
