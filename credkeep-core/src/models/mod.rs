//! Core data models for the credential store
//!
//! - [`Credential`] - a username/secret record
//! - [`SearchAttributes`] - the per-call attribute lookup keyed on (username, schema)

mod credential;

pub use credential::{
    Credential, DEFAULT_COLLECTION, SCHEMA_ATTRIBUTE, SearchAttributes, USERNAME_ATTRIBUTE,
    schema_for,
};
