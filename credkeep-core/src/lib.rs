//! `credkeep` Core Library
//!
//! A client for the freedesktop Secret Service that stores username/secret
//! records in a named collection.
//!
//! # Crate Structure
//!
//! - [`client`] - [`SecretServiceClient`], bound to one session and one collection
//! - [`models`] - [`Credential`] records and attribute searches
//! - [`service`] - the protocol engine (sessions, collections, prompts, items)
//! - [`transport`] - the [`Transport`] seam the engine talks through
//! - [`config`] - [`ClientConfig`] and TOML loading
//! - [`tracing`] - optional subscriber setup
//! - [`testing`] - an in-memory Secret Service for tests
//!
//! # Feature Flags
//!
//! - `dbus` - [`DbusTransport`] over the user's session bus
//! - `vendored` - build libdbus from source

// Enable missing_docs warning for public API documentation
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod testing;
pub mod tracing;
pub mod transport;

pub use client::SecretServiceClient;
pub use config::ClientConfig;
pub use error::{SecretError, SecretResult};
pub use models::{Credential, DEFAULT_COLLECTION, SearchAttributes, schema_for};
pub use service::Reply;
pub use service::collection::CollectionHandle;
pub use service::prompt::{PromptCompletion, PromptCoordinator, PromptState};
pub use self::tracing::{TracingConfig, TracingLevel, TracingOutput, init_tracing};
#[cfg(feature = "dbus")]
pub use transport::DbusTransport;
pub use transport::{ObjectPath, RemoteObject, Transport, Unsubscribe, Value};
