//! Integration tests for `credkeep` core library
//!
//! These tests drive `SecretServiceClient` end to end against the in-memory
//! Secret Service.

// Allow common test patterns that Clippy warns about
#![allow(clippy::redundant_clone)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

mod integration;
