//! Integration test modules

mod client_lifecycle_tests;
mod credential_store_tests;
mod prompt_tests;

use std::sync::Arc;

use credkeep_core::testing::MockSecretService;
use credkeep_core::{ClientConfig, SecretResult, SecretServiceClient, Transport};

/// Builds a client for `collection` over `mock`
pub async fn connect(
    mock: &Arc<MockSecretService>,
    collection: &str,
) -> SecretResult<SecretServiceClient> {
    let transport: Arc<dyn Transport> = mock.clone();
    let config = ClientConfig::new().with_collection(collection);
    SecretServiceClient::with_transport(transport, config).await
}
