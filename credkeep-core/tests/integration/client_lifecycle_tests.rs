//! Client construction and shutdown

use std::sync::Arc;
use std::time::Duration;

use credkeep_core::testing::MockSecretService;
use credkeep_core::{ClientConfig, SecretError, SecretServiceClient, Transport};

use super::connect;

#[tokio::test]
async fn default_collection_is_created_once() {
    let mock = Arc::new(MockSecretService::new());

    let first = connect(&mock, "default").await.unwrap();
    assert_eq!(mock.collection_count(), 1);
    assert_eq!(mock.call_count("CreateCollection"), 1);

    let second = connect(&mock, "default").await.unwrap();
    assert_eq!(mock.collection_count(), 1);
    assert_eq!(mock.call_count("CreateCollection"), 1);
    assert_eq!(first.collection_path(), second.collection_path());

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn clients_for_different_collections_are_independent() {
    let mock = Arc::new(MockSecretService::new());
    let work = connect(&mock, "work").await.unwrap();
    let personal = connect(&mock, "personal").await.unwrap();
    assert_ne!(work.collection_path(), personal.collection_path());
    assert_eq!(mock.open_sessions(), 2);

    work.close().await.unwrap();
    assert_eq!(mock.open_sessions(), 1);
    personal.close().await.unwrap();
    assert_eq!(mock.open_sessions(), 0);
}

#[tokio::test]
async fn unreachable_service_fails_construction() {
    let mock = Arc::new(MockSecretService::new());
    mock.set_unreachable(true);

    let err = connect(&mock, "default").await.unwrap_err();
    assert!(matches!(err, SecretError::Transport(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn config_file_drives_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credkeep.toml");
    std::fs::write(&path, "collection = \"vault\"\nwindow_id = \"x11:42\"\n").unwrap();

    let mock = Arc::new(MockSecretService::new());
    let transport: Arc<dyn Transport> = mock.clone();
    let config = ClientConfig::load(&path).unwrap();
    let client = SecretServiceClient::with_transport(transport, config).await.unwrap();

    assert_eq!(client.collection_name(), "vault");
    assert_eq!(Some(client.collection_path().clone()), mock.collection_path("vault"));
    client.close().await.unwrap();
}

#[tokio::test]
async fn dropped_client_releases_its_session() {
    let mock = Arc::new(MockSecretService::new());
    {
        let _client = connect(&mock, "default").await.unwrap();
        assert_eq!(mock.open_sessions(), 1);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(mock.open_sessions(), 0);
}
