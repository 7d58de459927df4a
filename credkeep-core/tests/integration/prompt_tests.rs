//! Operations that need user confirmation

use std::sync::Arc;
use std::time::Duration;

use credkeep_core::testing::{MockSecretService, PromptBehavior, PromptTrigger};
use credkeep_core::{Credential, SecretError};

use super::connect;

#[tokio::test]
async fn dismissed_collection_prompt_makes_collection_unavailable() {
    let mock = Arc::new(MockSecretService::new());
    mock.prompt_for(PromptTrigger::CreateCollection, PromptBehavior::Dismiss);

    let err = connect(&mock, "vault").await.unwrap_err();
    assert!(matches!(err, SecretError::CollectionUnavailable(ref name) if name == "vault"));
    assert!(err.is_fatal());
    assert_eq!(mock.collection_count(), 0);
    assert_eq!(mock.active_subscriptions(), 0);
    assert_eq!(mock.open_sessions(), 0);
}

#[tokio::test]
async fn confirmed_collection_prompt_binds_the_new_collection() {
    let mock = Arc::new(MockSecretService::new());
    mock.prompt_for(PromptTrigger::CreateCollection, PromptBehavior::Complete);

    let client = connect(&mock, "vault").await.unwrap();
    assert_eq!(Some(client.collection_path().clone()), mock.collection_path("vault"));
    assert_eq!(mock.subscriptions_made(), 1);
    assert_eq!(mock.active_subscriptions(), 0);
    client.close().await.unwrap();
}

#[tokio::test]
async fn locked_collection_is_unlocked_through_prompt() {
    let mock = Arc::new(MockSecretService::new().with_locked_collection("login"));
    mock.prompt_for(PromptTrigger::Unlock, PromptBehavior::Complete);

    let client = connect(&mock, "login").await.unwrap();
    assert_eq!(mock.is_collection_locked("login"), Some(false));
    client.close().await.unwrap();
}

#[tokio::test]
async fn dismissed_save_prompt_surfaces_cancellation() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();
    mock.prompt_for(PromptTrigger::CreateItem, PromptBehavior::Dismiss);

    let err = client
        .save(&Credential::new("alice", b"p1".to_vec()))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(mock.item_count("default"), 0);
    client.close().await.unwrap();
}

#[tokio::test]
async fn confirmed_delete_prompt_removes_item() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();
    let record = Credential::new("alice", b"p1".to_vec());
    client.save(&record).await.unwrap();
    mock.prompt_for(PromptTrigger::DeleteItem, PromptBehavior::Complete);

    assert!(client.delete(&record).await.unwrap());
    assert!(!client.exists("alice", "default").await.unwrap());
    client.close().await.unwrap();
}

#[tokio::test]
async fn abandoned_prompt_is_dismissed_and_unsubscribed() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();
    mock.prompt_for(PromptTrigger::CreateItem, PromptBehavior::Hang);

    let record = Credential::new("alice", b"p1".to_vec());
    let outcome = tokio::time::timeout(Duration::from_millis(50), client.save(&record)).await;
    assert!(outcome.is_err(), "hung prompt should hit the caller's timeout");
    assert_eq!(mock.active_subscriptions(), 0);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(mock.dismissed_prompts(), 1);

    // The client stays usable once the prompt is gone.
    mock.clear_prompt(PromptTrigger::CreateItem);
    assert!(client.save(&record).await.unwrap());
    client.close().await.unwrap();
}
