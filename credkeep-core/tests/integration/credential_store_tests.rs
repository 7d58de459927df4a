//! Save, load, delete and enumerate through the client

use std::collections::BTreeSet;
use std::sync::Arc;

use credkeep_core::testing::MockSecretService;
use credkeep_core::{Credential, SearchAttributes, SecretError};
use futures::TryStreamExt;
use secrecy::{ExposeSecret, SecretString};

use super::connect;

#[tokio::test]
async fn second_save_replaces_the_first() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();

    assert!(client.save(&Credential::new("alice", b"p1".to_vec())).await.unwrap());
    assert!(client.save(&Credential::new("alice", b"p2".to_vec())).await.unwrap());

    assert_eq!(mock.item_count("default"), 1);
    let loaded = client.load("alice", "default").await.unwrap();
    assert_eq!(loaded.secret(), b"p2");
    client.close().await.unwrap();
}

#[tokio::test]
async fn load_returns_label_and_timestamp() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();
    let password = SecretString::from("correct horse".to_string());
    let record = Credential::with_password("bob", &password).with_description("Mail account");

    client.save(&record).await.unwrap();
    let loaded = client.load("bob", "default").await.unwrap();

    assert_eq!(loaded.description, "Mail account");
    assert_eq!(
        loaded.password().unwrap().expose_secret(),
        password.expose_secret()
    );
    assert!(loaded.last_modified.is_some());
    assert!(loaded.to_string().starts_with("Username: bob, Collection: default"));
    client.close().await.unwrap();
}

#[tokio::test]
async fn delete_of_missing_record_is_false() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();
    client.save(&Credential::new("alice", b"p1".to_vec())).await.unwrap();

    let deleted = client.delete(&Credential::new("carol", Vec::new())).await.unwrap();
    assert!(!deleted);
    assert_eq!(mock.item_count("default"), 1);
    client.close().await.unwrap();
}

#[tokio::test]
async fn load_of_missing_record_is_not_found() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();

    let err = client.load("nobody", "default").await.unwrap_err();
    assert!(matches!(err, SecretError::NotFound(name) if name == "nobody"));
    client.close().await.unwrap();
}

#[tokio::test]
async fn locked_item_is_reported_not_unlocked() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();
    client.save(&Credential::new("alice", b"p1".to_vec())).await.unwrap();

    let found = client
        .search(&SearchAttributes::new("alice", "default"))
        .await
        .unwrap();
    mock.lock_item(&found[0]);

    let err = client.load("alice", "default").await.unwrap_err();
    assert!(matches!(err, SecretError::SecretUnavailable(_)));
    assert!(!err.is_fatal());
    client.close().await.unwrap();
}

#[tokio::test]
async fn refresh_leaves_record_untouched_on_failure() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();

    let mut record = Credential::new("dave", b"local".to_vec()).with_description("draft");
    assert!(client.refresh(&mut record).await.unwrap_err().is_not_found());
    assert_eq!(record.secret(), b"local");
    assert_eq!(record.description, "draft");
    client.close().await.unwrap();
}

#[tokio::test]
async fn load_all_is_restartable() {
    let mock = Arc::new(MockSecretService::new());
    let client = connect(&mock, "default").await.unwrap();
    for (user, secret) in [("alice", "a"), ("bob", "b"), ("carol", "c")] {
        client
            .save(&Credential::new(user, secret.as_bytes().to_vec()))
            .await
            .unwrap();
    }

    let snapshot = |records: Vec<Credential>| -> BTreeSet<(String, Vec<u8>)> {
        records
            .into_iter()
            .map(|r| (r.username.clone(), r.secret().to_vec()))
            .collect()
    };
    let first = snapshot(client.load_all().try_collect().await.unwrap());
    let second = snapshot(client.load_all().try_collect().await.unwrap());

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    client.close().await.unwrap();
}

#[tokio::test]
async fn load_all_keeps_items_without_username() {
    let mock = Arc::new(MockSecretService::new().with_collection("default"));
    mock.insert_item("default", "imported", &[("origin", "browser")], b"token")
        .unwrap();
    let client = connect(&mock, "default").await.unwrap();

    let all: Vec<Credential> = client.load_all().try_collect().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].username, "");
    assert_eq!(all[0].description, "imported");
    assert_eq!(all[0].collection, "default");
    client.close().await.unwrap();
}
