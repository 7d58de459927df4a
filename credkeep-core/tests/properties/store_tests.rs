//! Property tests for the credential store against the in-memory service

use std::collections::BTreeSet;
use std::sync::Arc;

use credkeep_core::testing::MockSecretService;
use credkeep_core::{ClientConfig, Credential, SearchAttributes, SecretServiceClient, Transport};
use futures::TryStreamExt;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn client(mock: &Arc<MockSecretService>) -> SecretServiceClient {
    let transport: Arc<dyn Transport> = mock.clone();
    SecretServiceClient::with_transport(transport, ClientConfig::default())
        .await
        .unwrap()
}

fn username() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9._-]{0,15}"
}

fn secret() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..48)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn save_then_load_roundtrips(
        user in username(),
        secret in secret(),
        label in "[ -~]{0,24}",
    ) {
        runtime().block_on(async {
            let mock = Arc::new(MockSecretService::new());
            let client = client(&mock).await;
            let record =
                Credential::new(user.clone(), secret.clone()).with_description(label.clone());

            prop_assert!(client.save(&record).await.unwrap());
            let loaded = client.load(&user, "default").await.unwrap();
            prop_assert_eq!(&loaded.username, &user);
            prop_assert_eq!(loaded.secret(), secret.as_slice());
            prop_assert_eq!(&loaded.description, &label);
            client.close().await.unwrap();
            Ok(())
        })?;
    }

    #[test]
    fn repeated_saves_keep_one_item_with_last_secret(
        user in username(),
        secrets in proptest::collection::vec(secret(), 1..5),
    ) {
        runtime().block_on(async {
            let mock = Arc::new(MockSecretService::new());
            let client = client(&mock).await;
            for s in &secrets {
                client.save(&Credential::new(user.clone(), s.clone())).await.unwrap();
            }

            prop_assert_eq!(mock.item_count("default"), 1);
            let loaded = client.load(&user, "default").await.unwrap();
            prop_assert_eq!(loaded.secret(), secrets[secrets.len() - 1].as_slice());
            client.close().await.unwrap();
            Ok(())
        })?;
    }

    #[test]
    fn exists_agrees_with_search(
        stored in proptest::collection::btree_set(username(), 0..6),
        candidate in username(),
    ) {
        runtime().block_on(async {
            let mock = Arc::new(MockSecretService::new());
            let client = client(&mock).await;
            for user in &stored {
                client.save(&Credential::new(user.clone(), b"x".to_vec())).await.unwrap();
            }

            for user in stored.iter().chain(std::iter::once(&candidate)) {
                let found = client.search(&SearchAttributes::new(user, "default")).await.unwrap();
                let exists = client.exists(user, "default").await.unwrap();
                prop_assert_eq!(exists, !found.is_empty());
                prop_assert_eq!(exists, stored.contains(user));
            }
            client.close().await.unwrap();
            Ok(())
        })?;
    }

    #[test]
    fn delete_of_absent_record_changes_nothing(
        stored in proptest::collection::btree_set(username(), 0..6),
        absent in username(),
    ) {
        prop_assume!(!stored.contains(&absent));
        runtime().block_on(async {
            let mock = Arc::new(MockSecretService::new());
            let client = client(&mock).await;
            for user in &stored {
                client.save(&Credential::new(user.clone(), b"x".to_vec())).await.unwrap();
            }

            let before = mock.item_count("default");
            let absent_record = Credential::new(absent.clone(), Vec::new());
            prop_assert!(!client.delete(&absent_record).await.unwrap());
            prop_assert_eq!(mock.item_count("default"), before);
            client.close().await.unwrap();
            Ok(())
        })?;
    }

    #[test]
    fn load_all_yields_the_same_multiset_twice(
        stored in proptest::collection::btree_map(username(), secret(), 0..6),
    ) {
        runtime().block_on(async {
            let mock = Arc::new(MockSecretService::new());
            let client = client(&mock).await;
            for (user, s) in &stored {
                client.save(&Credential::new(user.clone(), s.clone())).await.unwrap();
            }

            let collect = |records: Vec<Credential>| -> BTreeSet<(String, Vec<u8>)> {
                records.into_iter().map(|r| (r.username.clone(), r.secret().to_vec())).collect()
            };
            let first = collect(client.load_all().try_collect().await.unwrap());
            let second = collect(client.load_all().try_collect().await.unwrap());

            let expected: BTreeSet<(String, Vec<u8>)> =
                stored.iter().map(|(u, s)| (u.clone(), s.clone())).collect();
            prop_assert_eq!(&first, &expected);
            prop_assert_eq!(&first, &second);
            client.close().await.unwrap();
            Ok(())
        })?;
    }
}
