//! Property tests for credential records and attribute lookups

use credkeep_core::models::{SCHEMA_ATTRIBUTE, USERNAME_ATTRIBUTE};
use credkeep_core::{Credential, SearchAttributes, schema_for};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn search_attributes_key_on_username_and_schema(
        username in "[a-zA-Z0-9@._-]{0,32}",
        collection in "[a-z][a-z0-9_]{0,16}",
    ) {
        let attrs = SearchAttributes::new(&username, &collection);
        prop_assert_eq!(attrs.username(), username.as_str());
        prop_assert_eq!(attrs.as_map().len(), 2);
        prop_assert_eq!(attrs.as_map().get(USERNAME_ATTRIBUTE), Some(&username));
        prop_assert_eq!(attrs.as_map().get(SCHEMA_ATTRIBUTE), Some(&schema_for(&collection)));
    }

    #[test]
    fn record_attributes_match_lookup(
        username in "[a-zA-Z0-9@._-]{1,32}",
        collection in "[a-z][a-z0-9_]{0,16}",
        secret in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let record = Credential::new(username.clone(), secret).with_collection(collection.clone());
        prop_assert_eq!(record.search_attributes(), SearchAttributes::new(&username, &collection));
    }

    #[test]
    fn debug_and_display_never_show_the_secret(
        username in "[a-z]{1,12}",
        secret in "[A-Z]{16,32}",
    ) {
        let record = Credential::new(username, secret.clone().into_bytes());
        let debugged = format!("{record:?}");
        let displayed = record.to_string();
        prop_assert!(!debugged.contains(&secret));
        prop_assert!(!displayed.contains(&secret));
    }

    #[test]
    fn utf8_secrets_expose_a_password(password in "\\PC{0,40}") {
        let record = Credential::new("user", password.clone().into_bytes());
        let exposed = record
            .password()
            .map(|p| secrecy::ExposeSecret::expose_secret(&p).to_string());
        prop_assert_eq!(exposed, Some(password));
    }
}
