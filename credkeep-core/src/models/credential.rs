//! Credential record model.
//!
//! A record is keyed inside its collection by the pair (username, schema),
//! where the schema attribute is derived from the collection name. The
//! secret bytes belong to the record alone and are zeroed when the record
//! is dropped or the secret is replaced.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

/// Collection used when none is configured
pub const DEFAULT_COLLECTION: &str = "default";

/// Attribute holding the record's username
pub const USERNAME_ATTRIBUTE: &str = "Username";

/// Attribute holding the schema derived from the collection name
pub const SCHEMA_ATTRIBUTE: &str = "xdg:schema";

/// Schema attribute value for items stored under `collection`
#[must_use]
pub fn schema_for(collection: &str) -> String {
    format!("org.freedesktop.{collection}.Secret")
}

/// Attribute lookup for one record
///
/// Built per call from (username, collection) and used for every search;
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchAttributes {
    attributes: BTreeMap<String, String>,
}

impl SearchAttributes {
    /// Builds the lookup for `username` in `collection`
    #[must_use]
    pub fn new(username: &str, collection: &str) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(USERNAME_ATTRIBUTE.to_string(), username.to_string());
        attributes.insert(SCHEMA_ATTRIBUTE.to_string(), schema_for(collection));
        Self { attributes }
    }

    /// The username being looked up
    #[must_use]
    pub fn username(&self) -> &str {
        self.attributes
            .get(USERNAME_ATTRIBUTE)
            .map_or("", String::as_str)
    }

    /// The attribute map sent to the service
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Consumes the lookup into its attribute map
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.attributes
    }
}

/// A username/secret record stored in a collection
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Account name; part of the record's key
    pub username: String,
    /// Human-readable label shown by keyring managers
    pub description: String,
    /// Name of the collection the record belongs to
    pub collection: String,
    /// Last modification time reported by the service
    pub last_modified: Option<DateTime<Utc>>,
    secret: Zeroizing<Vec<u8>>,
}

impl Credential {
    /// Creates a record in the default collection
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            description: String::new(),
            collection: DEFAULT_COLLECTION.to_string(),
            last_modified: None,
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// Creates a record from a UTF-8 password
    #[must_use]
    pub fn with_password(username: impl Into<String>, password: &SecretString) -> Self {
        Self::new(username, password.expose_secret().as_bytes().to_vec())
    }

    /// Sets the description (label)
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the collection name
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Raw secret bytes
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Replaces the secret; the previous bytes are zeroed
    pub fn set_secret(&mut self, secret: impl Into<Vec<u8>>) {
        self.secret = Zeroizing::new(secret.into());
    }

    /// Zeroes and empties the secret
    pub fn clear_secret(&mut self) {
        self.set_secret(Vec::new());
    }

    /// Secret as a password, or `None` if it is not valid UTF-8
    #[must_use]
    pub fn password(&self) -> Option<SecretString> {
        std::str::from_utf8(&self.secret)
            .ok()
            .map(|s| SecretString::from(s.to_string()))
    }

    /// Attribute lookup identifying this record
    #[must_use]
    pub fn search_attributes(&self) -> SearchAttributes {
        SearchAttributes::new(&self.username, &self.collection)
    }

    pub(crate) fn replace_secret(&mut self, secret: Zeroizing<Vec<u8>>) {
        self.secret = secret;
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::new(String::new(), Vec::new())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("description", &self.description)
            .field("collection", &self.collection)
            .field("last_modified", &self.last_modified)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Username: {}, Collection: {}, LastWriteTime: ",
            self.username, self.collection
        )?;
        match self.last_modified {
            Some(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
            None => f.write_str("never"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_derived_from_collection() {
        assert_eq!(schema_for("default"), "org.freedesktop.default.Secret");
        let attrs = SearchAttributes::new("alice", "work");
        assert_eq!(attrs.username(), "alice");
        assert_eq!(
            attrs.as_map().get(SCHEMA_ATTRIBUTE).map(String::as_str),
            Some("org.freedesktop.work.Secret")
        );
    }

    #[test]
    fn new_record_targets_default_collection() {
        let cred = Credential::new("alice", b"p1".to_vec());
        assert_eq!(cred.collection, DEFAULT_COLLECTION);
        assert_eq!(cred.secret(), b"p1");
        assert!(cred.last_modified.is_none());
    }

    #[test]
    fn debug_and_display_hide_secret() {
        let cred = Credential::new("alice", b"hunter2".to_vec()).with_description("mail");
        assert!(!format!("{cred:?}").contains("hunter2"));
        let shown = cred.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(shown.starts_with("Username: alice, Collection: default"));
    }

    #[test]
    fn password_roundtrip_and_invalid_utf8() {
        let cred = Credential::with_password("bob", &SecretString::from("s3cret".to_string()));
        assert_eq!(cred.password().unwrap().expose_secret(), "s3cret");

        let binary = Credential::new("bob", vec![0xff, 0xfe]);
        assert!(binary.password().is_none());
    }

    #[test]
    fn clear_secret_empties_buffer() {
        let mut cred = Credential::new("dave", b"abc".to_vec());
        cred.clear_secret();
        assert!(cred.secret().is_empty());
    }
}
