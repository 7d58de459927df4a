//! Item operations
//!
//! Search, load, save, delete and enumerate the items of the resolved
//! collection. Lookups key on (username, schema); when the service returns
//! several matches the first one in service order wins and the rest are
//! ignored.
//!
//! Individual locked items are not unlocked here. Only the collection is
//! unlocked when it is resolved; a locked item surfaces as
//! `SecretError::SecretUnavailable`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{Instrument, debug, debug_span, instrument, warn};
use zeroize::Zeroizing;

use crate::error::{SecretError, SecretResult};
use crate::models::{Credential, SearchAttributes, USERNAME_ATTRIBUTE};
use crate::tracing::span_names::{ITEM_DELETE, ITEM_LOAD, ITEM_LOAD_ALL, ITEM_SAVE, ITEM_SEARCH};
use crate::transport::{ObjectPath, RemoteObject, ReplyReader, Transport, Value};

use super::collection::CollectionHandle;
use super::prompt::PromptCoordinator;
use super::{
    Reply, SS_COLLECTION_INTERFACE, SS_ITEM_ATTRIBUTES, SS_ITEM_INTERFACE, SS_ITEM_LABEL,
};

/// Converts a service timestamp (seconds since the Unix epoch) to UTC
#[must_use]
pub fn timestamp_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Item operations scoped to one collection and one session
#[derive(Clone)]
pub struct ItemOperations {
    transport: Arc<dyn Transport>,
    session: ObjectPath,
    collection: CollectionHandle,
    prompts: PromptCoordinator,
}

impl ItemOperations {
    /// Binds item operations to a session and a resolved collection
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        session: ObjectPath,
        collection: CollectionHandle,
        prompts: PromptCoordinator,
    ) -> Self {
        Self {
            transport,
            session,
            collection,
            prompts,
        }
    }

    /// The collection these operations target
    #[must_use]
    pub const fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    fn collection_proxy(&self) -> RemoteObject {
        RemoteObject::new(
            Arc::clone(&self.transport),
            self.collection.path().clone(),
            SS_COLLECTION_INTERFACE,
        )
    }

    fn item_proxy(&self, path: &ObjectPath) -> RemoteObject {
        RemoteObject::new(Arc::clone(&self.transport), path.clone(), SS_ITEM_INTERFACE)
    }

    /// Returns the items matching `attributes`, in service order
    ///
    /// # Errors
    /// Propagates transport and protocol failures unchanged.
    #[instrument(
        name = ITEM_SEARCH,
        level = "debug",
        skip(self, attributes),
        fields(username = attributes.username())
    )]
    pub async fn search(&self, attributes: &SearchAttributes) -> SecretResult<Vec<ObjectPath>> {
        let reply = self
            .collection_proxy()
            .call(
                "SearchItems",
                vec![Value::Attributes(attributes.as_map().clone())],
            )
            .await?;
        let found = ReplyReader::new("SearchItems", reply).next()?.into_paths()?;
        debug!(matches = found.len(), "Searched items");
        Ok(found)
    }

    /// Returns true if an item exists for (username, collection)
    ///
    /// # Errors
    /// Propagates transport and protocol failures unchanged.
    pub async fn exists(&self, username: &str, collection: &str) -> SecretResult<bool> {
        let found = self
            .search(&SearchAttributes::new(username, collection))
            .await?;
        Ok(!found.is_empty())
    }

    /// Loads the record stored for (username, collection)
    ///
    /// # Errors
    /// Returns `SecretError::NotFound` if nothing matches,
    /// `SecretError::SecretUnavailable` if the match is locked, and
    /// propagates transport and protocol failures unchanged.
    #[instrument(name = ITEM_LOAD, level = "debug", skip(self))]
    pub async fn load(&self, username: &str, collection: &str) -> SecretResult<Credential> {
        let found = self
            .search(&SearchAttributes::new(username, collection))
            .await?;
        let Some(path) = found.into_iter().next() else {
            return Err(SecretError::NotFound(username.to_string()));
        };

        let mut record = self.fetch(&path, collection).await?;
        record.username = username.to_string();
        Ok(record)
    }

    /// Reloads `record` in place from the service
    ///
    /// `record` is only overwritten once the whole item has been read.
    ///
    /// # Errors
    /// Same as [`ItemOperations::load`].
    pub async fn refresh(&self, record: &mut Credential) -> SecretResult<()> {
        let loaded = self.load(&record.username, &record.collection).await?;
        *record = loaded;
        Ok(())
    }

    /// Creates or replaces the item for `record`
    ///
    /// Returns `Ok(false)` only if the service neither produced an item nor
    /// asked for a prompt.
    ///
    /// # Errors
    /// Returns `SecretError::UserCancelled` if the user dismissed the prompt,
    /// and propagates transport and protocol failures unchanged.
    #[instrument(
        name = ITEM_SAVE,
        level = "debug",
        skip(self, record),
        fields(username = %record.username)
    )]
    pub async fn save(&self, record: &Credential) -> SecretResult<bool> {
        let mut properties = BTreeMap::new();
        properties.insert(
            SS_ITEM_LABEL.to_string(),
            Value::Str(record.description.clone()),
        );
        properties.insert(
            SS_ITEM_ATTRIBUTES.to_string(),
            Value::Attributes(record.search_attributes().into_map()),
        );
        let secret = Value::Struct(vec![
            Value::Path(self.session.clone()),
            Value::Bytes(Zeroizing::new(Vec::new())),
            Value::Bytes(Zeroizing::new(record.secret().to_vec())),
            Value::Str(String::new()),
        ]);

        let reply = self
            .collection_proxy()
            .call(
                "CreateItem",
                vec![Value::Properties(properties), secret, Value::Bool(true)],
            )
            .await?;
        let mut reader = ReplyReader::new("CreateItem", reply);
        let item = reader.next()?.into_path()?;
        let prompt = reader.next()?.into_path()?;

        match Reply::from_pair(item, prompt) {
            Reply::Direct(item) if item.is_none() => {
                warn!("Service returned neither an item nor a prompt");
                Ok(false)
            }
            Reply::Direct(item) => {
                debug!(item = %item, "Saved item");
                Ok(true)
            }
            Reply::NeedsPrompt(prompt) => {
                self.prompts.drive(&prompt).await?;
                debug!("Saved item after prompt");
                Ok(true)
            }
        }
    }

    /// Deletes the item for `record`
    ///
    /// Returns `Ok(false)` if no item matches.
    ///
    /// # Errors
    /// Returns `SecretError::UserCancelled` if the user dismissed the prompt,
    /// and propagates transport and protocol failures unchanged.
    #[instrument(
        name = ITEM_DELETE,
        level = "debug",
        skip(self, record),
        fields(username = %record.username)
    )]
    pub async fn delete(&self, record: &Credential) -> SecretResult<bool> {
        let found = self.search(&record.search_attributes()).await?;
        let Some(path) = found.into_iter().next() else {
            debug!("Nothing to delete");
            return Ok(false);
        };

        let reply = self.item_proxy(&path).call("Delete", Vec::new()).await?;
        let prompt = ReplyReader::new("Delete", reply).next()?.into_path()?;
        if let Reply::NeedsPrompt(prompt) = Reply::from_pair(path.clone(), prompt) {
            self.prompts.drive(&prompt).await?;
        }
        debug!(item = %path, "Deleted item");
        Ok(true)
    }

    /// Enumerates every item of the collection as a record
    ///
    /// The stream is lazy and holds no cursor: each call lists the
    /// collection afresh, and items added or removed while it is consumed
    /// are not reflected.
    pub fn load_all(&self) -> BoxStream<'_, SecretResult<Credential>> {
        let listing = async move {
            let items = self.collection_proxy().get("Items").await?.into_paths()?;
            debug!(count = items.len(), "Listed collection items");
            Ok::<_, SecretError>(items)
        };

        stream::once(listing.instrument(debug_span!(ITEM_LOAD_ALL)))
            .map(move |listed| match listed {
                Ok(paths) => stream::iter(paths)
                    .then(move |path| async move {
                        self.fetch(&path, self.collection.name()).await
                    })
                    .left_stream(),
                Err(e) => stream::once(async move { Err::<Credential, _>(e) }).right_stream(),
            })
            .flatten()
            .boxed()
    }

    /// Reads label, attributes, secret and modification time of one item
    async fn fetch(&self, path: &ObjectPath, collection: &str) -> SecretResult<Credential> {
        let item = self.item_proxy(path);
        if item.get("Locked").await?.into_bool()? {
            warn!(item = %path, "Item is locked");
            return Err(SecretError::SecretUnavailable(path.to_string()));
        }

        let label = item.get("Label").await?.into_string()?;
        let attributes = item.get("Attributes").await?.into_attributes()?;
        let reply = item
            .call("GetSecret", vec![Value::Path(self.session.clone())])
            .await?;
        let fields = ReplyReader::new("GetSecret", reply).next()?.into_struct()?;
        let mut secret = ReplyReader::new("Secret", fields);
        let _session = secret.next()?;
        let _parameters = secret.next()?;
        let value = secret.next()?.into_bytes()?;
        let modified = item.get("Modified").await?.into_u64()?;

        let username = attributes
            .get(USERNAME_ATTRIBUTE)
            .cloned()
            .unwrap_or_default();
        let mut record = Credential::new(username, Vec::new())
            .with_description(label)
            .with_collection(collection);
        record.last_modified = timestamp_to_utc(modified);
        record.replace_secret(value);
        Ok(record)
    }
}

impl std::fmt::Debug for ItemOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemOperations")
            .field("session", &self.session)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}
