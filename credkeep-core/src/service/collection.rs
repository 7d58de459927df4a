//! Collection resolver
//!
//! Binds a client to the collection it stores items in:
//!
//! 1. list the collections registered with the service;
//! 2. take the first whose object path ends with the configured name;
//! 3. otherwise create one labeled with that name, driving the creation
//!    prompt if the service asks for one;
//! 4. unlock the bound collection.
//!
//! The path suffix match is loose on purpose: the service exposes
//! collections by path segment, not by a canonical name. Two collections
//! sharing a suffix (`work` and `homework`) resolve to whichever the
//! service lists first.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{SecretError, SecretResult};
use crate::tracing::span_names::COLLECTION_RESOLVE;
use crate::transport::{ObjectPath, RemoteObject, ReplyReader, Transport, Value};

use super::prompt::PromptCoordinator;
use super::{Reply, SS_COLLECTION_LABEL, SS_DBUS_PATH, SS_SERVICE_INTERFACE};

/// A resolved collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    name: String,
    path: ObjectPath,
}

impl CollectionHandle {
    /// The configured name the collection was resolved from
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection's object path
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }
}

/// Finds or creates collections by name
#[derive(Debug, Clone)]
pub struct CollectionResolver {
    service: RemoteObject,
    prompts: PromptCoordinator,
}

impl CollectionResolver {
    /// Creates a resolver that routes prompts through `prompts`
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, prompts: PromptCoordinator) -> Self {
        Self {
            service: RemoteObject::new(
                transport,
                ObjectPath::new(SS_DBUS_PATH),
                SS_SERVICE_INTERFACE,
            ),
            prompts,
        }
    }

    /// Resolves `name` to an unlocked collection
    ///
    /// # Errors
    /// Returns `SecretError::CollectionUnavailable` if no collection matches
    /// and creation yields none (including a dismissed creation prompt),
    /// `SecretError::UserCancelled` if the unlock prompt is dismissed, and
    /// propagates transport and protocol failures unchanged.
    #[instrument(name = COLLECTION_RESOLVE, skip(self))]
    pub async fn resolve(&self, name: &str) -> SecretResult<CollectionHandle> {
        let path = match self.find(name).await? {
            Some(path) => {
                debug!(collection = %path, "Found existing collection");
                path
            }
            None => self.create(name).await?,
        };
        self.unlock(&path).await?;

        Ok(CollectionHandle {
            name: name.to_string(),
            path,
        })
    }

    async fn find(&self, name: &str) -> SecretResult<Option<ObjectPath>> {
        let collections = self.service.get("Collections").await?.into_paths()?;
        debug!(count = collections.len(), "Listed collections");
        Ok(collections.into_iter().find(|c| c.ends_with(name)))
    }

    async fn create(&self, name: &str) -> SecretResult<ObjectPath> {
        let mut properties = BTreeMap::new();
        properties.insert(
            SS_COLLECTION_LABEL.to_string(),
            Value::Str(name.to_string()),
        );
        let reply = self
            .service
            .call(
                "CreateCollection",
                vec![Value::Properties(properties), Value::Str(String::new())],
            )
            .await?;
        let mut reader = ReplyReader::new("CreateCollection", reply);
        let collection = reader.next()?.into_path()?;
        let prompt = reader.next()?.into_path()?;

        let created = match Reply::from_pair(collection, prompt) {
            Reply::Direct(path) => path,
            Reply::NeedsPrompt(prompt) => match self.prompts.drive(&prompt).await {
                Ok(Some(result)) => result.into_path().unwrap_or_else(|e| {
                    warn!(error = %e, "Collection prompt returned no path");
                    ObjectPath::none()
                }),
                Ok(None) => ObjectPath::none(),
                Err(SecretError::UserCancelled) => {
                    warn!(collection = name, "Collection creation prompt dismissed");
                    return Err(SecretError::CollectionUnavailable(name.to_string()));
                }
                Err(e) => return Err(e),
            },
        };

        if created.is_none() {
            return Err(SecretError::CollectionUnavailable(name.to_string()));
        }
        info!(collection = %created, "Created collection");
        Ok(created)
    }

    async fn unlock(&self, path: &ObjectPath) -> SecretResult<()> {
        let reply = self
            .service
            .call("Unlock", vec![Value::Paths(vec![path.clone()])])
            .await?;
        let mut reader = ReplyReader::new("Unlock", reply);
        let unlocked = reader.next()?.into_paths()?;
        let prompt = reader.next()?.into_path()?;

        match Reply::from_pair(path.clone(), prompt) {
            Reply::NeedsPrompt(prompt) => {
                debug!(collection = %path, "Unlock needs a prompt");
                self.prompts.drive(&prompt).await?;
            }
            Reply::Direct(_) if !unlocked.contains(path) => {
                warn!(collection = %path, "Service left the collection locked");
            }
            Reply::Direct(_) => {}
        }
        Ok(())
    }
}
