//! Secret Service client
//!
//! [`SecretServiceClient`] owns one session and one resolved collection for
//! its whole lifetime. Operations on a client run one at a time, in the
//! order they are awaited; use one client per collection (or per task) for
//! concurrent work.

use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::SecretResult;
use crate::models::{Credential, SearchAttributes};
use crate::service::collection::{CollectionHandle, CollectionResolver};
use crate::service::items::ItemOperations;
use crate::service::prompt::PromptCoordinator;
use crate::service::session::Session;
use crate::tracing::span_names::{CLIENT_CLOSE, CLIENT_CONNECT};
use crate::transport::{ObjectPath, Transport};

/// Client bound to one collection of the Secret Service
pub struct SecretServiceClient {
    transport: Arc<dyn Transport>,
    session: Option<Session>,
    items: ItemOperations,
}

impl SecretServiceClient {
    /// Connects to the service on the user's session bus
    ///
    /// # Errors
    /// Returns `SecretError::Config` for an invalid configuration,
    /// `SecretError::Transport` if the bus or service cannot be reached, and
    /// any error of [`SecretServiceClient::with_transport`].
    #[cfg(feature = "dbus")]
    pub async fn connect(config: ClientConfig) -> SecretResult<Self> {
        config.validate()?;
        let transport = crate::transport::DbusTransport::connect_session(
            &config.service_name,
            config.call_timeout(),
        )
        .await?;
        Self::with_transport(Arc::new(transport), config).await
    }

    /// Builds a client over an existing transport
    ///
    /// Opens a session, then resolves and unlocks the configured
    /// collection. If resolution fails the session is closed again.
    ///
    /// # Errors
    /// Returns `SecretError::Config` for an invalid configuration,
    /// `SecretError::CollectionUnavailable` if the collection cannot be found
    /// or created, `SecretError::UserCancelled` if an unlock prompt is
    /// dismissed, and propagates transport and protocol failures unchanged.
    #[instrument(
        name = CLIENT_CONNECT,
        skip(transport, config),
        fields(collection = %config.collection)
    )]
    pub async fn with_transport(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> SecretResult<Self> {
        config.validate()?;

        let session = Session::open(&transport).await?;
        let prompts = PromptCoordinator::new(Arc::clone(&transport), config.window_id.clone());
        let resolver = CollectionResolver::new(Arc::clone(&transport), prompts.clone());

        let collection = match resolver.resolve(&config.collection).await {
            Ok(collection) => collection,
            Err(e) => {
                warn!(error = %e, "Collection resolution failed, closing session");
                if let Err(close) = session.close(&transport).await {
                    debug!(error = %close, "Session close after failed resolution also failed");
                }
                return Err(e);
            }
        };

        info!(path = %collection.path(), "Secret service client ready");
        let items = ItemOperations::new(
            Arc::clone(&transport),
            session.path().clone(),
            collection,
            prompts,
        );
        Ok(Self {
            transport,
            session: Some(session),
            items,
        })
    }

    /// The resolved collection
    #[must_use]
    pub const fn collection(&self) -> &CollectionHandle {
        self.items.collection()
    }

    /// Name of the resolved collection
    #[must_use]
    pub fn collection_name(&self) -> &str {
        self.items.collection().name()
    }

    /// Object path of the resolved collection
    #[must_use]
    pub const fn collection_path(&self) -> &ObjectPath {
        self.items.collection().path()
    }

    /// Returns the items matching `attributes`, in service order
    ///
    /// # Errors
    /// Propagates transport and protocol failures unchanged.
    pub async fn search(&self, attributes: &SearchAttributes) -> SecretResult<Vec<ObjectPath>> {
        self.items.search(attributes).await
    }

    /// Returns true if an item exists for (username, collection)
    ///
    /// # Errors
    /// Propagates transport and protocol failures unchanged.
    pub async fn exists(&self, username: &str, collection: &str) -> SecretResult<bool> {
        self.items.exists(username, collection).await
    }

    /// Loads the record stored for (username, collection)
    ///
    /// # Errors
    /// Returns `SecretError::NotFound` if nothing matches and
    /// `SecretError::SecretUnavailable` if the item is locked.
    pub async fn load(&self, username: &str, collection: &str) -> SecretResult<Credential> {
        self.items.load(username, collection).await
    }

    /// Reloads `record` in place; it is left untouched on failure
    ///
    /// # Errors
    /// Same as [`SecretServiceClient::load`].
    pub async fn refresh(&self, record: &mut Credential) -> SecretResult<()> {
        self.items.refresh(record).await
    }

    /// Creates or replaces the item for `record`
    ///
    /// # Errors
    /// Returns `SecretError::UserCancelled` if a confirmation prompt is
    /// dismissed, and propagates transport and protocol failures unchanged.
    pub async fn save(&self, record: &Credential) -> SecretResult<bool> {
        self.items.save(record).await
    }

    /// Deletes the item for `record`; `Ok(false)` if there is none
    ///
    /// # Errors
    /// Returns `SecretError::UserCancelled` if a confirmation prompt is
    /// dismissed, and propagates transport and protocol failures unchanged.
    pub async fn delete(&self, record: &Credential) -> SecretResult<bool> {
        self.items.delete(record).await
    }

    /// Enumerates every record in the collection
    ///
    /// Each call starts a fresh enumeration.
    pub fn load_all(&self) -> BoxStream<'_, SecretResult<Credential>> {
        self.items.load_all()
    }

    /// Closes the session
    ///
    /// # Errors
    /// Propagates transport and protocol failures of the close call.
    #[instrument(name = CLIENT_CLOSE, skip(self))]
    pub async fn close(mut self) -> SecretResult<()> {
        match self.session.take() {
            Some(session) => session.close(&self.transport).await,
            None => Ok(()),
        }
    }
}

impl Drop for SecretServiceClient {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        warn!(session = %session.path(), "Client dropped without close");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = Arc::clone(&self.transport);
                handle.spawn(async move {
                    let _ = session.close(&transport).await;
                });
            }
            Err(_) => warn!("No runtime to close the session; it ends with the connection"),
        }
    }
}

impl std::fmt::Debug for SecretServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretServiceClient")
            .field("session", &self.session)
            .field("collection", self.items.collection())
            .finish_non_exhaustive()
    }
}
