//! Session manager
//!
//! Every secret read or write carries a session path. The client opens one
//! session at construction and closes it on shutdown.
//!
//! Only the `plain` algorithm is negotiated: secrets cross the bus
//! unencrypted. This is a limitation of the chosen mode and is kept as is.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::{SecretError, SecretResult};
use crate::tracing::span_names::{SESSION_CLOSE, SESSION_OPEN};
use crate::transport::{ObjectPath, RemoteObject, ReplyReader, Transport, Value};

use super::{ALGORITHM_PLAIN, SS_DBUS_PATH, SS_SERVICE_INTERFACE, SS_SESSION_INTERFACE};

/// Handle to an open session with the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    path: ObjectPath,
}

impl Session {
    /// Opens a plain-text session
    ///
    /// # Errors
    /// Returns `SecretError::Transport` if the service cannot be reached and
    /// `SecretError::Protocol` if the algorithm is rejected. No retry is
    /// attempted.
    #[instrument(name = SESSION_OPEN, skip(transport))]
    pub async fn open(transport: &Arc<dyn Transport>) -> SecretResult<Self> {
        let service = RemoteObject::new(
            Arc::clone(transport),
            ObjectPath::new(SS_DBUS_PATH),
            SS_SERVICE_INTERFACE,
        );
        let reply = service
            .call(
                "OpenSession",
                vec![
                    Value::Str(ALGORITHM_PLAIN.to_string()),
                    Value::variant(Value::Str(String::new())),
                ],
            )
            .await?;

        let mut reader = ReplyReader::new("OpenSession", reply);
        let _output = reader.next()?;
        let path = reader.next()?.into_path()?;
        if path.is_none() {
            return Err(SecretError::Protocol(
                "OpenSession returned no session".to_string(),
            ));
        }

        debug!(session = %path, "Opened secret service session");
        Ok(Self { path })
    }

    /// The session object path
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Closes the session on the service side
    ///
    /// # Errors
    /// Propagates transport and protocol failures unchanged.
    #[instrument(
        name = SESSION_CLOSE,
        skip(self, transport),
        fields(session = %self.path)
    )]
    pub async fn close(self, transport: &Arc<dyn Transport>) -> SecretResult<()> {
        let session = RemoteObject::new(Arc::clone(transport), self.path, SS_SESSION_INTERFACE);
        match session.call("Close", Vec::new()).await {
            Ok(_) => {
                debug!("Closed secret service session");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to close secret service session");
                Err(e)
            }
        }
    }
}
