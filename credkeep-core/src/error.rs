//! Error types for credential store operations
//!
//! Every failure surfaced by the client falls into one of the categories
//! below. Messages never include secret material.

/// Errors that can occur while talking to the Secret Service.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// The service endpoint could not be reached or the connection dropped.
    #[error("secret service unreachable: {0}")]
    Transport(String),

    /// The service rejected the shape of a request or returned an
    /// unexpected reply.
    #[error("secret service protocol error: {0}")]
    Protocol(String),

    /// The configured collection could neither be found nor created.
    #[error("collection '{0}' is unavailable")]
    CollectionUnavailable(String),

    /// The interactive prompt was dismissed by the user.
    #[error("prompt was dismissed by the user")]
    UserCancelled,

    /// The matched item is locked and its secret cannot be read.
    #[error("secret is locked: {0}")]
    SecretUnavailable(String),

    /// No item matched the lookup.
    #[error("no credential found for '{0}'")]
    NotFound(String),

    /// The client configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SecretError {
    /// Returns true if the lookup simply yielded nothing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if the user dismissed a prompt.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }

    /// Returns true if the client instance cannot be used any further.
    ///
    /// Transport failures and an unavailable collection leave no usable
    /// session or collection behind; the caller has to build a new client.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::CollectionUnavailable(_))
    }
}

/// Result type for credential store operations
pub type SecretResult<T> = Result<T, SecretError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_names_user() {
        let err = SecretError::NotFound("alice".into());
        assert_eq!(err.to_string(), "no credential found for 'alice'");
        assert!(err.is_not_found());
        assert!(!err.is_fatal());
    }

    #[test]
    fn cancelled_is_not_fatal() {
        let err = SecretError::UserCancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "prompt was dismissed by the user");
    }

    #[test]
    fn transport_and_collection_errors_are_fatal() {
        assert!(SecretError::Transport("no bus".into()).is_fatal());
        assert!(SecretError::CollectionUnavailable("work".into()).is_fatal());
        assert!(!SecretError::Protocol("bad".into()).is_fatal());
    }
}
