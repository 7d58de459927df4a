//! freedesktop Secret Service protocol engine
//!
//! - [`session`] opens and closes the plain-text session
//! - [`collection`] finds or creates the configured collection
//! - [`prompt`] drives prompt objects to completion
//! - [`items`] searches, reads, writes and deletes items

pub mod collection;
pub mod items;
pub mod prompt;
pub mod session;

use crate::transport::ObjectPath;

// Service bus name and root object
/// Well-known bus name of the service
pub const SS_DBUS_NAME: &str = "org.freedesktop.secrets";
/// Path of the service object
pub const SS_DBUS_PATH: &str = "/org/freedesktop/secrets";

// Interfaces
/// Service interface
pub const SS_SERVICE_INTERFACE: &str = "org.freedesktop.Secret.Service";
/// Collection interface
pub const SS_COLLECTION_INTERFACE: &str = "org.freedesktop.Secret.Collection";
/// Item interface
pub const SS_ITEM_INTERFACE: &str = "org.freedesktop.Secret.Item";
/// Session interface
pub const SS_SESSION_INTERFACE: &str = "org.freedesktop.Secret.Session";
/// Prompt interface
pub const SS_PROMPT_INTERFACE: &str = "org.freedesktop.Secret.Prompt";

// Item properties
/// Item label property, as passed to `CreateItem`
pub const SS_ITEM_LABEL: &str = "org.freedesktop.Secret.Item.Label";
/// Item attributes property, as passed to `CreateItem`
pub const SS_ITEM_ATTRIBUTES: &str = "org.freedesktop.Secret.Item.Attributes";

// Collection properties
/// Collection label property, as passed to `CreateCollection`
pub const SS_COLLECTION_LABEL: &str = "org.freedesktop.Secret.Collection.Label";

// Algorithm names
/// The only session algorithm negotiated
pub const ALGORITHM_PLAIN: &str = "plain";

/// Outcome of a method that may need a prompt to finish
///
/// Service methods such as `CreateCollection`, `CreateItem`, `Unlock` and
/// `Delete` either finish immediately or hand back a prompt object that
/// has to be driven before the result exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The method finished; carries its result path (possibly `/`).
    Direct(ObjectPath),
    /// The method needs the given prompt to be completed first.
    NeedsPrompt(ObjectPath),
}

impl Reply {
    /// Builds a reply from the `(result, prompt)` pair the service returns
    #[must_use]
    pub fn from_pair(result: ObjectPath, prompt: ObjectPath) -> Self {
        if prompt.is_none() {
            Self::Direct(result)
        } else {
            Self::NeedsPrompt(prompt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_without_prompt_is_direct() {
        let item = ObjectPath::new("/org/freedesktop/secrets/collection/login/1");
        assert_eq!(
            Reply::from_pair(item.clone(), ObjectPath::none()),
            Reply::Direct(item)
        );
    }

    #[test]
    fn reply_with_prompt_needs_prompt() {
        let prompt = ObjectPath::new("/org/freedesktop/secrets/prompt/p7");
        assert_eq!(
            Reply::from_pair(ObjectPath::none(), prompt.clone()),
            Reply::NeedsPrompt(prompt)
        );
    }
}
