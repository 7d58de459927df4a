//! Transport adapter seam
//!
//! The protocol engine never touches the wire. It talks to remote objects
//! through the [`Transport`] trait, which calls methods, reads properties and
//! subscribes to signals using the typed [`Value`] shapes the Secret Service
//! protocol needs.
//!
//! With the `dbus` feature, [`DbusTransport`] implements the trait on top of
//! the user's session bus.

#[cfg(feature = "dbus")]
mod dbus;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::{SecretError, SecretResult};

#[cfg(feature = "dbus")]
pub use self::dbus::DbusTransport;

/// Path of a remote object exposed by the service
///
/// The path `/` is the protocol's "nothing here" marker: a method that
/// needs no prompt returns it in place of a prompt path, and a method that
/// must prompt returns it in place of its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Creates a path from its string form
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The `/` sentinel
    #[must_use]
    pub fn none() -> Self {
        Self("/".to_string())
    }

    /// Returns true if this is the `/` sentinel
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0 == "/"
    }

    /// Returns the path as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Loose suffix test used to locate collections by name
    #[must_use]
    pub fn ends_with(&self, name: &str) -> bool {
        self.0.ends_with(name)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Typed argument or reply value
///
/// Covers exactly the shapes the Secret Service API uses. Byte arrays only
/// ever carry secret payloads and are wiped when dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `b`
    Bool(bool),
    /// `t`
    U64(u64),
    /// `s`
    Str(String),
    /// `o`
    Path(ObjectPath),
    /// `ao`
    Paths(Vec<ObjectPath>),
    /// `ay`
    Bytes(Zeroizing<Vec<u8>>),
    /// `a{ss}`
    Attributes(BTreeMap<String, String>),
    /// `a{sv}`
    Properties(BTreeMap<String, Value>),
    /// A struct of heterogeneous fields
    Struct(Vec<Value>),
    /// `v`
    Variant(Box<Value>),
}

impl Value {
    /// Wraps a value in a variant
    #[must_use]
    pub fn variant(inner: Self) -> Self {
        Self::Variant(Box::new(inner))
    }

    /// Strips any number of variant wrappers
    #[must_use]
    pub fn unwrap_variant(self) -> Self {
        let mut value = self;
        while let Self::Variant(inner) = value {
            value = *inner;
        }
        value
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U64(_) => "u64",
            Self::Str(_) => "string",
            Self::Path(_) => "object path",
            Self::Paths(_) => "object path array",
            Self::Bytes(_) => "byte array",
            Self::Attributes(_) => "attribute map",
            Self::Properties(_) => "property map",
            Self::Struct(_) => "struct",
            Self::Variant(_) => "variant",
        }
    }

    fn mismatch(&self, expected: &str) -> SecretError {
        SecretError::Protocol(format!("expected {expected}, got {}", self.kind()))
    }

    /// Extracts a boolean
    ///
    /// # Errors
    /// Returns `SecretError::Protocol` on any other shape.
    pub fn into_bool(self) -> SecretResult<bool> {
        match self.unwrap_variant() {
            Self::Bool(b) => Ok(b),
            other => Err(other.mismatch("bool")),
        }
    }

    /// Extracts an unsigned 64-bit integer
    ///
    /// # Errors
    /// Returns `SecretError::Protocol` on any other shape.
    pub fn into_u64(self) -> SecretResult<u64> {
        match self.unwrap_variant() {
            Self::U64(n) => Ok(n),
            other => Err(other.mismatch("u64")),
        }
    }

    /// Extracts a string
    ///
    /// # Errors
    /// Returns `SecretError::Protocol` on any other shape.
    pub fn into_string(self) -> SecretResult<String> {
        match self.unwrap_variant() {
            Self::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    /// Extracts an object path
    ///
    /// # Errors
    /// Returns `SecretError::Protocol` on any other shape.
    pub fn into_path(self) -> SecretResult<ObjectPath> {
        match self.unwrap_variant() {
            Self::Path(p) => Ok(p),
            other => Err(other.mismatch("object path")),
        }
    }

    /// Extracts an object path array
    ///
    /// # Errors
    /// Returns `SecretError::Protocol` on any other shape.
    pub fn into_paths(self) -> SecretResult<Vec<ObjectPath>> {
        match self.unwrap_variant() {
            Self::Paths(p) => Ok(p),
            other => Err(other.mismatch("object path array")),
        }
    }

    /// Extracts a byte array
    ///
    /// # Errors
    /// Returns `SecretError::Protocol` on any other shape.
    pub fn into_bytes(self) -> SecretResult<Zeroizing<Vec<u8>>> {
        match self.unwrap_variant() {
            Self::Bytes(b) => Ok(b),
            other => Err(other.mismatch("byte array")),
        }
    }

    /// Extracts a string-to-string map
    ///
    /// # Errors
    /// Returns `SecretError::Protocol` on any other shape.
    pub fn into_attributes(self) -> SecretResult<BTreeMap<String, String>> {
        match self.unwrap_variant() {
            Self::Attributes(a) => Ok(a),
            other => Err(other.mismatch("attribute map")),
        }
    }

    /// Extracts struct fields
    ///
    /// # Errors
    /// Returns `SecretError::Protocol` on any other shape.
    pub fn into_struct(self) -> SecretResult<Vec<Self>> {
        match self.unwrap_variant() {
            Self::Struct(fields) => Ok(fields),
            other => Err(other.mismatch("struct")),
        }
    }
}

/// Pops reply values in order, reporting a protocol error when one is missing
pub(crate) struct ReplyReader {
    method: &'static str,
    values: std::vec::IntoIter<Value>,
}

impl ReplyReader {
    pub(crate) fn new(method: &'static str, values: Vec<Value>) -> Self {
        Self {
            method,
            values: values.into_iter(),
        }
    }

    pub(crate) fn next(&mut self) -> SecretResult<Value> {
        self.values
            .next()
            .ok_or_else(|| SecretError::Protocol(format!("{}: expected more values", self.method)))
    }
}

/// Callback invoked with the arguments of each matching signal
pub type SignalHandler = Box<dyn Fn(Vec<Value>) + Send + Sync>;

/// Handle that removes a signal subscription
///
/// The removal runs exactly once: either through [`Unsubscribe::unsubscribe`]
/// or when the handle is dropped, which also covers a cancelled future
/// holding it.
pub struct Unsubscribe {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    /// Wraps the removal action of a subscription
    #[must_use]
    pub fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Removes the subscription now
    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("pending", &self.remove.is_some())
            .finish()
    }
}

/// Typed access to the remote objects of one service
///
/// An implementation is bound to a single service name at construction and
/// addresses objects by path. Implementations must map unreachable
/// endpoints to `SecretError::Transport` and rejected requests to
/// `SecretError::Protocol`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Calls `interface.method` on `object` and returns the reply values
    async fn call(
        &self,
        object: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> SecretResult<Vec<Value>>;

    /// Reads a property, with any variant wrapper removed
    async fn get_property(
        &self,
        object: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> SecretResult<Value>;

    /// Subscribes `handler` to `interface.signal` emitted by `object`
    async fn subscribe(
        &self,
        object: &ObjectPath,
        interface: &str,
        signal: &str,
        handler: SignalHandler,
    ) -> SecretResult<Unsubscribe>;
}

/// Proxy for one interface of one remote object
#[derive(Clone)]
pub struct RemoteObject {
    transport: Arc<dyn Transport>,
    path: ObjectPath,
    interface: &'static str,
}

impl RemoteObject {
    /// Binds a proxy to `path` and `interface`
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, path: ObjectPath, interface: &'static str) -> Self {
        Self {
            transport,
            path,
            interface,
        }
    }

    /// The object path this proxy addresses
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Calls a method on the bound interface
    ///
    /// # Errors
    /// Propagates transport and protocol failures unchanged.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> SecretResult<Vec<Value>> {
        self.transport
            .call(&self.path, self.interface, method, args)
            .await
    }

    /// Reads a property of the bound interface
    ///
    /// # Errors
    /// Propagates transport and protocol failures unchanged.
    pub async fn get(&self, property: &str) -> SecretResult<Value> {
        self.transport
            .get_property(&self.path, self.interface, property)
            .await
    }

    /// Subscribes to a signal of the bound interface
    ///
    /// # Errors
    /// Propagates transport and protocol failures unchanged.
    pub async fn subscribe(
        &self,
        signal: &str,
        handler: SignalHandler,
    ) -> SecretResult<Unsubscribe> {
        self.transport
            .subscribe(&self.path, self.interface, signal, handler)
            .await
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("path", &self.path)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}
