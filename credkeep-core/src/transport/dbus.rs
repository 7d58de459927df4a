//! Session bus transport
//!
//! Implements [`Transport`] with `dbus` and `dbus-tokio`: a non-blocking
//! connection driven by a task on the current runtime, method calls through
//! `nonblock::Proxy`, properties through `org.freedesktop.DBus.Properties`
//! and signals through match rules.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbus::arg::{AppendAll, ArgType, Iter, IterAppend, ReadAll, TypeMismatchError, Variant};
use dbus::message::MatchRule;
use dbus::nonblock::{MethodReply, Proxy, SyncConnection};
use dbus::strings::{BusName, Signature};
use dbus_tokio::connection;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::error::{SecretError, SecretResult};
use crate::service::SS_DBUS_PATH;

use super::{ObjectPath, SignalHandler, Transport, Unsubscribe, Value};

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

/// Bus errors meaning the service could not be reached at all
const UNREACHABLE_ERRORS: &[&str] = &[
    "org.freedesktop.DBus.Error.ServiceUnknown",
    "org.freedesktop.DBus.Error.NameHasNoOwner",
    "org.freedesktop.DBus.Error.NoReply",
    "org.freedesktop.DBus.Error.Disconnected",
    "org.freedesktop.DBus.Error.NoServer",
    "org.freedesktop.DBus.Error.Timeout",
    "org.freedesktop.DBus.Error.TimedOut",
];

/// Transport over the user's session bus
pub struct DbusTransport {
    conn: Arc<SyncConnection>,
    service: String,
    timeout: Duration,
}

impl DbusTransport {
    /// Connects to the session bus and checks that `service_name` answers
    ///
    /// Must be called from within a Tokio runtime: the connection is driven
    /// by a task spawned on it.
    ///
    /// # Errors
    /// Returns `SecretError::Config` for a malformed service name and
    /// `SecretError::Transport` if the bus or the service is unreachable.
    #[instrument(skip(timeout))]
    pub async fn connect_session(service_name: &str, timeout: Duration) -> SecretResult<Self> {
        BusName::new(service_name).map_err(|e| {
            SecretError::Config(format!("invalid service name '{service_name}': {e}"))
        })?;

        let (resource, conn) = connection::new_session_sync().map_err(|e| map_error(&e))?;
        tokio::spawn(async move {
            let err = resource.await;
            warn!(error = %err, "Lost connection to the session bus");
        });

        let transport = Self {
            conn,
            service: service_name.to_string(),
            timeout,
        };
        transport
            .call(&ObjectPath::new(SS_DBUS_PATH), PEER_INTERFACE, "Ping", Vec::new())
            .await?;
        info!(service = service_name, "Connected to secret service");
        Ok(transport)
    }

    /// Encodes the arguments and sends the call. Kept synchronous so the
    /// encoded arguments never live across an await point.
    fn start_call(
        &self,
        object: &ObjectPath,
        interface: &str,
        method: &str,
        args: &[Value],
    ) -> SecretResult<MethodReply<Replies>> {
        let encoded = args
            .iter()
            .map(Encoded::new)
            .collect::<SecretResult<Vec<_>>>()?;
        let proxy = Proxy::new(
            self.service.as_str(),
            dbus_path(object)?,
            self.timeout,
            Arc::clone(&self.conn),
        );
        Ok(proxy.method_call(interface, method, Args(encoded)))
    }
}

#[async_trait]
impl Transport for DbusTransport {
    async fn call(
        &self,
        object: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> SecretResult<Vec<Value>> {
        debug!(object = %object, interface, method, "Calling");
        let pending = self.start_call(object, interface, method, &args)?;
        let Replies(values) = pending.await.map_err(|e| map_error(&e))?;
        values
    }

    async fn get_property(
        &self,
        object: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> SecretResult<Value> {
        let reply = self
            .call(
                object,
                PROPERTIES_INTERFACE,
                "Get",
                vec![Value::Str(interface.to_string()), Value::Str(name.to_string())],
            )
            .await?;
        reply
            .into_iter()
            .next()
            .map(Value::unwrap_variant)
            .ok_or_else(|| SecretError::Protocol(format!("property {name} has no value")))
    }

    async fn subscribe(
        &self,
        object: &ObjectPath,
        interface: &str,
        signal: &str,
        handler: SignalHandler,
    ) -> SecretResult<Unsubscribe> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SecretError::Transport(format!("no runtime for signal delivery: {e}")))?;
        let rule = MatchRule::new_signal(interface.to_string(), signal.to_string())
            .with_path(dbus_path(object)?);
        let handler: Arc<dyn Fn(Vec<Value>) + Send + Sync> = Arc::from(handler);

        let token = self
            .conn
            .add_match(rule)
            .await
            .map_err(|e| map_error(&e))?
            .msg_cb(move |msg| {
                match read_all(&mut msg.iter_init()) {
                    Ok(values) => handler(values),
                    Err(e) => warn!(error = %e, "Dropping undecodable signal"),
                }
                true
            })
            .token();
        debug!(object = %object, signal, "Subscribed");

        let conn = Arc::clone(&self.conn);
        Ok(Unsubscribe::new(move || {
            runtime.spawn(async move {
                if let Err(e) = conn.remove_match(token).await {
                    debug!(error = %e, "Failed to remove signal match");
                }
            });
        }))
    }
}

impl std::fmt::Debug for DbusTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbusTransport")
            .field("service", &self.service)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A call argument checked for the bus and ready to append
///
/// Byte arrays and strings stay borrowed from the caller's values, so secret
/// payloads go straight into the message without an intermediate copy.
enum Encoded<'a> {
    Bool(bool),
    U64(u64),
    Str(&'a str),
    Path(dbus::Path<'static>),
    Paths(Vec<dbus::Path<'static>>),
    Bytes(&'a [u8]),
    Attributes(&'a BTreeMap<String, String>),
    Properties(Vec<(&'a str, Signature<'static>, Self)>),
    Struct(Vec<Self>),
    Variant(Signature<'static>, Box<Self>),
}

impl<'a> Encoded<'a> {
    fn new(value: &'a Value) -> SecretResult<Self> {
        Ok(match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::U64(n) => Self::U64(*n),
            Value::Str(s) => Self::Str(s.as_str()),
            Value::Path(p) => Self::Path(dbus_path(p)?),
            Value::Paths(paths) => Self::Paths(
                paths
                    .iter()
                    .map(dbus_path)
                    .collect::<SecretResult<Vec<_>>>()?,
            ),
            Value::Bytes(bytes) => Self::Bytes(bytes.as_slice()),
            Value::Attributes(map) => Self::Attributes(map),
            Value::Properties(map) => {
                let mut properties = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let inner = match value {
                        Value::Variant(inner) => Self::new(inner)?,
                        other => Self::new(other)?,
                    };
                    properties.push((key.as_str(), inner.signature()?, inner));
                }
                Self::Properties(properties)
            }
            Value::Struct(fields) => Self::Struct(
                fields
                    .iter()
                    .map(Self::new)
                    .collect::<SecretResult<Vec<_>>>()?,
            ),
            Value::Variant(inner) => {
                let inner = Self::new(inner)?;
                Self::Variant(inner.signature()?, Box::new(inner))
            }
        })
    }

    fn signature(&self) -> SecretResult<Signature<'static>> {
        Signature::new(self.signature_str())
            .map_err(|e| SecretError::Protocol(format!("invalid argument signature: {e}")))
    }

    fn signature_str(&self) -> String {
        match self {
            Self::Bool(_) => "b".to_string(),
            Self::U64(_) => "t".to_string(),
            Self::Str(_) => "s".to_string(),
            Self::Path(_) => "o".to_string(),
            Self::Paths(_) => "ao".to_string(),
            Self::Bytes(_) => "ay".to_string(),
            Self::Attributes(_) => "a{ss}".to_string(),
            Self::Properties(_) => "a{sv}".to_string(),
            Self::Struct(fields) => {
                let inner: String = fields.iter().map(Self::signature_str).collect();
                format!("({inner})")
            }
            Self::Variant(..) => "v".to_string(),
        }
    }

    fn append(&self, ia: &mut IterAppend<'_>) {
        match self {
            Self::Bool(b) => ia.append(*b),
            Self::U64(n) => ia.append(*n),
            Self::Str(s) => ia.append(*s),
            Self::Path(p) => ia.append(p.clone()),
            Self::Paths(paths) => ia.append(&paths[..]),
            Self::Bytes(bytes) => ia.append(*bytes),
            Self::Attributes(map) => {
                let string = Signature::make::<String>();
                ia.append_dict(&string, &string, |dict| {
                    for (key, value) in *map {
                        dict.append_dict_entry(|entry| {
                            entry.append(key.as_str());
                            entry.append(value.as_str());
                        });
                    }
                });
            }
            Self::Properties(properties) => {
                let key = Signature::make::<String>();
                let variant = Signature::make::<Variant<bool>>();
                ia.append_dict(&key, &variant, |dict| {
                    for (name, signature, value) in properties {
                        dict.append_dict_entry(|entry| {
                            entry.append(*name);
                            entry.append_variant(signature, |inner| value.append(inner));
                        });
                    }
                });
            }
            Self::Struct(fields) => ia.append_struct(|fields_ia| {
                for field in fields {
                    field.append(fields_ia);
                }
            }),
            Self::Variant(signature, inner) => {
                ia.append_variant(signature, |inner_ia| inner.append(inner_ia));
            }
        }
    }
}

/// Encoded call arguments
struct Args<'a>(Vec<Encoded<'a>>);

impl AppendAll for Args<'_> {
    fn append(&self, ia: &mut IterAppend<'_>) {
        for arg in &self.0 {
            arg.append(ia);
        }
    }
}

/// Decoded reply values; decoding errors are kept for the caller
struct Replies(SecretResult<Vec<Value>>);

impl ReadAll for Replies {
    fn read(iter: &mut Iter<'_>) -> Result<Self, TypeMismatchError> {
        Ok(Self(read_all(iter)))
    }
}

fn dbus_path(path: &ObjectPath) -> SecretResult<dbus::Path<'static>> {
    dbus::Path::new(path.as_str().to_string())
        .map_err(|e| SecretError::Protocol(format!("invalid object path '{path}': {e}")))
}

fn mismatch(iter: &mut Iter<'_>) -> SecretError {
    SecretError::Protocol(format!("unsupported reply type '{}'", &*iter.signature()))
}

/// Reads every remaining argument of `iter`
fn read_all(iter: &mut Iter<'_>) -> SecretResult<Vec<Value>> {
    let mut values = Vec::new();
    while iter.arg_type() != ArgType::Invalid {
        values.push(read_value(iter)?);
        iter.next();
    }
    Ok(values)
}

/// Reads the argument under the cursor without advancing
fn read_value(iter: &mut Iter<'_>) -> SecretResult<Value> {
    let unsigned = |n: Option<i64>| n.and_then(|n| u64::try_from(n).ok()).map(Value::U64);
    let value = match iter.arg_type() {
        ArgType::Boolean => iter.get::<bool>().map(Value::Bool),
        ArgType::Byte => iter.get::<u8>().map(|n| Value::U64(n.into())),
        ArgType::UInt16 => iter.get::<u16>().map(|n| Value::U64(n.into())),
        ArgType::UInt32 => iter.get::<u32>().map(|n| Value::U64(n.into())),
        ArgType::UInt64 => iter.get::<u64>().map(Value::U64),
        ArgType::Int16 => unsigned(iter.get::<i16>().map(i64::from)),
        ArgType::Int32 => unsigned(iter.get::<i32>().map(i64::from)),
        ArgType::Int64 => unsigned(iter.get::<i64>()),
        ArgType::String => iter.get::<&str>().map(|s| Value::Str(s.to_string())),
        ArgType::Signature => iter
            .get::<Signature<'_>>()
            .map(|s| Value::Str((*s).to_string())),
        ArgType::ObjectPath => iter
            .get::<dbus::Path<'_>>()
            .map(|p| Value::Path(ObjectPath::new(&*p))),
        ArgType::Variant => match iter.recurse(ArgType::Variant) {
            Some(mut inner) => Some(Value::variant(read_value(&mut inner)?)),
            None => None,
        },
        ArgType::Struct => match iter.recurse(ArgType::Struct) {
            Some(mut fields) => Some(Value::Struct(read_all(&mut fields)?)),
            None => None,
        },
        ArgType::Array => return read_array(iter),
        _ => None,
    };
    value.ok_or_else(|| mismatch(iter))
}

fn read_array(iter: &mut Iter<'_>) -> SecretResult<Value> {
    let signature = iter.signature();

    // Borrowed from the message buffer; the only owned copy is zeroized.
    if &*signature == "ay" {
        let bytes = iter.get::<&[u8]>().ok_or_else(|| mismatch(iter))?;
        return Ok(Value::Bytes(Zeroizing::new(bytes.to_vec())));
    }

    let mut items = iter.recurse(ArgType::Array).ok_or_else(|| mismatch(iter))?;
    let value = match &*signature {
        "ao" => Value::Paths(
            read_all(&mut items)?
                .into_iter()
                .map(Value::into_path)
                .collect::<SecretResult<Vec<_>>>()?,
        ),
        "a{ss}" => Value::Attributes(
            read_entries(&mut items)?
                .into_iter()
                .map(|(key, value)| value.into_string().map(|value| (key, value)))
                .collect::<SecretResult<BTreeMap<_, _>>>()?,
        ),
        "a{sv}" => Value::Properties(
            read_entries(&mut items)?
                .into_iter()
                .map(|(key, value)| (key, value.unwrap_variant()))
                .collect(),
        ),
        _ => Value::Struct(read_all(&mut items)?),
    };
    Ok(value)
}

fn read_entries(items: &mut Iter<'_>) -> SecretResult<Vec<(String, Value)>> {
    let mut entries = Vec::new();
    while items.arg_type() == ArgType::DictEntry {
        let mut entry = items
            .recurse(ArgType::DictEntry)
            .ok_or_else(|| mismatch(items))?;
        let key = match entry.get::<&str>() {
            Some(key) => key.to_string(),
            None => return Err(mismatch(&mut entry)),
        };
        entry.next();
        entries.push((key, read_value(&mut entry)?));
        items.next();
    }
    Ok(entries)
}

/// Maps a bus error onto the crate's error categories
fn map_error(e: &dbus::Error) -> SecretError {
    let message = e.message().unwrap_or("no message").to_string();
    match e.name() {
        Some(name) if UNREACHABLE_ERRORS.contains(&name) => {
            SecretError::Transport(format!("{name}: {message}"))
        }
        Some("org.freedesktop.Secret.Error.IsLocked") => SecretError::SecretUnavailable(message),
        Some(
            "org.freedesktop.Secret.Error.NoSuchObject"
            | "org.freedesktop.DBus.Error.UnknownObject",
        ) => SecretError::NotFound(message),
        Some(name) => SecretError::Protocol(format!("{name}: {message}")),
        None => SecretError::Transport(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbus::Message;

    fn roundtrip(values: &[Value]) -> Vec<Value> {
        let encoded = values
            .iter()
            .map(Encoded::new)
            .collect::<SecretResult<Vec<_>>>()
            .unwrap();
        let mut msg = Message::new_method_call(
            "org.freedesktop.secrets",
            "/org/freedesktop/secrets",
            "org.freedesktop.Secret.Service",
            "Test",
        )
        .unwrap();
        Args(encoded).append(&mut IterAppend::new(&mut msg));
        read_all(&mut msg.iter_init()).unwrap()
    }

    #[test]
    fn maps_unreachable_service_to_transport() {
        let err = dbus::Error::new_custom("org.freedesktop.DBus.Error.ServiceUnknown", "gone");
        assert!(matches!(map_error(&err), SecretError::Transport(_)));
    }

    #[test]
    fn maps_secret_errors() {
        let locked = dbus::Error::new_custom("org.freedesktop.Secret.Error.IsLocked", "locked");
        assert!(matches!(map_error(&locked), SecretError::SecretUnavailable(_)));

        let missing = dbus::Error::new_custom("org.freedesktop.Secret.Error.NoSuchObject", "gone");
        assert!(map_error(&missing).is_not_found());

        let rejected = dbus::Error::new_custom("org.freedesktop.DBus.Error.NotSupported", "dh");
        assert!(matches!(map_error(&rejected), SecretError::Protocol(_)));
    }

    #[test]
    fn secret_struct_is_appended_from_borrowed_bytes() {
        let secret = Value::Struct(vec![
            Value::Path(ObjectPath::new("/org/freedesktop/secrets/session/s1")),
            Value::Bytes(Zeroizing::new(Vec::new())),
            Value::Bytes(Zeroizing::new(b"hunter2".to_vec())),
            Value::Str(String::new()),
        ]);
        let Value::Struct(fields) = &secret else {
            unreachable!()
        };
        let Value::Bytes(payload) = &fields[2] else {
            unreachable!()
        };

        let encoded = Encoded::new(&secret).unwrap();
        let Encoded::Struct(encoded_fields) = &encoded else {
            panic!("secret struct should encode as a struct");
        };
        let Encoded::Bytes(borrowed) = encoded_fields[2] else {
            panic!("secret payload should encode as a byte slice");
        };
        assert_eq!(borrowed.as_ptr(), payload.as_ptr());
        assert_eq!(encoded.signature_str(), "(oayays)");

        assert_eq!(roundtrip(std::slice::from_ref(&secret)), vec![secret]);
    }

    #[test]
    fn converts_maps() {
        let attributes = Value::Attributes(BTreeMap::from([
            ("Username".to_string(), "alice".to_string()),
            ("xdg:schema".to_string(), "org.freedesktop.default.Secret".to_string()),
        ]));
        let properties = Value::Properties(BTreeMap::from([(
            "org.freedesktop.Secret.Item.Label".to_string(),
            Value::Str("Mail".to_string()),
        )]));
        let values = vec![attributes, properties];
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn converts_scalars_paths_and_variants() {
        let values = vec![
            Value::Bool(true),
            Value::U64(1_700_000_000),
            Value::Paths(vec![
                ObjectPath::new("/org/freedesktop/secrets/collection/login"),
                ObjectPath::new("/org/freedesktop/secrets/collection/work"),
            ]),
            Value::variant(Value::Path(ObjectPath::none())),
        ];
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn rejects_malformed_paths() {
        let value = Value::Path(ObjectPath::new("not a path"));
        assert!(matches!(Encoded::new(&value), Err(SecretError::Protocol(_))));
    }
}
