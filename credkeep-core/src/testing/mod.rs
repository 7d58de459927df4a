//! In-memory Secret Service for tests.
//!
//! `MockSecretService` implements [`Transport`] by interpreting the Secret
//! Service methods itself: collections, items, sessions and prompts live in
//! process memory. Prompts can be configured to complete, be dismissed by
//! the "user", or never answer, so every path of the protocol engine can be
//! exercised without a session bus.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::{SecretError, SecretResult};
use crate::service::{
    ALGORITHM_PLAIN, SS_COLLECTION_INTERFACE, SS_COLLECTION_LABEL, SS_DBUS_PATH,
    SS_ITEM_ATTRIBUTES, SS_ITEM_INTERFACE, SS_ITEM_LABEL, SS_PROMPT_INTERFACE,
    SS_SERVICE_INTERFACE, SS_SESSION_INTERFACE,
};
use crate::transport::{ObjectPath, ReplyReader, SignalHandler, Transport, Unsubscribe, Value};

/// First modification timestamp handed out by the mock clock
pub const MOCK_EPOCH: u64 = 1_700_000_000;

/// How a simulated prompt reacts to `Prompt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptBehavior {
    /// The user accepts; the pending operation runs and `Completed` fires
    Complete,
    /// The user dismisses the prompt
    Dismiss,
    /// The prompt never answers
    Hang,
}

/// Operations that can be configured to require a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTrigger {
    /// `Service.CreateCollection`
    CreateCollection,
    /// `Collection.CreateItem`
    CreateItem,
    /// `Item.Delete`
    DeleteItem,
    /// `Service.Unlock`
    Unlock,
}

struct MockCollection {
    path: ObjectPath,
    label: String,
    locked: bool,
}

struct MockItem {
    collection: ObjectPath,
    label: String,
    attributes: BTreeMap<String, String>,
    secret: Zeroizing<Vec<u8>>,
    content_type: String,
    created: u64,
    modified: u64,
    locked: bool,
}

struct NewItem {
    collection: ObjectPath,
    label: String,
    attributes: BTreeMap<String, String>,
    secret: Zeroizing<Vec<u8>>,
    content_type: String,
    replace: bool,
}

enum PendingAction {
    CreateCollection(String),
    CreateItem(NewItem),
    DeleteItem(ObjectPath),
    Unlock(Vec<ObjectPath>),
    Fixed(Value),
}

struct MockPrompt {
    behavior: PromptBehavior,
    action: PendingAction,
}

struct MockSubscription {
    object: ObjectPath,
    signal: String,
    handler: Arc<dyn Fn(Vec<Value>) + Send + Sync>,
}

#[derive(Default)]
struct State {
    collections: Vec<MockCollection>,
    items: BTreeMap<ObjectPath, MockItem>,
    item_order: Vec<ObjectPath>,
    sessions: HashSet<ObjectPath>,
    prompts: HashMap<ObjectPath, MockPrompt>,
    subscriptions: HashMap<u64, MockSubscription>,
    triggers: HashMap<PromptTrigger, PromptBehavior>,
    next_id: u64,
    clock: u64,
    unreachable: bool,
    reject_plain: bool,
    refuse_unlock: bool,
    subscriptions_made: usize,
    dismissed_prompts: usize,
    calls: Vec<String>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn tick(&mut self) -> u64 {
        let now = MOCK_EPOCH + self.clock;
        self.clock += 1;
        now
    }

    fn collection_mut(&mut self, path: &ObjectPath) -> SecretResult<&mut MockCollection> {
        self.collections
            .iter_mut()
            .find(|c| &c.path == path)
            .ok_or_else(|| SecretError::NotFound(path.to_string()))
    }

    fn collection(&self, path: &ObjectPath) -> SecretResult<&MockCollection> {
        self.collections
            .iter()
            .find(|c| &c.path == path)
            .ok_or_else(|| SecretError::NotFound(path.to_string()))
    }

    fn item(&self, path: &ObjectPath) -> SecretResult<&MockItem> {
        self.items
            .get(path)
            .ok_or_else(|| SecretError::NotFound(path.to_string()))
    }

    fn items_in(&self, collection: &ObjectPath) -> Vec<ObjectPath> {
        self.item_order
            .iter()
            .filter(|p| self.items.get(*p).is_some_and(|i| &i.collection == collection))
            .cloned()
            .collect()
    }

    fn create_collection(&mut self, label: &str) -> ObjectPath {
        let slug: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let mut path = ObjectPath::new(format!("{SS_DBUS_PATH}/collection/{slug}"));
        while self.collections.iter().any(|c| c.path == path) {
            let n = self.next_id();
            path = ObjectPath::new(format!("{SS_DBUS_PATH}/collection/{slug}{n}"));
        }
        self.collections.push(MockCollection {
            path: path.clone(),
            label: label.to_string(),
            locked: false,
        });
        path
    }

    fn create_item(&mut self, new: NewItem) -> SecretResult<ObjectPath> {
        if self.collection(&new.collection)?.locked {
            return Err(SecretError::SecretUnavailable(new.collection.to_string()));
        }
        let now = self.tick();
        if new.replace {
            let existing = self.items_in(&new.collection).into_iter().find(|p| {
                self.items
                    .get(p)
                    .is_some_and(|i| i.attributes == new.attributes)
            });
            if let Some(path) = existing {
                if let Some(item) = self.items.get_mut(&path) {
                    item.label = new.label;
                    item.secret = new.secret;
                    item.content_type = new.content_type;
                    item.modified = now;
                }
                return Ok(path);
            }
        }
        let n = self.next_id();
        let path = ObjectPath::new(format!("{}/{n}", new.collection));
        self.items.insert(
            path.clone(),
            MockItem {
                collection: new.collection,
                label: new.label,
                attributes: new.attributes,
                secret: new.secret,
                content_type: new.content_type,
                created: now,
                modified: now,
                locked: false,
            },
        );
        self.item_order.push(path.clone());
        Ok(path)
    }

    fn delete_item(&mut self, path: &ObjectPath) {
        self.items.remove(path);
        self.item_order.retain(|p| p != path);
    }

    fn unlock(&mut self, objects: &[ObjectPath]) -> Vec<ObjectPath> {
        for path in objects {
            if let Some(c) = self.collections.iter_mut().find(|c| &c.path == path) {
                c.locked = false;
            }
            if let Some(item) = self.items.get_mut(path) {
                item.locked = false;
            }
        }
        objects.to_vec()
    }

    fn run(&mut self, action: PendingAction) -> Value {
        match action {
            PendingAction::CreateCollection(label) => Value::Path(self.create_collection(&label)),
            PendingAction::CreateItem(new) => {
                Value::Path(self.create_item(new).unwrap_or_else(|_| ObjectPath::none()))
            }
            PendingAction::DeleteItem(path) => {
                self.delete_item(&path);
                Value::Str(String::new())
            }
            PendingAction::Unlock(objects) => Value::Paths(self.unlock(&objects)),
            PendingAction::Fixed(value) => value,
        }
    }

    fn add_prompt(&mut self, behavior: PromptBehavior, action: PendingAction) -> ObjectPath {
        let n = self.next_id();
        let path = ObjectPath::new(format!("{SS_DBUS_PATH}/prompt/p{n}"));
        self.prompts
            .insert(path.clone(), MockPrompt { behavior, action });
        path
    }

    /// Returns the prompt path to hand back, or `None` to finish directly
    fn maybe_prompt(
        &mut self,
        trigger: PromptTrigger,
        action: impl FnOnce() -> PendingAction,
    ) -> Option<ObjectPath> {
        let behavior = *self.triggers.get(&trigger)?;
        Some(self.add_prompt(behavior, action()))
    }

    fn handlers_for(
        &self,
        object: &ObjectPath,
        signal: &str,
    ) -> Vec<Arc<dyn Fn(Vec<Value>) + Send + Sync>> {
        self.subscriptions
            .values()
            .filter(|s| &s.object == object && s.signal == signal)
            .map(|s| Arc::clone(&s.handler))
            .collect()
    }
}

/// In-memory Secret Service implementing [`Transport`]
#[derive(Clone, Default)]
pub struct MockSecretService {
    state: Arc<Mutex<State>>,
}

impl MockSecretService {
    /// Creates a service with no collections
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an unlocked collection labeled `label`
    #[must_use]
    pub fn with_collection(self, label: &str) -> Self {
        self.state().create_collection(label);
        self
    }

    /// Adds a locked collection labeled `label`
    #[must_use]
    pub fn with_locked_collection(self, label: &str) -> Self {
        {
            let mut state = self.state();
            let path = state.create_collection(label);
            if let Ok(c) = state.collection_mut(&path) {
                c.locked = true;
            }
        }
        self
    }

    /// Makes every call fail as if the bus endpoint were gone
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Makes `OpenSession` reject the `plain` algorithm
    pub fn reject_plain_sessions(&self, reject: bool) {
        self.state().reject_plain = reject;
    }

    /// Makes `Unlock` finish without a prompt while unlocking nothing
    pub fn refuse_unlock(&self, refuse: bool) {
        self.state().refuse_unlock = refuse;
    }

    /// Requires a prompt with the given behavior for `trigger`
    pub fn prompt_for(&self, trigger: PromptTrigger, behavior: PromptBehavior) {
        self.state().triggers.insert(trigger, behavior);
    }

    /// Stops requiring a prompt for `trigger`
    pub fn clear_prompt(&self, trigger: PromptTrigger) {
        self.state().triggers.remove(&trigger);
    }

    /// Registers a standalone prompt that yields `result` when completed
    pub fn register_prompt(&self, behavior: PromptBehavior, result: Value) -> ObjectPath {
        self.state()
            .add_prompt(behavior, PendingAction::Fixed(result))
    }

    /// Inserts an item directly, bypassing replace semantics
    ///
    /// Returns `None` if no collection has the given label.
    pub fn insert_item(
        &self,
        collection_label: &str,
        label: &str,
        attributes: &[(&str, &str)],
        secret: &[u8],
    ) -> Option<ObjectPath> {
        let mut state = self.state();
        let collection = state
            .collections
            .iter()
            .find(|c| c.label == collection_label)?
            .path
            .clone();
        state
            .create_item(NewItem {
                collection,
                label: label.to_string(),
                attributes: attributes
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                secret: Zeroizing::new(secret.to_vec()),
                content_type: "text/plain".to_string(),
                replace: false,
            })
            .ok()
    }

    /// Locks a single item
    pub fn lock_item(&self, path: &ObjectPath) {
        if let Some(item) = self.state().items.get_mut(path) {
            item.locked = true;
        }
    }

    /// Locks a collection by label
    pub fn lock_collection(&self, label: &str) {
        if let Some(c) = self
            .state()
            .collections
            .iter_mut()
            .find(|c| c.label == label)
        {
            c.locked = true;
        }
    }

    /// Returns whether the collection with `label` is locked
    pub fn is_collection_locked(&self, label: &str) -> Option<bool> {
        self.state()
            .collections
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.locked)
    }

    /// Path of the first collection labeled `label`
    pub fn collection_path(&self, label: &str) -> Option<ObjectPath> {
        self.state()
            .collections
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.path.clone())
    }

    /// Number of collections
    pub fn collection_count(&self) -> usize {
        self.state().collections.len()
    }

    /// Number of items in the collection labeled `label`
    pub fn item_count(&self, label: &str) -> usize {
        let state = self.state();
        state
            .collections
            .iter()
            .find(|c| c.label == label)
            .map_or(0, |c| state.items_in(&c.path).len())
    }

    /// Sessions opened and not yet closed
    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    /// Signal subscriptions made so far
    pub fn subscriptions_made(&self) -> usize {
        self.state().subscriptions_made
    }

    /// Signal subscriptions still registered
    pub fn active_subscriptions(&self) -> usize {
        self.state().subscriptions.len()
    }

    /// Prompts dismissed through `Prompt.Dismiss`
    pub fn dismissed_prompts(&self) -> usize {
        self.state().dismissed_prompts
    }

    /// Number of calls made to `method` on any interface
    pub fn call_count(&self, method: &str) -> usize {
        self.state().calls.iter().filter(|m| *m == method).count()
    }

    fn check_reachable(state: &State) -> SecretResult<()> {
        if state.unreachable {
            return Err(SecretError::Transport(
                "org.freedesktop.DBus.Error.ServiceUnknown: no secret service running".to_string(),
            ));
        }
        Ok(())
    }

    fn emit(&self, object: &ObjectPath, signal: &str, args: &[Value]) {
        let handlers = self.state().handlers_for(object, signal);
        for handler in handlers {
            handler(args.to_vec());
        }
    }

    fn completed(&self, prompt: &ObjectPath, dismissed: bool, result: Value) {
        self.emit(
            prompt,
            "Completed",
            &[Value::Bool(dismissed), Value::variant(result)],
        );
    }

    fn dispatch(
        &self,
        object: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> SecretResult<Vec<Value>> {
        let mut state = self.state();
        Self::check_reachable(&state)?;
        state.calls.push(method.to_string());
        let mut args = ReplyReader::new("request", args);

        match (interface, method) {
            (SS_SERVICE_INTERFACE, "OpenSession") => {
                let algorithm = args.next()?.into_string()?;
                if algorithm != ALGORITHM_PLAIN || state.reject_plain {
                    return Err(SecretError::Protocol(format!(
                        "org.freedesktop.DBus.Error.NotSupported: algorithm '{algorithm}'"
                    )));
                }
                let n = state.next_id();
                let session = ObjectPath::new(format!("{SS_DBUS_PATH}/session/s{n}"));
                state.sessions.insert(session.clone());
                Ok(vec![
                    Value::variant(Value::Str(String::new())),
                    Value::Path(session),
                ])
            }
            (SS_SESSION_INTERFACE, "Close") => {
                state.sessions.remove(object);
                Ok(Vec::new())
            }
            (SS_SERVICE_INTERFACE, "CreateCollection") => {
                let mut props = properties(args.next()?)?;
                let label = props
                    .remove(SS_COLLECTION_LABEL)
                    .map(Value::into_string)
                    .transpose()?
                    .unwrap_or_default();
                if let Some(prompt) = state.maybe_prompt(PromptTrigger::CreateCollection, || {
                    PendingAction::CreateCollection(label.clone())
                }) {
                    return Ok(vec![Value::Path(ObjectPath::none()), Value::Path(prompt)]);
                }
                let path = state.create_collection(&label);
                Ok(vec![Value::Path(path), Value::Path(ObjectPath::none())])
            }
            (SS_SERVICE_INTERFACE, "Unlock") => {
                let objects = args.next()?.into_paths()?;
                if let Some(prompt) = state.maybe_prompt(PromptTrigger::Unlock, || {
                    PendingAction::Unlock(objects.clone())
                }) {
                    return Ok(vec![Value::Paths(Vec::new()), Value::Path(prompt)]);
                }
                if state.refuse_unlock {
                    return Ok(vec![Value::Paths(Vec::new()), Value::Path(ObjectPath::none())]);
                }
                let unlocked = state.unlock(&objects);
                Ok(vec![Value::Paths(unlocked), Value::Path(ObjectPath::none())])
            }
            (SS_COLLECTION_INTERFACE, "SearchItems") => {
                let wanted = args.next()?.into_attributes()?;
                state.collection(object)?;
                let found = state
                    .items_in(object)
                    .into_iter()
                    .filter(|p| {
                        state.items.get(p).is_some_and(|i| {
                            wanted.iter().all(|(k, v)| i.attributes.get(k) == Some(v))
                        })
                    })
                    .collect();
                Ok(vec![Value::Paths(found)])
            }
            (SS_COLLECTION_INTERFACE, "CreateItem") => {
                let mut props = properties(args.next()?)?;
                let mut secret = ReplyReader::new("Secret", args.next()?.into_struct()?);
                let replace = args.next()?.into_bool()?;

                let session = secret.next()?.into_path()?;
                if !state.sessions.contains(&session) {
                    return Err(SecretError::Protocol(format!(
                        "org.freedesktop.Secret.Error.NoSession: {session}"
                    )));
                }
                let _parameters = secret.next()?.into_bytes()?;
                let value = secret.next()?.into_bytes()?;
                let content_type = secret.next()?.into_string()?;
                let label = props
                    .remove(SS_ITEM_LABEL)
                    .map(Value::into_string)
                    .transpose()?
                    .unwrap_or_default();
                let attributes = props
                    .remove(SS_ITEM_ATTRIBUTES)
                    .map(Value::into_attributes)
                    .transpose()?
                    .unwrap_or_default();
                let new = NewItem {
                    collection: object.clone(),
                    label,
                    attributes,
                    secret: value,
                    content_type,
                    replace,
                };

                if let Some(behavior) = state.triggers.get(&PromptTrigger::CreateItem).copied() {
                    let prompt = state.add_prompt(behavior, PendingAction::CreateItem(new));
                    return Ok(vec![Value::Path(ObjectPath::none()), Value::Path(prompt)]);
                }
                let path = state.create_item(new)?;
                Ok(vec![Value::Path(path), Value::Path(ObjectPath::none())])
            }
            (SS_ITEM_INTERFACE, "Delete") => {
                state.item(object)?;
                let path = object.clone();
                if let Some(prompt) = state.maybe_prompt(PromptTrigger::DeleteItem, || {
                    PendingAction::DeleteItem(path)
                }) {
                    return Ok(vec![Value::Path(prompt)]);
                }
                state.delete_item(object);
                Ok(vec![Value::Path(ObjectPath::none())])
            }
            (SS_ITEM_INTERFACE, "GetSecret") => {
                let session = args.next()?.into_path()?;
                if !state.sessions.contains(&session) {
                    return Err(SecretError::Protocol(format!(
                        "org.freedesktop.Secret.Error.NoSession: {session}"
                    )));
                }
                let item = state.item(object)?;
                if item.locked {
                    return Err(SecretError::SecretUnavailable(object.to_string()));
                }
                Ok(vec![Value::Struct(vec![
                    Value::Path(session),
                    Value::Bytes(Zeroizing::new(Vec::new())),
                    Value::Bytes(item.secret.clone()),
                    Value::Str(item.content_type.clone()),
                ])])
            }
            (SS_PROMPT_INTERFACE, "Prompt") => {
                let prompt = state
                    .prompts
                    .remove(object)
                    .ok_or_else(|| SecretError::NotFound(object.to_string()))?;
                match prompt.behavior {
                    PromptBehavior::Complete => {
                        let result = state.run(prompt.action);
                        drop(state);
                        self.completed(object, false, result);
                    }
                    PromptBehavior::Dismiss => {
                        drop(state);
                        self.completed(object, true, Value::Str(String::new()));
                    }
                    PromptBehavior::Hang => {
                        state.prompts.insert(object.clone(), prompt);
                    }
                }
                Ok(Vec::new())
            }
            (SS_PROMPT_INTERFACE, "Dismiss") => {
                state.prompts.remove(object);
                state.dismissed_prompts += 1;
                drop(state);
                self.completed(object, true, Value::Str(String::new()));
                Ok(Vec::new())
            }
            _ => Err(SecretError::Protocol(format!(
                "org.freedesktop.DBus.Error.UnknownMethod: {interface}.{method}"
            ))),
        }
    }

    fn property(&self, object: &ObjectPath, interface: &str, name: &str) -> SecretResult<Value> {
        let state = self.state();
        Self::check_reachable(&state)?;

        match (interface, name) {
            (SS_SERVICE_INTERFACE, "Collections") => Ok(Value::Paths(
                state.collections.iter().map(|c| c.path.clone()).collect(),
            )),
            (SS_COLLECTION_INTERFACE, "Items") => {
                state.collection(object)?;
                Ok(Value::Paths(state.items_in(object)))
            }
            (SS_COLLECTION_INTERFACE, "Label") => {
                Ok(Value::Str(state.collection(object)?.label.clone()))
            }
            (SS_COLLECTION_INTERFACE, "Locked") => {
                Ok(Value::Bool(state.collection(object)?.locked))
            }
            (SS_ITEM_INTERFACE, "Label") => Ok(Value::Str(state.item(object)?.label.clone())),
            (SS_ITEM_INTERFACE, "Attributes") => {
                Ok(Value::Attributes(state.item(object)?.attributes.clone()))
            }
            (SS_ITEM_INTERFACE, "Locked") => Ok(Value::Bool(state.item(object)?.locked)),
            (SS_ITEM_INTERFACE, "Created") => Ok(Value::U64(state.item(object)?.created)),
            (SS_ITEM_INTERFACE, "Modified") => Ok(Value::U64(state.item(object)?.modified)),
            _ => Err(SecretError::Protocol(format!(
                "org.freedesktop.DBus.Error.UnknownProperty: {interface}.{name}"
            ))),
        }
    }
}

fn properties(value: Value) -> SecretResult<BTreeMap<String, Value>> {
    match value.unwrap_variant() {
        Value::Properties(props) => Ok(props),
        _ => Err(SecretError::Protocol("expected property map".to_string())),
    }
}

#[async_trait]
impl Transport for MockSecretService {
    async fn call(
        &self,
        object: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> SecretResult<Vec<Value>> {
        self.dispatch(object, interface, method, args)
    }

    async fn get_property(
        &self,
        object: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> SecretResult<Value> {
        self.property(object, interface, name)
    }

    async fn subscribe(
        &self,
        object: &ObjectPath,
        interface: &str,
        signal: &str,
        handler: SignalHandler,
    ) -> SecretResult<Unsubscribe> {
        let mut state = self.state();
        Self::check_reachable(&state)?;
        if interface != SS_PROMPT_INTERFACE {
            return Err(SecretError::Protocol(format!(
                "no signals mocked on {interface}"
            )));
        }
        let id = state.next_id();
        state.subscriptions.insert(
            id,
            MockSubscription {
                object: object.clone(),
                signal: signal.to_string(),
                handler: Arc::from(handler),
            },
        );
        state.subscriptions_made += 1;

        let shared = Arc::clone(&self.state);
        Ok(Unsubscribe::new(move || {
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscriptions
                .remove(&id);
        }))
    }
}
