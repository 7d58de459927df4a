//! Prompt coordinator
//!
//! When a service method cannot finish without user interaction it returns
//! the path of a prompt object. The coordinator shows the prompt and waits
//! for its `Completed` signal:
//!
//! ```text
//! NoPromptNeeded            (prompt path is "/")
//! AwaitingCompletion ──Completed(dismissed, result)──▶ Completed
//! ```
//!
//! The wait has no timeout of its own. Prompts are paced by the user, so
//! callers bound them with their own timeout or cancellation (for example
//! `tokio::time::timeout`). Dropping the future unsubscribes from the signal
//! and asks the service to dismiss the prompt.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::error::{SecretError, SecretResult};
use crate::tracing::span_names::PROMPT_DRIVE;
use crate::transport::{ObjectPath, RemoteObject, ReplyReader, SignalHandler, Transport, Value};

use super::SS_PROMPT_INTERFACE;

/// States of a prompt exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    /// The operation returned `/` as its prompt; nothing to wait for.
    NoPromptNeeded,
    /// The prompt is displayed and the coordinator waits for `Completed`.
    AwaitingCompletion,
    /// The `Completed` signal arrived.
    Completed,
}

/// Payload of the `Completed` signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCompletion {
    /// Whether the user dismissed the prompt
    pub dismissed: bool,
    /// Operation-specific result, such as the path of a created object
    pub result: Value,
}

impl PromptCompletion {
    fn from_signal(args: Vec<Value>) -> SecretResult<Self> {
        let mut reader = ReplyReader::new("Completed", args);
        let dismissed = reader.next()?.into_bool()?;
        let result = reader.next()?.unwrap_variant();
        Ok(Self { dismissed, result })
    }
}

/// Drives prompt objects to completion
#[derive(Clone)]
pub struct PromptCoordinator {
    transport: Arc<dyn Transport>,
    window_id: String,
}

impl PromptCoordinator {
    /// Creates a coordinator that parents prompts to `window_id`
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, window_id: impl Into<String>) -> Self {
        Self {
            transport,
            window_id: window_id.into(),
        }
    }

    /// Shows the prompt and waits for it to complete
    ///
    /// Returns `Ok(None)` when `prompt` is the `/` sentinel and
    /// `Ok(Some(result))` once the prompt completes.
    ///
    /// Exactly one subscription to `Completed` is made per call and it is
    /// removed on every exit path.
    ///
    /// # Errors
    /// Returns `SecretError::UserCancelled` if the user dismissed the prompt,
    /// and propagates transport and protocol failures unchanged.
    #[instrument(name = PROMPT_DRIVE, skip(self, prompt), fields(prompt = %prompt))]
    pub async fn drive(&self, prompt: &ObjectPath) -> SecretResult<Option<Value>> {
        if prompt.is_none() {
            debug!(state = ?PromptState::NoPromptNeeded, "No prompt needed");
            return Ok(None);
        }

        let proxy = RemoteObject::new(
            Arc::clone(&self.transport),
            prompt.clone(),
            SS_PROMPT_INTERFACE,
        );

        let (tx, rx) = oneshot::channel::<SecretResult<PromptCompletion>>();
        let tx = Mutex::new(Some(tx));
        let handler: SignalHandler = Box::new(move |args| {
            let sender = tx.lock().ok().and_then(|mut slot| slot.take());
            if let Some(sender) = sender {
                let _ = sender.send(PromptCompletion::from_signal(args));
            }
        });

        // Subscribe before showing the prompt so a fast completion is not lost.
        let subscription = proxy.subscribe("Completed", handler).await?;
        let mut pending = DismissOnDrop::new(proxy.clone());

        if let Err(e) = proxy.call("Prompt", vec![Value::Str(self.window_id.clone())]).await {
            pending.disarm();
            return Err(e);
        }
        debug!(state = ?PromptState::AwaitingCompletion, "Prompt displayed");

        let completion = rx.await;
        pending.disarm();
        subscription.unsubscribe();

        let completion = completion.map_err(|_| {
            SecretError::Transport("prompt completion signal was lost".to_string())
        })??;
        debug!(
            state = ?PromptState::Completed,
            dismissed = completion.dismissed,
            "Prompt completed"
        );

        if completion.dismissed {
            warn!("Prompt dismissed by the user");
            return Err(SecretError::UserCancelled);
        }
        Ok(Some(completion.result))
    }
}

impl std::fmt::Debug for PromptCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptCoordinator")
            .field("window_id", &self.window_id)
            .finish_non_exhaustive()
    }
}

/// Dismisses a still-displayed prompt if the wait is abandoned
struct DismissOnDrop {
    prompt: Option<RemoteObject>,
}

impl DismissOnDrop {
    const fn new(prompt: RemoteObject) -> Self {
        Self {
            prompt: Some(prompt),
        }
    }

    fn disarm(&mut self) {
        self.prompt = None;
    }
}

impl Drop for DismissOnDrop {
    fn drop(&mut self) {
        let Some(prompt) = self.prompt.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(prompt = %prompt.path(), "Dismissing abandoned prompt");
                handle.spawn(async move {
                    if let Err(e) = prompt.call("Dismiss", Vec::new()).await {
                        debug!(error = %e, "Failed to dismiss abandoned prompt");
                    }
                });
            }
            Err(_) => warn!(prompt = %prompt.path(), "Abandoned prompt left open: no runtime"),
        }
    }
}
