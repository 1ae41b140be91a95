//! Request dispatcher tying the pieces together.
//!
//! One inference call walks a fixed sequence: append the user turn, acquire
//! a gate permit, run the transport, append the assistant turn, trim the
//! window. The session lock is held across the whole sequence so concurrent
//! calls for the same session serialize and never interleave their turns.
//! On any failure the user turn stays in history; the caller may retry and
//! the model still sees what was asked.

use crate::error::BridgeError;
use crate::gate::ConcurrencyGate;
use crate::store::{ConversationStore, Role};
use crate::transport::{GenerationParams, InferenceRequest, InferenceTransport, Reply};
use std::sync::Arc;
use std::time::Duration;

/// Per-caller knobs. The web portal chats without tools and a deep window;
/// the maze game wants tools and a short window.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub use_tools: bool,
    /// Most recent user/assistant pairs to keep after this call. `None`
    /// leaves the window unbounded.
    pub max_history_pairs: Option<usize>,
}

pub struct Dispatcher {
    store: ConversationStore,
    gate: ConcurrencyGate,
    transport: Arc<dyn InferenceTransport>,
    gate_timeout: Duration,
    params: GenerationParams,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn InferenceTransport>,
        max_inflight: usize,
        gate_timeout: Duration,
        params: GenerationParams,
    ) -> Self {
        Self {
            store: ConversationStore::new(),
            gate: ConcurrencyGate::new(max_inflight),
            transport,
            gate_timeout,
            params,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Run one user message through the inference backend and record both
    /// sides of the exchange in the session history.
    ///
    /// The session is created on first use; the first system instruction
    /// wins and later calls with a different one are ignored.
    pub async fn process(
        &self,
        session_id: &str,
        system_instruction: &str,
        user_text: &str,
        options: &ChatOptions,
    ) -> Result<Reply, BridgeError> {
        let handle = self.store.get_or_create(session_id, system_instruction);
        let mut state = handle.lock().await;

        state.append(Role::User, user_text);

        let permit = match self.gate.acquire(self.gate_timeout).await {
            Ok(permit) => permit,
            Err(err) => {
                tracing::warn!(session_id, "gate acquisition failed: {err}");
                return Err(err);
            }
        };

        let request = InferenceRequest {
            session_id,
            dialog: state.dialog(),
            params: &self.params,
            use_tools: options.use_tools,
        };

        let reply = self.transport.complete(request).await;
        drop(permit);

        let reply = reply?;

        let assistant_text = match &reply.content {
            Some(content) => content.clone(),
            // Tool-only replies are recorded as their serialized calls so
            // the model sees what it did on the next turn.
            None => serde_json::to_string(&reply.function_calls).unwrap_or_default(),
        };
        state.append(Role::Assistant, &assistant_text);
        state.trim(options.max_history_pairs);

        tracing::debug!(
            session_id,
            turns = state.dialog().len(),
            transport = self.transport.name(),
            "exchange complete"
        );

        Ok(reply)
    }

    /// Reset a session back to its system turn.
    pub async fn clear_session(&self, session_id: &str) -> Result<(), BridgeError> {
        self.store.clear(session_id).await
    }
}
