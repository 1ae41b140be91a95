//! In-memory conversation store backed by a mutex-protected hash map.
//!
//! Each session owns a `tokio::sync::Mutex` so a dispatcher call can hold
//! the session exclusively across the transport await; the outer map lock
//! is a `parking_lot::Mutex` and is never held across an await point.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::dialog::{Role, Turn};
use crate::error::BridgeError;

/// Shared handle to one session's state. Locking the handle serializes
/// all mutation for that session.
pub type SessionHandle = Arc<tokio::sync::Mutex<SessionState>>;

/// The mutable state of one conversation session.
///
/// Invariant: `dialog[0]` is always the system turn and is never evicted.
#[derive(Debug)]
pub struct SessionState {
    session_id: String,
    dialog: Vec<Turn>,
    created_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
    message_count: u64,
}

impl SessionState {
    fn new(session_id: &str, system_instruction: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            dialog: vec![Turn::system(system_instruction)],
            created_at: now,
            last_access: now,
            message_count: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dialog(&self) -> &[Turn] {
        &self.dialog
    }

    /// The system instruction recorded when the session was created.
    pub fn system_instruction(&self) -> &str {
        &self.dialog[0].content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.last_access
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.dialog.push(Turn {
            role,
            content: content.into(),
        });
        self.message_count += 1;
        self.last_access = Utc::now();
    }

    /// Drop the oldest non-system turns until at most `2 * max_pairs`
    /// remain. Idempotent; never touches the system turn.
    pub fn trim(&mut self, max_history_pairs: Option<usize>) {
        let Some(max_pairs) = max_history_pairs else {
            return;
        };
        let keep = 2 * max_pairs;
        while self.dialog.len() - 1 > keep {
            self.dialog.remove(1);
        }
    }

    /// Reset the dialog to just the original system turn.
    pub fn clear(&mut self) {
        self.dialog.truncate(1);
        self.last_access = Utc::now();
    }
}

/// A point-in-time view of one session, for listings and logs.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub turns: usize,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// Owns every live session. Construct once at startup and share by `Arc`.
pub struct ConversationStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent lookup-or-create. The supplied instruction is only used
    /// when the session does not exist yet; first write wins.
    pub fn get_or_create(&self, session_id: &str, system_instruction: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock();
        if let Some(handle) = sessions.get(session_id) {
            return handle.clone();
        }
        tracing::info!(session_id, "created session");
        let handle: SessionHandle = Arc::new(tokio::sync::Mutex::new(SessionState::new(
            session_id,
            system_instruction,
        )));
        sessions.insert(session_id.to_string(), handle.clone());
        handle
    }

    /// Handle for an existing session, or `UnknownSession`.
    pub fn handle(&self, session_id: &str) -> Result<SessionHandle, BridgeError> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))
    }

    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), BridgeError> {
        let handle = self.handle(session_id)?;
        handle.lock().await.append(role, content);
        Ok(())
    }

    pub async fn trim(
        &self,
        session_id: &str,
        max_history_pairs: Option<usize>,
    ) -> Result<(), BridgeError> {
        let handle = self.handle(session_id)?;
        handle.lock().await.trim(max_history_pairs);
        Ok(())
    }

    pub async fn clear(&self, session_id: &str) -> Result<(), BridgeError> {
        let handle = self.handle(session_id)?;
        handle.lock().await.clear();
        Ok(())
    }

    /// Snapshot of a session's dialog.
    pub async fn dialog(&self, session_id: &str) -> Result<Vec<Turn>, BridgeError> {
        let handle = self.handle(session_id)?;
        let state = handle.lock().await;
        Ok(state.dialog().to_vec())
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self.sessions.lock().values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            let state = handle.lock().await;
            out.push(SessionSummary {
                session_id: state.session_id().to_string(),
                turns: state.dialog().len(),
                message_count: state.message_count(),
                created_at: state.created_at(),
                last_access: state.last_access(),
            });
        }
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
