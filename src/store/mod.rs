//! Per-session conversation state: dialog history with bounded trimming.

pub mod conversation;
pub mod dialog;

pub use conversation::{ConversationStore, SessionHandle, SessionState, SessionSummary};
pub use dialog::{Role, Turn};
