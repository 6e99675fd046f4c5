use serde::{Deserialize, Serialize};

use super::{Message, Session};

/// The external store appended messages to a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessages {
    pub session_id: String,
    pub messages: Vec<Message>,
}

/// Background sync tick: the full, authoritative session list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDeltas {
    pub sessions: Vec<Session>,
}

/// A push event as seen by the engine, whichever channel it arrived on
#[derive(Debug, Clone)]
pub enum PushEvent {
    NewMessages(std::sync::Arc<NewMessages>),
    SessionDeltas(std::sync::Arc<SessionDeltas>),
}
