use serde::{Deserialize, Serialize};

use super::media::MediaRef;

/// Kind of a message, as tagged by the external store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
    Emoji,
    Video,
    /// Rich link / file / quote cards
    App,
    System,
    Other(i64),
}

impl MessageKind {
    pub fn has_media(&self) -> bool {
        matches!(self, Self::Image | Self::Voice | Self::Emoji | Self::Video)
    }
}

/// Composite identity of a message record.
///
/// All four fields are compared together: `server_id` is frequently absent
/// and `create_time` has second granularity, so no single field is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    pub server_id: Option<i64>,
    pub local_id: i64,
    pub create_time: i64,
    pub sort_seq: i64,
}

/// Display order of messages: ascending by `(create_time, local_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageOrder {
    pub create_time: i64,
    pub local_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    /// Session-local monotonic id
    pub local_id: i64,
    /// Server-side id; `None` for messages the server never acknowledged
    pub server_id: Option<i64>,
    /// Session-scoped ordering key
    pub sort_seq: i64,
    /// Unix seconds
    pub create_time: i64,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: String,
    /// Primary media attachment
    pub payload: Option<MediaRef>,
    /// Image of the message this one quotes
    pub quoted: Option<MediaRef>,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            server_id: self.server_id.filter(|id| *id != 0),
            local_id: self.local_id,
            create_time: self.create_time,
            sort_seq: self.sort_seq,
        }
    }

    pub fn order(&self) -> MessageOrder {
        MessageOrder {
            create_time: self.create_time,
            local_id: self.local_id,
        }
    }

    /// Media references carried by this message, primary first
    pub fn media_refs(&self) -> impl Iterator<Item = &MediaRef> {
        self.payload.iter().chain(self.quoted.iter())
    }
}

/// One page returned by the message fetch collaborator, ascending within the page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}
