//! Media reference model.
//!
//! A [`MediaRef`] names a piece of encrypted media owned by the external
//! store. It never carries bytes; resolving it yields a local path. Every
//! reference maps to a content-addressed [`MediaKey`] that the caches use.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Media class. Each class has its own cache with its own capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaClass {
    Image,
    /// Thumbnail of an image shown inside a quote block
    QuotedImage,
    Video,
    Voice,
    /// Stickers, reused across many messages
    Emoji,
}

impl MediaClass {
    pub const ALL: [MediaClass; 5] = [
        MediaClass::Image,
        MediaClass::QuotedImage,
        MediaClass::Video,
        MediaClass::Voice,
        MediaClass::Emoji,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaClass::Image => "image",
            MediaClass::QuotedImage => "quoted_image",
            MediaClass::Video => "video",
            MediaClass::Voice => "voice",
            MediaClass::Emoji => "emoji",
        }
    }
}

impl fmt::Display for MediaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to encrypted media held by the external store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub class: MediaClass,
    pub session_id: String,
    pub local_id: i64,
    pub create_time: i64,
    /// Opaque locator understood by the backend (file md5, emoji md5, server media id)
    #[serde(default)]
    pub token: String,
}

impl MediaRef {
    pub fn new(
        class: MediaClass,
        session_id: impl Into<String>,
        local_id: i64,
        create_time: i64,
        token: impl Into<String>,
    ) -> Self {
        Self {
            class,
            session_id: session_id.into(),
            local_id,
            create_time,
            token: token.into(),
        }
    }

    /// Content-addressed cache key.
    ///
    /// Emoji are keyed by token alone since the same sticker is shared by
    /// every message that sends it. Everything else is scoped to the message.
    pub fn cache_key(&self) -> MediaKey {
        let mut hasher = Sha256::new();
        hasher.update(self.class.as_str().as_bytes());
        hasher.update([0u8]);
        if self.class != MediaClass::Emoji {
            hasher.update(self.session_id.as_bytes());
            hasher.update([0u8]);
            hasher.update(self.local_id.to_be_bytes());
            hasher.update(self.create_time.to_be_bytes());
        }
        hasher.update(self.token.as_bytes());
        MediaKey(hex::encode(hasher.finalize()))
    }
}

/// Lowercase hex SHA-256 identifying one resolvable media item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaKey(String);

impl MediaKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Answer of the video metadata collaborator.
///
/// `exists` may be false transiently, until the store has fetched the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoInfo {
    pub exists: bool,
    pub video_url: Option<String>,
    pub thumb_url: Option<String>,
}
