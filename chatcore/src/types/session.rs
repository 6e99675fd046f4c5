use serde::{Deserialize, Serialize};

/// One conversation thread as reported by the external store.
///
/// Identity is `id`. Every other field may be patched by a later
/// authoritative list without changing which row it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub id: String,
    pub display_name: String,
    /// Preview of the latest message
    pub summary: String,
    pub last_timestamp: i64,
    /// Ordering key used by the store (pinned chats sort above everything else)
    pub sort_timestamp: i64,
    pub unread_count: u32,
    pub avatar_ref: Option<String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Whether any field that affects how the row is displayed differs.
    ///
    /// `sort_timestamp` is not tracked; the incoming list order carries it.
    pub fn display_differs(&self, other: &Session) -> bool {
        self.summary != other.summary
            || self.last_timestamp != other.last_timestamp
            || self.unread_count != other.unread_count
            || self.display_name != other.display_name
            || self.avatar_ref != other.avatar_ref
    }

    /// Name to show, falling back to the raw id
    pub fn title(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_differs_ignores_sort_timestamp() {
        let a = Session {
            id: "a".into(),
            summary: "hi".into(),
            sort_timestamp: 1,
            ..Default::default()
        };
        let mut b = a.clone();
        b.sort_timestamp = 99;
        assert!(!a.display_differs(&b));

        b.unread_count = 3;
        assert!(a.display_differs(&b));
    }

    #[test]
    fn test_deserialize_camel_case_with_missing_fields() {
        let s: Session =
            serde_json::from_str(r#"{"id":"wxid_1","displayName":"Alice","unreadCount":2}"#)
                .unwrap();
        assert_eq!(s.id, "wxid_1");
        assert_eq!(s.title(), "Alice");
        assert_eq!(s.unread_count, 2);
        assert_eq!(s.avatar_ref, None);
        assert_eq!(Session::new("x").title(), "x");
    }
}
