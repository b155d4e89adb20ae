//! Highlight: the item type flowing through the poller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
}

/// A single highlight as returned by the Readwise v2 API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: u64,
    pub text: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub location: Option<i64>,
    #[serde(default)]
    pub location_type: Option<String>, // "page" | "order" | "time_offset" | ...
    #[serde(default)]
    pub highlighted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub book_id: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Highlight {
    /// The timestamp this highlight contributes to the progress marker.
    pub fn progress_at(&self) -> Option<DateTime<Utc>> {
        self.updated.or(self.highlighted_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deserialize_api_payload() {
        let raw = r#"{
            "id": 59758950,
            "text": "The fox jumped over the fence.",
            "note": "",
            "location": 1,
            "location_type": "order",
            "highlighted_at": null,
            "url": null,
            "color": "yellow",
            "updated": "2020-10-01T17:47:31.234826Z",
            "book_id": 5767700,
            "tags": [{"id": 1, "name": "favorite"}]
        }"#;

        let h: Highlight = serde_json::from_str(raw).unwrap();
        assert_eq!(h.id, 59758950);
        assert_eq!(h.book_id, Some(5767700));
        assert_eq!(h.tags.len(), 1);
        assert!(h.highlighted_at.is_none());
        assert!(h.updated.is_some());
    }

    #[test]
    fn test_progress_prefers_updated() {
        let highlighted = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let updated = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut h: Highlight = serde_json::from_str(r#"{"id": 1, "text": "x"}"#).unwrap();
        assert_eq!(h.progress_at(), None);

        h.highlighted_at = Some(highlighted);
        assert_eq!(h.progress_at(), Some(highlighted));

        h.updated = Some(updated);
        assert_eq!(h.progress_at(), Some(updated));
    }
}
