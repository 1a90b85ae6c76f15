use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod docs;

pub use docs::*;

/// Lower bound for tag confidence. Decay never pushes a tag below this.
pub const CONFIDENCE_FLOOR: f64 = 0.1;
/// Upper bound for tag confidence.
pub const CONFIDENCE_CAP: f64 = 1.0;

/// Clamp a confidence value into the allowed [0.1, 1.0] band.
pub fn clamp_confidence(value: f64) -> f64 {
    value.clamp(CONFIDENCE_FLOOR, CONFIDENCE_CAP)
}

/// A single message ingested from a team channel.
///
/// Text and timestamp are immutable after ingestion; `tags`, `importance`
/// and `squad` are filled in by analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub squad: Option<String>,
}

impl Message {
    /// Stable message id derived from its channel and platform timestamp.
    pub fn derive_id(channel_id: &str, ts: &str) -> String {
        format!("{channel_id}-{ts}")
    }

    pub fn reaction_total(&self) -> usize {
        self.reactions.iter().map(|r| r.count).sum()
    }

    pub fn reaction_variety(&self) -> usize {
        self.reactions.len()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub name: String,
    pub count: usize,
    #[serde(default)]
    pub users: Vec<String>,
}

/// Author identity resolved from the message source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// Channel metadata from the message source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_count: usize,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    Keyword,
    Person,
    Squad,
    Custom,
}

/// A tag known to the system. Created lazily on first suggestion and
/// never deleted; only `confidence`, `usage_count` and `updated_at` mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub category: TagCategory,
    pub confidence: f64,
    #[serde(default)]
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(name: impl Into<String>, category: TagCategory, confidence: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category,
            confidence: clamp_confidence(confidence),
            usage_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only association between a message and a tag, recorded at
/// assignment time with the confidence it was assigned at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTag {
    pub message_id: String,
    pub tag_id: Uuid,
    pub confidence: f64,
    #[serde(default)]
    pub manual: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Positive,
    Negative,
    Correction,
}

/// A user correction or feedback event. Append-only, retained for metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRecord {
    pub id: Uuid,
    pub message_id: String,
    pub original_tags: Vec<String>,
    pub corrected_tags: Vec<String>,
    pub kind: FeedbackKind,
    pub weight: f64,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Static squad configuration. Hierarchy depth is capped at two levels:
/// a squad may have a parent, but never a grandparent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SquadConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub subsquads: Vec<String>,
}

/// One executive summary per (date, squad) key. Regeneration replaces the
/// entry under the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub sentiment: String,
    pub message_count: usize,
    #[serde(default)]
    pub squads_analyzed: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Summary {
    /// Storage key for a daily summary, optionally scoped to one squad.
    pub fn key(date: chrono::NaiveDate, squad: Option<&str>) -> String {
        match squad {
            Some(s) => format!("{date}_{s}"),
            None => date.to_string(),
        }
    }
}

/// Cached opaque payload. Expiration is decided at read time against
/// `cached_at`; nothing sweeps the collection in the background.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Parse a collaborator-supplied urgency, defaulting to `Medium` on
    /// anything unrecognized.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Announcement,
    Issue,
    Achievement,
    Decision,
    StatusUpdate,
    Discussion,
}

impl MessageType {
    /// Parse a collaborator-supplied message type, defaulting to
    /// `Discussion` on anything unrecognized.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "announcement" => Self::Announcement,
            "issue" => Self::Issue,
            "achievement" => Self::Achievement,
            "decision" => Self::Decision,
            "status-update" | "status_update" => Self::StatusUpdate,
            _ => Self::Discussion,
        }
    }
}

/// Tag name keyed map, re-used by several document shapes.
pub type TagMap = BTreeMap<String, Tag>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_is_stable() {
        assert_eq!(
            Message::derive_id("C042", "1712000000.000100"),
            "C042-1712000000.000100"
        );
    }

    #[test]
    fn clamp_confidence_bounds() {
        assert_eq!(clamp_confidence(0.0), 0.1);
        assert_eq!(clamp_confidence(0.55), 0.55);
        assert_eq!(clamp_confidence(1.7), 1.0);
    }

    #[test]
    fn tag_new_clamps_confidence() {
        let tag = Tag::new("deployment", TagCategory::Keyword, 1.4);
        assert_eq!(tag.confidence, 1.0);
        assert_eq!(tag.usage_count, 0);
    }

    #[test]
    fn urgency_parse_lenient_defaults_to_medium() {
        assert_eq!(Urgency::parse_lenient("critical"), Urgency::Critical);
        assert_eq!(Urgency::parse_lenient("HIGH"), Urgency::High);
        assert_eq!(Urgency::parse_lenient("whenever"), Urgency::Medium);
        assert_eq!(Urgency::parse_lenient(""), Urgency::Medium);
    }

    #[test]
    fn message_type_parse_lenient_defaults_to_discussion() {
        assert_eq!(
            MessageType::parse_lenient("status-update"),
            MessageType::StatusUpdate
        );
        assert_eq!(
            MessageType::parse_lenient("status_update"),
            MessageType::StatusUpdate
        );
        assert_eq!(MessageType::parse_lenient("??"), MessageType::Discussion);
    }

    #[test]
    fn summary_key_with_and_without_squad() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(Summary::key(date, None), "2025-06-01");
        assert_eq!(Summary::key(date, Some("epic")), "2025-06-01_epic");
    }

    #[test]
    fn message_counts() {
        let msg = Message {
            id: "C1-1".into(),
            channel_id: "C1".into(),
            user_id: "U1".into(),
            text: "one two three".into(),
            ts: Utc::now(),
            reactions: vec![
                Reaction {
                    name: "fire".into(),
                    count: 3,
                    users: vec![],
                },
                Reaction {
                    name: "eyes".into(),
                    count: 2,
                    users: vec![],
                },
            ],
            thread_ts: None,
            tags: vec![],
            importance: None,
            squad: None,
        };
        assert_eq!(msg.reaction_total(), 5);
        assert_eq!(msg.reaction_variety(), 2);
        assert_eq!(msg.word_count(), 3);
    }

    #[test]
    fn message_backward_compat_defaults() {
        let old_json = r#"{
            "id": "C1-1712000000.000100",
            "channelId": "C1",
            "userId": "U1",
            "text": "hello",
            "ts": "2025-04-01T12:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(old_json).unwrap();
        assert!(msg.reactions.is_empty());
        assert!(msg.tags.is_empty());
        assert!(msg.importance.is_none());
        assert!(msg.squad.is_none());
    }

    #[test]
    fn correction_record_serde_roundtrip() {
        let rec = CorrectionRecord {
            id: Uuid::new_v4(),
            message_id: "C1-1".into(),
            original_tags: vec!["deployment".into(), "noise".into()],
            corrected_tags: vec!["deployment".into()],
            kind: FeedbackKind::Correction,
            weight: 1.0,
            at: Utc::now(),
            actor: Some("U7".into()),
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"kind\":\"correction\""));
        let back: CorrectionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.original_tags.len(), 2);
        assert_eq!(back.corrected_tags, vec!["deployment".to_string()]);
    }
}
