//! Snapshot shapes for the seven stored document collections.
//!
//! Each collection persists as one JSON document; these are the `data`
//! payloads the storage layer wraps with a `lastUpdated` stamp. Every
//! shape has a `Default` that doubles as the seed for a missing or
//! unreadable file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    CacheEntry, ChannelInfo, CorrectionRecord, Message, MessageTag, Summary, TagMap, UserProfile,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesDoc {
    /// Messages keyed by derived id; re-ingestion dedups on the key.
    #[serde(default)]
    pub messages: BTreeMap<String, Message>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersDoc {
    #[serde(default)]
    pub users: BTreeMap<String, UserProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsDoc {
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagsDoc {
    /// Tags keyed by name; names are unique by construction.
    #[serde(default)]
    pub tags: TagMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummariesDoc {
    /// Summaries keyed by `Summary::key(date, squad)`.
    #[serde(default)]
    pub summaries: BTreeMap<String, Summary>,
}

/// Corrections and tag associations share a collection: both are
/// append-only learning inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningDoc {
    #[serde(default)]
    pub associations: Vec<MessageTag>,
    #[serde(default)]
    pub corrections: Vec<CorrectionRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDoc {
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_empty() {
        assert!(MessagesDoc::default().messages.is_empty());
        assert!(TagsDoc::default().tags.is_empty());
        assert!(LearningDoc::default().corrections.is_empty());
        assert!(CacheDoc::default().entries.is_empty());
    }

    #[test]
    fn learning_doc_tolerates_partial_json() {
        let doc: LearningDoc = serde_json::from_str(r#"{"associations": []}"#).unwrap();
        assert!(doc.corrections.is_empty());
    }
}
