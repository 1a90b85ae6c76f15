//! Tag confidence learning from corrections and feedback.
//!
//! Every event is recorded append-only and applied to the tag catalog as
//! a multiplicative adjustment, clamped into the allowed confidence band.
//! Nothing here ever deletes a tag.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use teampulse_schema::{
    clamp_confidence, CorrectionRecord, FeedbackKind, Message, Tag, TagCategory,
};
use teampulse_store::StorageContext;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Event weight for an explicit tag-set correction.
pub const CORRECTION_WEIGHT: f64 = 1.0;
/// Event weight for thumbs-style feedback.
pub const FEEDBACK_WEIGHT: f64 = 0.5;
/// Confidence assigned to a tag first seen through a correction.
pub const BASELINE_CONFIDENCE: f64 = 0.5;
/// Stored tags at or below this confidence are dropped from improved
/// suggestions.
pub const WEAK_TAG_THRESHOLD: f64 = 0.3;

const REMOVED_FACTOR: f64 = 0.9;
const KEPT_FACTOR: f64 = 1.1;
const ADDED_FACTOR: f64 = 1.2;
const POSITIVE_FACTOR: f64 = 1.05;
const NEGATIVE_FACTOR: f64 = 0.95;
const TOP_REMOVED_LIMIT: usize = 10;

/// Contextual tag hints: a keyword found in the message text or channel
/// name implies the associated tag.
const CONTEXT_HINTS: &[(&str, &str)] = &[
    ("deploy", "deployment"),
    ("release", "release"),
    ("bug", "bug"),
    ("incident", "incident"),
    ("outage", "incident"),
    ("design", "design"),
    ("meeting", "meeting"),
    ("security", "security"),
    ("payment", "payments"),
    ("billing", "payments"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct LearningMetrics {
    pub total_corrections: usize,
    /// Most frequently removed tags, capped at ten, count descending.
    pub top_removed: Vec<(String, usize)>,
    pub positive_feedback: usize,
    pub negative_feedback: usize,
}

pub struct LearningEngine {
    store: Arc<StorageContext>,
}

impl LearningEngine {
    pub fn new(store: Arc<StorageContext>) -> Self {
        Self { store }
    }

    /// Apply a full tag-set correction for one message.
    ///
    /// Removed tags decay, kept tags reinforce, newly added tags get a
    /// baseline entry boosted once. Returns the stored record.
    pub async fn record_correction(
        &self,
        message_id: &str,
        original_tags: &[String],
        corrected_tags: &[String],
        actor: Option<&str>,
    ) -> CoreResult<CorrectionRecord> {
        let removed: Vec<String> = original_tags
            .iter()
            .filter(|t| !corrected_tags.contains(t))
            .cloned()
            .collect();
        let kept: Vec<String> = original_tags
            .iter()
            .filter(|t| corrected_tags.contains(t))
            .cloned()
            .collect();
        let added: Vec<String> = corrected_tags
            .iter()
            .filter(|t| !original_tags.contains(t))
            .cloned()
            .collect();

        self.store
            .tags
            .update(|doc| {
                let now = Utc::now();
                for name in &removed {
                    if let Some(tag) = doc.tags.get_mut(name) {
                        tag.confidence = clamp_confidence(tag.confidence * REMOVED_FACTOR);
                        tag.updated_at = now;
                    }
                }
                for name in &kept {
                    if let Some(tag) = doc.tags.get_mut(name) {
                        tag.confidence = clamp_confidence(tag.confidence * KEPT_FACTOR);
                        tag.updated_at = now;
                    }
                }
                for name in &added {
                    let tag = doc.tags.entry(name.clone()).or_insert_with(|| {
                        Tag::new(name, TagCategory::Custom, BASELINE_CONFIDENCE)
                    });
                    tag.confidence = clamp_confidence(tag.confidence * ADDED_FACTOR);
                    tag.updated_at = now;
                }
            })
            .await?;

        let record = CorrectionRecord {
            id: Uuid::new_v4(),
            message_id: message_id.to_string(),
            original_tags: original_tags.to_vec(),
            corrected_tags: corrected_tags.to_vec(),
            kind: FeedbackKind::Correction,
            weight: CORRECTION_WEIGHT,
            at: Utc::now(),
            actor: actor.map(Into::into),
        };
        self.append_record(record.clone()).await?;

        self.store
            .messages
            .update(|doc| {
                if let Some(msg) = doc.messages.get_mut(message_id) {
                    msg.tags = corrected_tags.to_vec();
                }
            })
            .await?;

        Ok(record)
    }

    /// Apply lightweight feedback on a message's current tag set.
    ///
    /// Only `Positive` and `Negative` are accepted here; full corrections
    /// go through [`record_correction`](Self::record_correction).
    pub async fn record_feedback(
        &self,
        message_id: &str,
        tags: &[String],
        kind: FeedbackKind,
        actor: Option<&str>,
    ) -> CoreResult<CorrectionRecord> {
        let factor = match kind {
            FeedbackKind::Positive => POSITIVE_FACTOR,
            FeedbackKind::Negative => NEGATIVE_FACTOR,
            FeedbackKind::Correction => {
                return Err(CoreError::Validation(
                    "corrections must supply the corrected tag set".into(),
                ))
            }
        };

        self.store
            .tags
            .update(|doc| {
                let now = Utc::now();
                for name in tags {
                    if let Some(tag) = doc.tags.get_mut(name) {
                        tag.confidence = clamp_confidence(tag.confidence * factor);
                        tag.updated_at = now;
                    }
                }
            })
            .await?;

        let record = CorrectionRecord {
            id: Uuid::new_v4(),
            message_id: message_id.to_string(),
            original_tags: tags.to_vec(),
            corrected_tags: tags.to_vec(),
            kind,
            weight: FEEDBACK_WEIGHT,
            at: Utc::now(),
            actor: actor.map(Into::into),
        };
        self.append_record(record.clone()).await?;
        Ok(record)
    }

    /// Suggested tag set for a message given what learning knows so far.
    ///
    /// Starts from the message's current tags, drops those the catalog
    /// now considers weak, then adds contextual hints from the text and
    /// channel name. Order is preserved, duplicates removed.
    pub async fn improved_suggestions(
        &self,
        message: &Message,
        channel_name: &str,
    ) -> Vec<String> {
        let catalog = self.store.tags.read().await.tags;

        let mut out: Vec<String> = message
            .tags
            .iter()
            .filter(|name| {
                catalog
                    .get(name.as_str())
                    .map(|t| t.confidence > WEAK_TAG_THRESHOLD)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        let haystack = format!(
            "{} {}",
            message.text.to_ascii_lowercase(),
            channel_name.to_ascii_lowercase()
        );
        for (keyword, tag) in CONTEXT_HINTS {
            if haystack.contains(keyword) {
                out.push(tag.to_string());
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        out.retain(|name| seen.insert(name.clone()));
        out
    }

    /// Aggregate view of recorded learning events.
    pub async fn metrics(&self) -> LearningMetrics {
        let doc = self.store.learning.read().await;

        let mut removed_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_corrections = 0;
        let mut positive_feedback = 0;
        let mut negative_feedback = 0;

        for record in &doc.corrections {
            match record.kind {
                FeedbackKind::Correction => {
                    total_corrections += 1;
                    for tag in &record.original_tags {
                        if !record.corrected_tags.contains(tag) {
                            *removed_counts.entry(tag.clone()).or_default() += 1;
                        }
                    }
                }
                FeedbackKind::Positive => positive_feedback += 1,
                FeedbackKind::Negative => negative_feedback += 1,
            }
        }

        let mut top_removed: Vec<(String, usize)> = removed_counts.into_iter().collect();
        // BTreeMap iteration already orders names, so a stable sort by
        // count keeps the name tiebreak ascending.
        top_removed.sort_by(|a, b| b.1.cmp(&a.1));
        top_removed.truncate(TOP_REMOVED_LIMIT);

        LearningMetrics {
            total_corrections,
            top_removed,
            positive_feedback,
            negative_feedback,
        }
    }

    async fn append_record(&self, record: CorrectionRecord) -> CoreResult<()> {
        self.store
            .learning
            .update(|doc| doc.corrections.push(record))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (TempDir, LearningEngine, Arc<StorageContext>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StorageContext::new(dir.path()));
        (dir, LearningEngine::new(Arc::clone(&store)), store)
    }

    async fn seed_tag(store: &StorageContext, name: &str, confidence: f64) {
        store
            .tags
            .update(|doc| {
                doc.tags.insert(
                    name.to_string(),
                    Tag::new(name, TagCategory::Keyword, confidence),
                );
            })
            .await
            .unwrap();
    }

    async fn confidence_of(store: &StorageContext, name: &str) -> f64 {
        store.tags.read().await.tags.get(name).unwrap().confidence
    }

    #[tokio::test]
    async fn correction_decays_removed_and_reinforces_kept() {
        let (_dir, engine, store) = engine();
        seed_tag(&store, "deployment", 0.8).await;
        seed_tag(&store, "noise", 0.8).await;

        engine
            .record_correction(
                "C1-1",
                &["deployment".into(), "noise".into()],
                &["deployment".into()],
                Some("U7"),
            )
            .await
            .unwrap();

        let kept = confidence_of(&store, "deployment").await;
        let removed = confidence_of(&store, "noise").await;
        assert!((kept - 0.88).abs() < 1e-9);
        assert!((removed - 0.72).abs() < 1e-9);
    }

    #[tokio::test]
    async fn correction_creates_added_tag_at_boosted_baseline() {
        let (_dir, engine, store) = engine();

        engine
            .record_correction("C1-1", &[], &["rollout".into()], None)
            .await
            .unwrap();

        let conf = confidence_of(&store, "rollout").await;
        assert!((conf - 0.6).abs() < 1e-9);
        let doc = store.learning.read().await;
        assert_eq!(doc.corrections.len(), 1);
        assert_eq!(doc.corrections[0].weight, CORRECTION_WEIGHT);
    }

    #[tokio::test]
    async fn correction_rewrites_message_tags() {
        let (_dir, engine, store) = engine();
        let msg = sample_message("C1-1", "deploy went out", &["old".to_string()]);
        store
            .messages
            .update(|doc| {
                doc.messages.insert(msg.id.clone(), msg.clone());
            })
            .await
            .unwrap();

        engine
            .record_correction("C1-1", &["old".into()], &["new".into()], None)
            .await
            .unwrap();

        let stored = store.messages.read().await;
        assert_eq!(stored.messages["C1-1"].tags, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn feedback_adjusts_and_rejects_correction_kind() {
        let (_dir, engine, store) = engine();
        seed_tag(&store, "deployment", 0.5).await;

        engine
            .record_feedback("C1-1", &["deployment".into()], FeedbackKind::Positive, None)
            .await
            .unwrap();
        assert!((confidence_of(&store, "deployment").await - 0.525).abs() < 1e-9);

        engine
            .record_feedback("C1-1", &["deployment".into()], FeedbackKind::Negative, None)
            .await
            .unwrap();
        assert!((confidence_of(&store, "deployment").await - 0.49875).abs() < 1e-9);

        let err = engine
            .record_feedback("C1-1", &[], FeedbackKind::Correction, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn confidence_stays_in_band_under_long_event_streams() {
        let (_dir, engine, store) = engine();
        seed_tag(&store, "deployment", 0.5).await;

        for _ in 0..60 {
            engine
                .record_correction("C1-1", &["deployment".into()], &[], None)
                .await
                .unwrap();
        }
        assert!((confidence_of(&store, "deployment").await - 0.1).abs() < 1e-9);

        for _ in 0..60 {
            engine
                .record_correction(
                    "C1-1",
                    &["deployment".into()],
                    &["deployment".into()],
                    None,
                )
                .await
                .unwrap();
        }
        assert!(confidence_of(&store, "deployment").await <= 1.0);

        for _ in 0..60 {
            engine
                .record_feedback("C1-1", &["deployment".into()], FeedbackKind::Positive, None)
                .await
                .unwrap();
        }
        let conf = confidence_of(&store, "deployment").await;
        assert!((0.1..=1.0).contains(&conf));
    }

    #[tokio::test]
    async fn improved_suggestions_drop_weak_and_add_context() {
        let (_dir, engine, store) = engine();
        seed_tag(&store, "strong", 0.8).await;
        seed_tag(&store, "weak", 0.2).await;

        let msg = sample_message(
            "C1-1",
            "deploy of the new release went out",
            &["strong".to_string(), "weak".to_string(), "unknown".to_string()],
        );
        let suggestions = engine.improved_suggestions(&msg, "epic-deploys").await;

        assert!(suggestions.contains(&"strong".to_string()));
        assert!(!suggestions.contains(&"weak".to_string()));
        // Tags learning has never seen are kept.
        assert!(suggestions.contains(&"unknown".to_string()));
        assert!(suggestions.contains(&"deployment".to_string()));
        assert!(suggestions.contains(&"release".to_string()));

        let unique: std::collections::BTreeSet<_> = suggestions.iter().collect();
        assert_eq!(unique.len(), suggestions.len());
    }

    #[tokio::test]
    async fn metrics_count_events_and_rank_removed_tags() {
        let (_dir, engine, _store) = engine();

        for _ in 0..3 {
            engine
                .record_correction("C1-1", &["noise".into()], &[], None)
                .await
                .unwrap();
        }
        engine
            .record_correction("C1-2", &["offtopic".into()], &[], None)
            .await
            .unwrap();
        engine
            .record_feedback("C1-1", &[], FeedbackKind::Positive, None)
            .await
            .unwrap();
        engine
            .record_feedback("C1-2", &[], FeedbackKind::Negative, None)
            .await
            .unwrap();

        let metrics = engine.metrics().await;
        assert_eq!(metrics.total_corrections, 4);
        assert_eq!(metrics.top_removed[0], ("noise".to_string(), 3));
        assert_eq!(metrics.top_removed[1], ("offtopic".to_string(), 1));
        assert_eq!(metrics.positive_feedback, 1);
        assert_eq!(metrics.negative_feedback, 1);
    }

    fn sample_message(id: &str, text: &str, tags: &[String]) -> Message {
        Message {
            id: id.into(),
            channel_id: "C1".into(),
            user_id: "U1".into(),
            text: text.into(),
            ts: Utc::now(),
            reactions: vec![],
            thread_ts: None,
            tags: tags.to_vec(),
            importance: None,
            squad: None,
        }
    }
}
