//! Per-message tagging and importance scoring, plus rate-limited batch
//! analysis.

use std::sync::Arc;
use std::time::Duration;

use teampulse_provider::{parse, ModelProvider, ModelRequest, TagSuggestion};
use teampulse_schema::{Message, MessageTag, MessageType, Tag, Urgency};
use teampulse_store::StorageContext;

use crate::context::SquadResolver;
use crate::error::{CoreError, CoreResult};

/// Messages analyzed concurrently per provider burst.
pub const ANALYSIS_BATCH_SIZE: usize = 5;
/// Pause between bursts; backpressure against provider rate limits.
pub const BATCH_DELAY: Duration = Duration::from_secs(1);
/// Suggestions at or below this confidence are discarded.
pub const SUGGESTION_MIN_CONFIDENCE: f64 = 0.6;
/// Maximum message characters included in a tagging prompt.
const PROMPT_TEXT_LIMIT: usize = 500;

/// Keywords that nudge the importance score when present in the text.
const IMPORTANCE_KEYWORDS: &[&str] = &[
    "deadline", "blocker", "outage", "incident", "security", "launch", "release", "deploy",
    "down", "failed", "broken",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub message_id: String,
    pub tags: Vec<String>,
    pub importance: f64,
    pub urgency: Urgency,
}

impl AnalysisOutcome {
    /// Documented per-message fallback when an individual analysis fails.
    pub fn fallback(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            tags: vec![],
            importance: 0.3,
            urgency: Urgency::Low,
        }
    }
}

/// Importance score in [0, 1] for a message.
///
/// Pure over the message, the collaborator-classified type, and the
/// channel's squad multiplier; urgency keys off literal words in the
/// text so the score stays reproducible without a model call.
pub fn importance_score(message: &Message, message_type: MessageType, multiplier: f64) -> f64 {
    let mut score = 0.3;

    score += f64::min(0.3, 0.1 * message.reaction_total() as f64);
    score += f64::min(0.2, 0.05 * message.reaction_variety() as f64);

    let words = message.word_count();
    if words > 50 {
        score += 0.1;
    }
    if words > 100 {
        score += 0.1;
    }

    let lowered = message.text.to_ascii_lowercase();
    score += if lowered.contains("critical") {
        0.4
    } else if lowered.contains("urgent") {
        0.3
    } else if lowered.contains("important") {
        0.2
    } else {
        0.0
    };

    score += match message_type {
        MessageType::Announcement | MessageType::Issue => 0.2,
        MessageType::Achievement | MessageType::Decision => 0.15,
        MessageType::StatusUpdate => 0.1,
        MessageType::Discussion => 0.0,
    };

    let keyword_hits = IMPORTANCE_KEYWORDS
        .iter()
        .filter(|k| lowered.contains(*k))
        .count();
    score += f64::min(0.2, 0.05 * keyword_hits as f64);

    (score * multiplier).clamp(0.0, 1.0)
}

pub struct Analyzer {
    store: Arc<StorageContext>,
    provider: Arc<dyn ModelProvider>,
    resolver: Arc<SquadResolver>,
}

/// Result of the model-facing half of an analysis, before anything is
/// written through the store.
struct Evaluation {
    accepted: Vec<TagSuggestion>,
    importance: f64,
    urgency: Urgency,
    squad: String,
}

impl Analyzer {
    pub fn new(
        store: Arc<StorageContext>,
        provider: Arc<dyn ModelProvider>,
        resolver: Arc<SquadResolver>,
    ) -> Self {
        Self {
            store,
            provider,
            resolver,
        }
    }

    /// Tag and score one message, writing the result through the store.
    ///
    /// Provider or parse failures surface as `Upstream`; batch callers
    /// convert those into the documented fallback.
    pub async fn analyze_message(&self, message: &Message) -> CoreResult<AnalysisOutcome> {
        let evaluation = self.evaluate(message).await?;
        self.persist(message, evaluation).await
    }

    /// Analyze a set of messages in rate-limited batches.
    ///
    /// Model calls run concurrently within a batch; store writes apply
    /// sequentially afterwards, so one message's persisted tags and
    /// score are never erased by a sibling's read-modify-write. Always
    /// returns one outcome per input, in input order; a failed analysis
    /// is replaced by [`AnalysisOutcome::fallback`] instead of failing
    /// its batch.
    pub async fn analyze_messages(&self, messages: &[Message]) -> Vec<AnalysisOutcome> {
        let mut outcomes = Vec::with_capacity(messages.len());
        let batch_count = messages.len().div_ceil(ANALYSIS_BATCH_SIZE);

        for (index, batch) in messages.chunks(ANALYSIS_BATCH_SIZE).enumerate() {
            let evaluations =
                futures::future::join_all(batch.iter().map(|m| self.evaluate(m))).await;
            for (message, evaluation) in batch.iter().zip(evaluations) {
                let result = match evaluation {
                    Ok(evaluation) => self.persist(message, evaluation).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        tracing::warn!("analysis failed for {}: {e}", message.id);
                        outcomes.push(AnalysisOutcome::fallback(&message.id));
                    }
                }
            }
            if index + 1 < batch_count {
                tokio::time::sleep(BATCH_DELAY).await;
            }
        }
        outcomes
    }

    /// Model-facing half of an analysis: prompt, completion, parse,
    /// score. Touches no collection, so evaluations can run
    /// concurrently.
    async fn evaluate(&self, message: &Message) -> CoreResult<Evaluation> {
        if message.text.trim().is_empty() {
            return Err(CoreError::Validation("message text is required".into()));
        }

        let channel_name = self.channel_name(&message.channel_id).await;
        let squad = self.resolver.resolve(&channel_name).to_string();
        let multiplier = self.resolver.multiplier(&channel_name);

        let request = self.build_prompt(message, &channel_name, &squad);
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(CoreError::Upstream)?;
        let analysis = parse::parse_tagging(&response.text).map_err(CoreError::Upstream)?;

        let accepted: Vec<TagSuggestion> = analysis
            .suggestions
            .into_iter()
            .filter(|s| s.confidence > SUGGESTION_MIN_CONFIDENCE)
            .collect();

        Ok(Evaluation {
            accepted,
            importance: importance_score(message, analysis.message_type, multiplier),
            urgency: analysis.urgency,
            squad,
        })
    }

    async fn persist(
        &self,
        message: &Message,
        evaluation: Evaluation,
    ) -> CoreResult<AnalysisOutcome> {
        let tag_names = self.persist_tags(&message.id, &evaluation.accepted).await?;
        self.persist_message(message, &tag_names, evaluation.importance, &evaluation.squad)
            .await?;
        Ok(AnalysisOutcome {
            message_id: message.id.clone(),
            tags: tag_names,
            importance: evaluation.importance,
            urgency: evaluation.urgency,
        })
    }

    async fn channel_name(&self, channel_id: &str) -> String {
        self.store
            .channels
            .read()
            .await
            .channels
            .get(channel_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| channel_id.to_string())
    }

    fn build_prompt(&self, message: &Message, channel_name: &str, squad: &str) -> ModelRequest {
        let mut text = message.text.clone();
        if text.len() > PROMPT_TEXT_LIMIT {
            let cut = text
                .char_indices()
                .take_while(|(i, _)| *i < PROMPT_TEXT_LIMIT)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            text.truncate(cut);
        }
        let known_squads = self.resolver.squad_ids().join(", ");
        let prompt = format!(
            "Analyze this team channel message and reply with JSON only:\n\
             {{\"tags\": [{{\"name\", \"category\", \"confidence\"}}], \"urgency\", \"messageType\"}}\n\
             Categories: keyword, person, squad, custom. Urgency: low, medium, high, critical.\n\
             Message types: announcement, issue, achievement, decision, status-update, discussion.\n\n\
             Channel: #{channel_name}\nAuthor: {author}\nSquad: {squad} (known squads: {known_squads})\n\
             Message: {text}",
            author = message.user_id,
        );
        ModelRequest::new(prompt).with_max_tokens(512)
    }

    /// Create missing tags lazily and append one association per accepted
    /// suggestion. Returns the ordered tag-name list for the message.
    async fn persist_tags(
        &self,
        message_id: &str,
        accepted: &[TagSuggestion],
    ) -> CoreResult<Vec<String>> {
        if accepted.is_empty() {
            return Ok(vec![]);
        }

        let mut associations: Vec<MessageTag> = Vec::with_capacity(accepted.len());
        self.store
            .tags
            .update(|doc| {
                let now = chrono::Utc::now();
                for suggestion in accepted {
                    let tag = doc
                        .tags
                        .entry(suggestion.name.clone())
                        .or_insert_with(|| {
                            Tag::new(&suggestion.name, suggestion.category, suggestion.confidence)
                        });
                    tag.usage_count += 1;
                    tag.updated_at = now;
                    associations.push(MessageTag {
                        message_id: message_id.to_string(),
                        tag_id: tag.id,
                        confidence: suggestion.confidence,
                        manual: false,
                        at: now,
                    });
                }
            })
            .await?;

        self.store
            .learning
            .update(|doc| {
                doc.associations.extend(associations.iter().cloned());
            })
            .await?;

        Ok(accepted.iter().map(|s| s.name.clone()).collect())
    }

    async fn persist_message(
        &self,
        message: &Message,
        tags: &[String],
        importance: f64,
        squad: &str,
    ) -> CoreResult<()> {
        self.store
            .messages
            .update(|doc| {
                let entry = doc
                    .messages
                    .entry(message.id.clone())
                    .or_insert_with(|| message.clone());
                entry.tags = tags.to_vec();
                entry.importance = Some(importance);
                entry.squad = Some(squad.to_string());
            })
            .await?;
        Ok(())
    }
}
