//! Daily executive summaries over analyzed messages.
//!
//! Generation is cached on the exact message set and replaces any prior
//! summary stored under the same (date, squad) key. A collaborator
//! failure degrades to the default sectioned reply instead of failing
//! the run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use teampulse_provider::{parse, ModelProvider, ModelRequest, SectionedReply};
use teampulse_schema::{Message, Summary};
use teampulse_store::StorageContext;

use crate::context::SquadResolver;
use crate::error::{CoreError, CoreResult};

/// Most message excerpts quoted per squad in the summary prompt.
pub const SQUAD_EXCERPT_LIMIT: usize = 10;
/// Excerpts are truncated to this many characters in the prompt.
const EXCERPT_CHAR_LIMIT: usize = 200;

pub struct SummaryGenerator {
    store: Arc<StorageContext>,
    provider: Arc<dyn ModelProvider>,
    resolver: Arc<SquadResolver>,
}

impl SummaryGenerator {
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

    /// Generate the summary for one day, optionally scoped to a squad.
    ///
    /// An empty message set is a hard validation failure. Regeneration
    /// under the same key replaces the stored summary but keeps its
    /// original `created_at`.
    pub async fn generate(
        &self,
        date: NaiveDate,
        messages: &[Message],
        squad: Option<&str>,
        include_greeting: bool,
    ) -> CoreResult<Summary> {
        let grouped = self.group_by_squad(messages, squad).await;
        let scoped_count: usize = grouped.values().map(Vec::len).sum();
        if scoped_count == 0 {
            return Err(CoreError::Validation(
                "cannot summarize an empty message set".into(),
            ));
        }

        let cache_key = Self::cache_key(date, &grouped, include_greeting);
        if let Some(hit) = self.store.cache.get(&cache_key).await {
            if let Ok(summary) = serde_json::from_value::<Summary>(hit) {
                tracing::debug!("summary cache hit for {cache_key}");
                return Ok(summary);
            }
        }

        let request = self.build_prompt(date, &grouped, include_greeting);
        let reply = match self.provider.complete(request).await {
            Ok(response) => parse::parse_sectioned(&response.text),
            Err(e) => {
                tracing::warn!("summary generation degraded to defaults: {e}");
                SectionedReply::default()
            }
        };

        let key = Summary::key(date, squad);
        let content = match (&reply.greeting, include_greeting) {
            (Some(greeting), true) => format!("{greeting}\n\n{}", reply.summary),
            _ => reply.summary.clone(),
        };
        let now = Utc::now();
        let mut summary = Summary {
            id: key.clone(),
            content,
            key_topics: reply.key_topics,
            highlights: reply.highlights,
            action_items: reply.action_items,
            sentiment: reply.sentiment,
            message_count: scoped_count,
            squads_analyzed: grouped.keys().cloned().collect(),
            created_at: now,
            updated_at: now,
        };

        self.store
            .summaries
            .update(|doc| {
                if let Some(previous) = doc.summaries.get(&key) {
                    summary.created_at = previous.created_at;
                }
                doc.summaries.insert(key.clone(), summary.clone());
            })
            .await?;

        if let Ok(value) = serde_json::to_value(&summary) {
            self.store.cache.put(&cache_key, value).await?;
        }
        Ok(summary)
    }

    /// Bucket messages by resolved squad; a squad scope keeps only that
    /// squad's bucket.
    async fn group_by_squad(
        &self,
        messages: &[Message],
        squad: Option<&str>,
    ) -> BTreeMap<String, Vec<Message>> {
        let channels = self.store.channels.read().await.channels;
        let mut grouped: BTreeMap<String, Vec<Message>> = BTreeMap::new();
        for message in messages {
            let channel_name = channels
                .get(&message.channel_id)
                .map(|c| c.name.as_str())
                .unwrap_or(message.channel_id.as_str());
            let resolved = message
                .squad
                .clone()
                .unwrap_or_else(|| self.resolver.resolve(channel_name).to_string());
            if squad.is_some_and(|s| s != resolved) {
                continue;
            }
            grouped.entry(resolved).or_default().push(message.clone());
        }
        grouped
    }

    fn cache_key(
        date: NaiveDate,
        grouped: &BTreeMap<String, Vec<Message>>,
        include_greeting: bool,
    ) -> String {
        let mut ids: Vec<&str> = grouped
            .values()
            .flatten()
            .map(|m| m.id.as_str())
            .collect();
        ids.sort_unstable();
        format!("summary_{date}_{}_{include_greeting}", ids.join("_"))
    }

    fn build_prompt(
        &self,
        date: NaiveDate,
        grouped: &BTreeMap<String, Vec<Message>>,
        include_greeting: bool,
    ) -> ModelRequest {
        let mut body = String::new();
        for (squad, messages) in grouped {
            body.push_str(&format!("\n## Squad: {squad}\n"));
            let mut ranked: Vec<&Message> = messages.iter().collect();
            ranked.sort_by(|a, b| {
                b.importance
                    .unwrap_or(0.0)
                    .partial_cmp(&a.importance.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for message in ranked.into_iter().take(SQUAD_EXCERPT_LIMIT) {
                let mut excerpt = message.text.replace('\n', " ");
                if excerpt.len() > EXCERPT_CHAR_LIMIT {
                    let cut = excerpt
                        .char_indices()
                        .take_while(|(i, _)| *i < EXCERPT_CHAR_LIMIT)
                        .last()
                        .map(|(i, c)| i + c.len_utf8())
                        .unwrap_or(0);
                    excerpt.truncate(cut);
                }
                body.push_str(&format!("- [{}] {excerpt}\n", message.user_id));
            }
        }

        let greeting_line = if include_greeting {
            "GREETING: <one friendly opening line>\n"
        } else {
            ""
        };
        let prompt = format!(
            "Write an executive summary of team activity for {date}.\n\
             Reply using exactly these sections:\n\
             {greeting_line}SUMMARY: <2-4 sentences>\n\
             KEY_TOPICS: <comma separated>\n\
             SENTIMENT: <positive|neutral|negative>\n\
             HIGHLIGHTS: <bullet list>\n\
             ACTION_ITEMS: <bullet list>\n\
             {body}"
        );
        ModelRequest::new(prompt).with_max_tokens(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use teampulse_provider::{FailProvider, ModelResponse, StubProvider};
    use tempfile::TempDir;

    struct CountingProvider {
        calls: AtomicUsize,
        reply: String,
    }

    #[async_trait::async_trait]
    impl ModelProvider for CountingProvider {
        async fn complete(&self, _request: ModelRequest) -> anyhow::Result<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ModelResponse {
                text: self.reply.clone(),
                input_tokens: None,
                output_tokens: None,
            })
        }
    }

    fn generator(provider: Arc<dyn ModelProvider>) -> (TempDir, SummaryGenerator) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StorageContext::new(dir.path()));
        let gen = SummaryGenerator::new(store, provider, Arc::new(SquadResolver::default()));
        (dir, gen)
    }

    fn msg(id: &str, text: &str) -> Message {
        Message {
            id: id.into(),
            channel_id: "C1".into(),
            user_id: "U1".into(),
            text: text.into(),
            ts: Utc::now(),
            reactions: vec![],
            thread_ts: None,
            tags: vec![],
            importance: Some(0.5),
            squad: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn empty_message_set_is_a_validation_error() {
        let (_dir, gen) = generator(Arc::new(StubProvider::default()));
        let err = gen.generate(date(), &[], None, false).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn sectioned_reply_fills_the_summary() {
        let reply = "GREETING: Morning!\nSUMMARY: Shipped the rollout.\n\
                     KEY_TOPICS: rollout, alerts\nSENTIMENT: positive\n\
                     HIGHLIGHTS:\n- zero downtime\nACTION_ITEMS: tune alerts";
        let (_dir, gen) = generator(Arc::new(StubProvider::new(reply)));

        let summary = gen
            .generate(date(), &[msg("C1-1", "rollout done")], None, true)
            .await
            .unwrap();
        assert!(summary.content.starts_with("Morning!"));
        assert!(summary.content.contains("Shipped the rollout."));
        assert_eq!(summary.key_topics, vec!["rollout", "alerts"]);
        assert_eq!(summary.sentiment, "positive");
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.squads_analyzed, vec!["general".to_string()]);
    }

    #[tokio::test]
    async fn greeting_is_omitted_when_not_requested() {
        let reply = "GREETING: Morning!\nSUMMARY: Quiet day.";
        let (_dir, gen) = generator(Arc::new(StubProvider::new(reply)));
        let summary = gen
            .generate(date(), &[msg("C1-1", "hi")], None, false)
            .await
            .unwrap();
        assert_eq!(summary.content, "Quiet day.");
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_default_summary() {
        let (_dir, gen) = generator(Arc::new(FailProvider));
        let summary = gen
            .generate(date(), &[msg("C1-1", "hello")], None, false)
            .await
            .unwrap();
        assert_eq!(summary.content, parse::DEFAULT_SUMMARY_TEXT);
        assert_eq!(summary.sentiment, parse::DEFAULT_SENTIMENT);
        assert_eq!(summary.message_count, 1);
    }

    #[tokio::test]
    async fn regeneration_replaces_under_same_key_and_keeps_created_at() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StorageContext::new(dir.path()));
        let resolver = Arc::new(SquadResolver::default());

        let first = SummaryGenerator::new(
            Arc::clone(&store),
            Arc::new(StubProvider::new("SUMMARY: first pass")),
            Arc::clone(&resolver),
        );
        let original = first
            .generate(date(), &[msg("C1-1", "hello")], None, false)
            .await
            .unwrap();

        // Different message set, same key: a regeneration, not a cache hit.
        let second = SummaryGenerator::new(
            Arc::clone(&store),
            Arc::new(StubProvider::new("SUMMARY: second pass")),
            resolver,
        );
        let replaced = second
            .generate(date(), &[msg("C1-2", "more news")], None, false)
            .await
            .unwrap();

        assert_eq!(replaced.content, "second pass");
        assert_eq!(replaced.created_at, original.created_at);

        let doc = store.summaries.read().await;
        assert_eq!(doc.summaries.len(), 1);
        assert_eq!(doc.summaries["2025-06-01"].content, "second pass");
    }

    #[tokio::test]
    async fn identical_request_is_served_from_cache() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            reply: "SUMMARY: cached".into(),
        });
        let (_dir, gen) = generator(provider.clone());

        let messages = vec![msg("C1-1", "hello"), msg("C1-2", "world")];
        let first = gen.generate(date(), &messages, None, false).await.unwrap();
        let second = gen.generate(date(), &messages, None, false).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.content, second.content);
    }

    #[tokio::test]
    async fn squad_scope_filters_and_keys_by_squad() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StorageContext::new(dir.path()));
        store
            .channels
            .update(|doc| {
                doc.channels.insert(
                    "C-EPIC".into(),
                    teampulse_schema::ChannelInfo {
                        id: "C-EPIC".into(),
                        name: "epic-rollout".into(),
                        member_count: 5,
                        is_private: false,
                    },
                );
            })
            .await
            .unwrap();
        let gen = SummaryGenerator::new(
            Arc::clone(&store),
            Arc::new(StubProvider::new("SUMMARY: epic only")),
            Arc::new(SquadResolver::default()),
        );

        let mut epic_msg = msg("C-EPIC-1", "rollout update");
        epic_msg.channel_id = "C-EPIC".into();
        let general_msg = msg("C1-1", "lunch plans");

        let summary = gen
            .generate(date(), &[epic_msg, general_msg], Some("epic"), false)
            .await
            .unwrap();
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.squads_analyzed, vec!["epic".to_string()]);

        let doc = store.summaries.read().await;
        assert!(doc.summaries.contains_key("2025-06-01_epic"));
    }
}
