use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use teampulse_channels::{scan_channels, MessageSource, SlackSource};
use teampulse_core::*;
use teampulse_provider::{HttpProvider, ModelProvider, StubProvider};
use teampulse_schema::{FeedbackKind, Message};
use teampulse_store::StorageContext;

#[derive(Parser)]
#[command(name = "teampulse", version, about = "Team channel pulse: ingest, tag, learn, summarize")]
struct Cli {
    #[arg(long, default_value = "pulse.yaml", help = "Path to the pulse config file")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch recent messages from the configured channels")]
    Ingest {
        #[arg(long, default_value = "24", help = "Look-back window in hours")]
        hours: i64,
    },
    #[command(about = "Tag and score messages that have not been analyzed yet")]
    Analyze {
        #[arg(long, help = "Analyze at most this many messages")]
        limit: Option<usize>,
    },
    #[command(about = "Generate the daily executive summary")]
    Summarize {
        #[arg(long, help = "Day to summarize, YYYY-MM-DD (default: today)")]
        date: Option<NaiveDate>,
        #[arg(long, help = "Restrict the summary to one squad")]
        squad: Option<String>,
        #[arg(long, help = "Open the summary with a greeting line")]
        greeting: bool,
    },
    #[command(about = "Replace a message's tag set and feed the learning loop")]
    Correct {
        message_id: String,
        #[arg(help = "The corrected tag set")]
        tags: Vec<String>,
    },
    #[command(about = "Record positive or negative feedback on a message's tags")]
    Feedback {
        message_id: String,
        #[arg(value_parser = ["positive", "negative"])]
        kind: String,
    },
    #[command(about = "Show learning metrics")]
    Metrics,
    #[command(about = "Validate the config file")]
    Validate,
}

fn build_provider(config: &PulseConfig) -> Arc<dyn ModelProvider> {
    if config.provider.api_key.is_empty() {
        tracing::warn!("no provider api key configured, using the stub provider");
        Arc::new(StubProvider::default())
    } else {
        Arc::new(HttpProvider::new(
            &config.provider.api_key,
            &config.provider.api_base,
            &config.provider.model,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "teampulse.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let config = load_config(&cli.config)?;
    let store = Arc::new(StorageContext::new(&config.data_dir));
    let resolver = Arc::new(config.resolver());

    match cli.command {
        Commands::Ingest { hours } => {
            let source = SlackSource::new(&config.slack_token);
            let latest = Utc::now();
            let oldest = latest - Duration::hours(hours);
            let fetches = scan_channels(&source, &config.channels, oldest, latest).await;

            let mut fetched = 0usize;
            let mut authors: std::collections::BTreeSet<String> = Default::default();
            for fetch in &fetches {
                fetched += fetch.messages.len();
                authors.extend(fetch.messages.iter().map(|m| m.user_id.clone()));
                store
                    .channels
                    .update(|doc| {
                        doc.channels
                            .insert(fetch.channel.id.clone(), fetch.channel.clone());
                    })
                    .await?;
                store
                    .messages
                    .update(|doc| {
                        for message in &fetch.messages {
                            doc.messages
                                .entry(message.id.clone())
                                .or_insert_with(|| message.clone());
                        }
                    })
                    .await?;
            }

            let known: std::collections::BTreeSet<String> =
                store.users.read().await.users.keys().cloned().collect();
            for user_id in authors.difference(&known) {
                match source.resolve_user(user_id).await {
                    Ok(profile) => {
                        store
                            .users
                            .update(|doc| {
                                doc.users.insert(profile.id.clone(), profile.clone());
                            })
                            .await?;
                    }
                    Err(e) => tracing::warn!("failed to resolve user {user_id}: {e}"),
                }
            }
            println!(
                "Ingested {fetched} messages from {} channels.",
                fetches.len()
            );
        }
        Commands::Analyze { limit } => {
            let provider = build_provider(&config);
            let analyzer = Analyzer::new(Arc::clone(&store), provider, Arc::clone(&resolver));

            let doc = store.messages.read().await;
            let mut pending: Vec<Message> = doc
                .messages
                .values()
                .filter(|m| m.importance.is_none())
                .cloned()
                .collect();
            drop(doc);
            pending.sort_by(|a, b| a.ts.cmp(&b.ts));
            if let Some(limit) = limit {
                pending.truncate(limit);
            }

            let outcomes = analyzer.analyze_messages(&pending).await;
            for outcome in &outcomes {
                println!(
                    "{}  importance={:.2}  tags=[{}]",
                    outcome.message_id,
                    outcome.importance,
                    outcome.tags.join(", ")
                );
            }
            println!("Analyzed {} messages.", outcomes.len());
        }
        Commands::Summarize {
            date,
            squad,
            greeting,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let doc = store.messages.read().await;
            let messages: Vec<Message> = doc
                .messages
                .values()
                .filter(|m| m.ts.date_naive() == date)
                .cloned()
                .collect();
            drop(doc);

            let provider = build_provider(&config);
            let generator = SummaryGenerator::new(Arc::clone(&store), provider, resolver);
            let summary = generator
                .generate(date, &messages, squad.as_deref(), greeting)
                .await?;

            println!("# Summary for {date}\n");
            println!("{}\n", summary.content);
            if !summary.key_topics.is_empty() {
                println!("Key topics: {}", summary.key_topics.join(", "));
            }
            for highlight in &summary.highlights {
                println!("* {highlight}");
            }
            for item in &summary.action_items {
                println!("[ ] {item}");
            }
            println!(
                "\n({} messages, sentiment: {})",
                summary.message_count, summary.sentiment
            );
        }
        Commands::Correct { message_id, tags } => {
            let original = store
                .messages
                .read()
                .await
                .messages
                .get(&message_id)
                .map(|m| m.tags.clone())
                .unwrap_or_default();

            let learning = LearningEngine::new(Arc::clone(&store));
            learning
                .record_correction(&message_id, &original, &tags, None)
                .await?;
            println!(
                "Corrected {message_id}: [{}] -> [{}]",
                original.join(", "),
                tags.join(", ")
            );
        }
        Commands::Feedback { message_id, kind } => {
            let kind = match kind.as_str() {
                "positive" => FeedbackKind::Positive,
                _ => FeedbackKind::Negative,
            };
            let tags = store
                .messages
                .read()
                .await
                .messages
                .get(&message_id)
                .map(|m| m.tags.clone())
                .unwrap_or_default();

            let learning = LearningEngine::new(Arc::clone(&store));
            learning
                .record_feedback(&message_id, &tags, kind, None)
                .await?;
            println!("Recorded {kind:?} feedback on {message_id}.");
        }
        Commands::Metrics => {
            let learning = LearningEngine::new(Arc::clone(&store));
            let metrics = learning.metrics().await;
            println!("Corrections: {}", metrics.total_corrections);
            println!(
                "Feedback: {} positive, {} negative",
                metrics.positive_feedback, metrics.negative_feedback
            );
            if !metrics.top_removed.is_empty() {
                println!("Most removed tags:");
                for (tag, count) in &metrics.top_removed {
                    println!("  {tag}: {count}");
                }
            }
        }
        Commands::Validate => {
            println!(
                "Config valid. {} channels, {} squads, {} routing rules.",
                config.channels.len(),
                config.squads.len(),
                config.rules.len()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
