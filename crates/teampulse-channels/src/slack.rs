//! Slack Web API message source.
//!
//! Pulls `conversations.history` for a window, `conversations.info` for
//! channel metadata, and `users.info` for author identities. Messages
//! come back oldest-first with the stable `{channel}-{ts}` id.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use teampulse_schema::{ChannelInfo, Message, Reaction, UserProfile};

use crate::{ChannelFetch, MessageSource};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

pub struct SlackSource {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl SlackSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base(token, SLACK_API_BASE)
    }

    pub fn with_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{method}", self.api_base);
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        let body: serde_json::Value = resp.json().await?;
        if !body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            let error = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error");
            return Err(anyhow!("slack api {method} failed: {error}"));
        }
        Ok(serde_json::from_value(body)?)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    reactions: Vec<SlackReaction>,
}

#[derive(Debug, Deserialize)]
struct SlackReaction {
    name: String,
    count: usize,
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InfoPayload {
    channel: SlackChannel,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    id: String,
    name: String,
    #[serde(default)]
    num_members: usize,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    is_bot: bool,
}

fn slack_ts(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

fn parse_slack_ts(ts: &str) -> DateTime<Utc> {
    let secs = ts
        .split('.')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or_default();
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl MessageSource for SlackSource {
    async fn fetch_channel(
        &self,
        channel_id: &str,
        oldest: DateTime<Utc>,
        latest: DateTime<Utc>,
    ) -> Result<ChannelFetch> {
        let info: InfoPayload = self
            .call(
                "conversations.info",
                &[("channel", channel_id.to_string())],
            )
            .await?;

        let history: HistoryPayload = self
            .call(
                "conversations.history",
                &[
                    ("channel", channel_id.to_string()),
                    ("oldest", slack_ts(oldest)),
                    ("latest", slack_ts(latest)),
                    ("limit", "200".to_string()),
                ],
            )
            .await?;

        // Slack returns newest-first; callers want chronological order.
        let mut messages: Vec<Message> = history
            .messages
            .into_iter()
            .rev()
            .filter_map(|m| {
                let user = m.user?;
                let text = m.text.unwrap_or_default();
                if text.is_empty() {
                    return None;
                }
                Some(Message {
                    id: Message::derive_id(channel_id, &m.ts),
                    channel_id: channel_id.to_string(),
                    user_id: user,
                    text,
                    ts: parse_slack_ts(&m.ts),
                    reactions: m
                        .reactions
                        .into_iter()
                        .map(|r| Reaction {
                            name: r.name,
                            count: r.count,
                            users: r.users,
                        })
                        .collect(),
                    thread_ts: m.thread_ts,
                    tags: vec![],
                    importance: None,
                    squad: None,
                })
            })
            .collect();
        messages.sort_by(|a, b| a.ts.cmp(&b.ts));

        tracing::debug!(
            "fetched {} messages from #{} ({channel_id})",
            messages.len(),
            info.channel.name
        );

        Ok(ChannelFetch {
            channel: ChannelInfo {
                id: info.channel.id,
                name: info.channel.name,
                member_count: info.channel.num_members,
                is_private: info.channel.is_private,
            },
            messages,
        })
    }

    async fn resolve_user(&self, user_id: &str) -> Result<UserProfile> {
        let payload: UserPayload = self
            .call("users.info", &[("user", user_id.to_string())])
            .await?;
        Ok(UserProfile {
            id: payload.user.id,
            name: payload.user.name,
            real_name: payload.user.real_name,
            is_bot: payload.user.is_bot,
        })
    }
}
