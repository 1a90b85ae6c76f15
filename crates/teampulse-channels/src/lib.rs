//! Message-source collaborators.
//!
//! A source hands back ordered message records for a channel and time
//! window, with channel metadata and resolvable authors. A failing
//! channel degrades to an empty result during a multi-channel scan
//! instead of aborting it.

pub mod slack;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teampulse_schema::{ChannelInfo, Message, UserProfile};

pub use slack::SlackSource;

/// Everything fetched for one channel in one window.
#[derive(Debug, Clone)]
pub struct ChannelFetch {
    pub channel: ChannelInfo,
    pub messages: Vec<Message>,
}

impl ChannelFetch {
    /// Placeholder result for a channel whose fetch failed.
    pub fn empty(channel_id: &str) -> Self {
        Self {
            channel: ChannelInfo {
                id: channel_id.to_string(),
                name: channel_id.to_string(),
                member_count: 0,
                is_private: false,
            },
            messages: vec![],
        }
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Ordered messages for one channel within [oldest, latest].
    async fn fetch_channel(
        &self,
        channel_id: &str,
        oldest: DateTime<Utc>,
        latest: DateTime<Utc>,
    ) -> Result<ChannelFetch>;

    /// Resolve an author identity.
    async fn resolve_user(&self, user_id: &str) -> Result<UserProfile>;
}

/// Fetch several channels sequentially. One channel failing yields an
/// empty result for that channel; the scan continues.
pub async fn scan_channels(
    source: &dyn MessageSource,
    channel_ids: &[String],
    oldest: DateTime<Utc>,
    latest: DateTime<Utc>,
) -> Vec<ChannelFetch> {
    let mut results = Vec::with_capacity(channel_ids.len());
    for channel_id in channel_ids {
        match source.fetch_channel(channel_id, oldest, latest).await {
            Ok(fetch) => results.push(fetch),
            Err(e) => {
                tracing::warn!("failed to fetch channel {channel_id}: {e}");
                results.push(ChannelFetch::empty(channel_id));
            }
        }
    }
    results
}
