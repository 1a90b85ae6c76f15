pub mod http;
pub mod parse;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpProvider;
pub use parse::{SectionedReply, TagAnalysis, TagSuggestion};

/// A rendered prompt for the language-model collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 1024,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// The language-model collaborator: prompt in, text out. Parsing into a
/// structured or sectioned reply happens on top, in [`parse`].
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse>;

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Echoes a canned response. The default reply is a valid tagging payload
/// so orchestration paths stay exercisable without a real model.
pub struct StubProvider {
    reply: String,
}

impl StubProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new(r#"{"tags": [], "urgency": "medium", "messageType": "discussion"}"#)
    }
}

#[async_trait]
impl ModelProvider for StubProvider {
    async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse> {
        Ok(ModelResponse {
            text: self.reply.clone(),
            input_tokens: None,
            output_tokens: None,
        })
    }
}

/// Always fails; exercises the degradation paths.
pub struct FailProvider;

#[async_trait]
impl ModelProvider for FailProvider {
    async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse> {
        anyhow::bail!("forced provider failure")
    }
}
