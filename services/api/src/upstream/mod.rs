//! Third-party services behind the proxy.
//!
//! Handlers only see these traits; the binary wires in the OpenAI and
//! Perplexity implementations and the router tests wire in [`mock`].

pub mod mock;
pub mod openai;
pub mod perplexity;

use async_trait::async_trait;
use parley_core::contract::{Recency, SearchWebResponse};
use serde_json::Value;

/// Mints ephemeral realtime sessions.
#[async_trait]
pub trait SessionMinter: Send + Sync {
    /// Returns the upstream session object, including `client_secret.value`.
    async fn mint(&self, voice: &str, instructions: &str) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns the URL of the generated image.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(
        &self,
        query: &str,
        recency: Option<Recency>,
    ) -> anyhow::Result<SearchWebResponse>;
}
