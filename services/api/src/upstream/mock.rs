//! Canned upstreams for the router tests.

use super::{ImageGenerator, SessionMinter, WebSearcher};
use anyhow::{Result, bail};
use async_trait::async_trait;
use parley_core::contract::{Citation, Recency, SearchWebResponse};
use serde_json::{Value, json};
use std::sync::Mutex;

/// Mints fake sessions, or fails every request when `fail` is set.
#[derive(Debug, Default)]
pub struct MockSessionMinter {
    pub fail: bool,
    /// `(voice, instructions)` of every request, in order.
    pub requests: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SessionMinter for MockSessionMinter {
    async fn mint(&self, voice: &str, instructions: &str) -> Result<Value> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((voice.to_string(), instructions.to_string()));
        }
        if self.fail {
            bail!("OpenAI API error: 503 Service Unavailable");
        }
        Ok(json!({
            "id": "sess_mock",
            "voice": voice,
            "client_secret": { "value": format!("ek_mock_{voice}"), "expires_at": 1_900_000_000 }
        }))
    }
}

#[derive(Debug, Default)]
pub struct MockImageGenerator {
    pub fail: bool,
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if self.fail {
            bail!("content policy violation");
        }
        let slug: String = prompt
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase();
        Ok(format!("https://images.test/{slug}.png"))
    }
}

#[derive(Debug, Default)]
pub struct MockWebSearcher {
    pub fail: bool,
}

#[async_trait]
impl WebSearcher for MockWebSearcher {
    async fn search(&self, query: &str, recency: Option<Recency>) -> Result<SearchWebResponse> {
        if self.fail {
            bail!("PERPLEXITY_API_KEY is not configured");
        }
        let window = recency.map(|r| format!(" (past {r})")).unwrap_or_default();
        Ok(SearchWebResponse {
            text: format!("Results for {query}{window}."),
            citations: vec![Citation {
                number: 1,
                title: "Example".to_string(),
                url: "https://example.com".to_string(),
            }],
        })
    }
}
