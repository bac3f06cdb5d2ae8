//! Web search through Perplexity's chat-completions API.

use super::WebSearcher;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parley_core::contract::{Citation, Recency, SearchWebResponse};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

pub const PERPLEXITY_URL: &str = "https://api.perplexity.ai/chat/completions";

const SYSTEM_PROMPT: &str = "Be precise and concise. Answer in a few sentences suitable for reading aloud.";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    search_results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    url: String,
}

pub struct PerplexitySearcher {
    http: Client,
    api_key: Option<SecretString>,
    model: String,
    url: String,
}

impl PerplexitySearcher {
    pub fn new(api_key: Option<SecretString>, model: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            model,
            url: PERPLEXITY_URL.to_string(),
        }
    }

    fn request_body(&self, query: &str, recency: Option<Recency>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": query }
            ]
        });
        if let Some(recency) = recency {
            body["search_recency_filter"] = json!(recency.to_string());
        }
        body
    }
}

/// Numbers citations in the order given; titles come from the matching
/// search result when there is one.
fn into_search_response(response: CompletionResponse) -> SearchWebResponse {
    let text = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .unwrap_or_default();

    let urls: Vec<String> = if response.citations.is_empty() {
        response.search_results.iter().map(|r| r.url.clone()).collect()
    } else {
        response.citations
    };
    let citations = urls
        .into_iter()
        .enumerate()
        .map(|(i, url)| {
            let title = response
                .search_results
                .iter()
                .find(|r| r.url == url && !r.title.is_empty())
                .map(|r| r.title.clone())
                .unwrap_or_else(|| url.clone());
            Citation {
                number: i as u32 + 1,
                title,
                url,
            }
        })
        .collect();

    SearchWebResponse { text, citations }
}

#[async_trait]
impl WebSearcher for PerplexitySearcher {
    async fn search(&self, query: &str, recency: Option<Recency>) -> Result<SearchWebResponse> {
        let Some(api_key) = &self.api_key else {
            bail!("PERPLEXITY_API_KEY is not configured");
        };
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(api_key.expose_secret())
            .json(&self.request_body(query, recency))
            .send()
            .await
            .context("Failed to reach Perplexity")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Perplexity API error: {status}");
        }
        let completion: CompletionResponse = response
            .json()
            .await
            .context("Perplexity returned an unreadable response")?;
        debug!(citations = completion.citations.len(), "Search completed");
        Ok(into_search_response(completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_carries_recency() {
        let searcher = PerplexitySearcher::new(None, "sonar".to_string());
        let body = searcher.request_body("rust news", Some(Recency::Week));
        assert_eq!(body["model"], "sonar");
        assert_eq!(body["messages"][1]["content"], "rust news");
        assert_eq!(body["search_recency_filter"], "week");

        let body = searcher.request_body("rust news", None);
        assert!(body.get("search_recency_filter").is_none());
    }

    #[test]
    fn test_citations_are_numbered_and_titled() {
        let response: CompletionResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "Rust 1.90 is out [1]." } }],
            "citations": ["https://blog.rust-lang.org", "https://example.com/x"],
            "search_results": [
                { "title": "Rust Blog", "url": "https://blog.rust-lang.org" }
            ]
        }))
        .unwrap();

        let result = into_search_response(response);
        assert_eq!(result.text, "Rust 1.90 is out [1].");
        assert_eq!(
            result.citations,
            vec![
                Citation {
                    number: 1,
                    title: "Rust Blog".to_string(),
                    url: "https://blog.rust-lang.org".to_string(),
                },
                Citation {
                    number: 2,
                    title: "https://example.com/x".to_string(),
                    url: "https://example.com/x".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_a_request() {
        let searcher = PerplexitySearcher::new(None, "sonar".to_string());
        let err = searcher.search("anything", None).await.unwrap_err();
        assert!(err.to_string().contains("PERPLEXITY_API_KEY"));
    }
}
