//! OpenAI-backed session minting and image generation.

use super::{ImageGenerator, SessionMinter};
use anyhow::{Context, Result, anyhow, bail};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateImageRequestArgs, Image, ImageModel, ImageResponseFormat, ImageSize},
};
use async_trait::async_trait;
use parley_core::{
    contract::ALLOWED_FILES,
    tools::{GENERATE_IMAGE, RETRIEVE_FILE, SEARCH_WEB},
};
use reqwest::Client as HttpClient;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info};

pub const REALTIME_SESSIONS_URL: &str = "https://api.openai.com/v1/realtime/sessions";

/// Function definitions the realtime model may call.
pub fn tool_definitions() -> Value {
    json!([
        {
            "type": "function",
            "name": GENERATE_IMAGE,
            "description": "Generate an image based on a natural language description. Use this whenever a user requests any kind of image creation or generation.",
            "parameters": {
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "A detailed description of the image to generate"
                    }
                },
                "required": ["prompt"]
            }
        },
        {
            "type": "function",
            "name": SEARCH_WEB,
            "description": "Search the web for current information. Use this for news, recent events, prices, or anything that may have changed recently.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to search for"
                    },
                    "recency": {
                        "type": "string",
                        "enum": ["hour", "day", "week", "month"],
                        "description": "Only use results from this time window"
                    }
                },
                "required": ["query"]
            }
        },
        {
            "type": "function",
            "name": RETRIEVE_FILE,
            "description": "Retrieve one of the available documents to answer questions about its contents.",
            "parameters": {
                "type": "object",
                "properties": {
                    "filename": {
                        "type": "string",
                        "enum": ALLOWED_FILES,
                        "description": "The document to retrieve"
                    }
                },
                "required": ["filename"]
            }
        }
    ])
}

/// Mints sessions through `POST /v1/realtime/sessions`.
pub struct OpenAiSessionMinter {
    http: HttpClient,
    api_key: SecretString,
    model: String,
    url: String,
}

impl OpenAiSessionMinter {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            http: HttpClient::new(),
            api_key,
            model,
            url: REALTIME_SESSIONS_URL.to_string(),
        }
    }

    /// Builds the request body sent upstream.
    pub fn session_body(&self, voice: &str, instructions: &str) -> Value {
        json!({
            "model": self.model,
            "voice": voice,
            "instructions": instructions,
            "input_audio_transcription": { "model": "whisper-1" },
            "tools": tool_definitions(),
            "tool_choice": "auto"
        })
    }
}

#[async_trait]
impl SessionMinter for OpenAiSessionMinter {
    async fn mint(&self, voice: &str, instructions: &str) -> Result<Value> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.session_body(voice, instructions))
            .send()
            .await
            .context("Failed to reach OpenAI realtime sessions endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            debug!(%status, %detail, "OpenAI rejected session request");
            bail!("OpenAI API error: {status}");
        }
        let session: Value = response
            .json()
            .await
            .context("OpenAI returned an unreadable session")?;
        info!(%voice, "Minted realtime session");
        Ok(session)
    }
}

fn image_model(name: &str) -> ImageModel {
    match name {
        "dall-e-2" => ImageModel::DallE2,
        "dall-e-3" => ImageModel::DallE3,
        other => ImageModel::Other(other.to_string()),
    }
}

/// Generates images with the OpenAI images API.
pub struct OpenAiImageGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiImageGenerator {
    pub fn new(api_key: &SecretString, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key.expose_secret());
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(image_model(&self.model))
            .n(1)
            .size(ImageSize::S1024x1024)
            .response_format(ImageResponseFormat::Url)
            .build()?;

        let response = self.client.images().create(request).await?;
        response
            .data
            .iter()
            .find_map(|image| match image.as_ref() {
                Image::Url { url, .. } => Some(url.clone()),
                _ => None,
            })
            .ok_or_else(|| anyhow!("Image response did not contain a URL"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definitions_cover_every_tool() {
        let tools = tool_definitions();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec![GENERATE_IMAGE, SEARCH_WEB, RETRIEVE_FILE]);

        let files = &tools[2]["parameters"]["properties"]["filename"]["enum"];
        assert_eq!(files, &json!(ALLOWED_FILES));
    }

    #[test]
    fn test_session_body() {
        let minter = OpenAiSessionMinter::new(
            SecretString::from("sk-test".to_string()),
            "gpt-4o-realtime-preview-2024-12-17".to_string(),
        );
        let body = minter.session_body("sage", "Be helpful.");
        assert_eq!(body["model"], "gpt-4o-realtime-preview-2024-12-17");
        assert_eq!(body["voice"], "sage");
        assert_eq!(body["instructions"], "Be helpful.");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_image_model_mapping() {
        assert!(matches!(image_model("dall-e-3"), ImageModel::DallE3));
        assert!(matches!(image_model("dall-e-2"), ImageModel::DallE2));
        assert!(matches!(image_model("gpt-image-1"), ImageModel::Other(m) if m == "gpt-image-1"));
    }
}
