//! HTTP client for the backend proxy.
//!
//! The proxy holds every upstream secret; this client only ever sees the
//! short-lived token returned by `GET /session`.

use crate::{
    contract::{
        ErrorBody, GenerateImageRequest, GenerateImageResponse, Recency, RetrieveFileRequest,
        RetrieveFileResponse, SearchWebRequest, SearchWebResponse, SessionQuery,
        SessionTokenResponse, is_allowed_file,
    },
    error::{CredentialError, ToolDispatchError},
    lifecycle::SessionConfig,
    tools::ToolServices,
    transport::{CredentialProvider, EphemeralToken},
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::{debug, instrument};

/// A client for the proxy's JSON endpoints.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: Client,
    base_url: String,
}

impl ProxyClient {
    /// Creates a client for the proxy at `base_url` (e.g. `http://localhost:3000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        service: &'static str,
        path: &str,
        body: &B,
    ) -> Result<Response, ToolDispatchError> {
        self.http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| service_error(service, e))
    }

    /// Client-initiated document fetch through `GET /api/files/{filename}`.
    #[instrument(skip(self))]
    pub async fn fetch_file(&self, filename: &str) -> Result<String, ToolDispatchError> {
        if !is_allowed_file(filename) {
            return Err(ToolDispatchError::FileNotAllowed(filename.to_string()));
        }
        let response = self
            .http
            .get(self.url(&format!("/api/files/{filename}")))
            .send()
            .await
            .map_err(|e| service_error("file", e))?;
        file_content(response).await
    }
}

fn service_error(service: &'static str, error: impl ToString) -> ToolDispatchError {
    ToolDispatchError::Service {
        service,
        message: error.to_string(),
    }
}

/// Reads `{ error }` from a failed response, falling back to the status line.
async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    }
}

async fn file_content(response: Response) -> Result<String, ToolDispatchError> {
    let status = response.status();
    let body: RetrieveFileResponse = response
        .json()
        .await
        .map_err(|e| service_error("file", format!("{status}: {e}")))?;
    match body {
        RetrieveFileResponse {
            success: true,
            content: Some(content),
            ..
        } => Ok(content),
        RetrieveFileResponse { error, .. } => Err(service_error(
            "file",
            error.unwrap_or_else(|| status.to_string()),
        )),
    }
}

#[async_trait]
impl CredentialProvider for ProxyClient {
    #[instrument(skip(self, config), fields(voice = %config.voice))]
    async fn mint(&self, config: &SessionConfig) -> Result<EphemeralToken, CredentialError> {
        let query = SessionQuery {
            voice: Some(config.voice.clone()),
            instructions: config.instructions.clone(),
        };
        let response = self
            .http
            .get(self.url("/session"))
            .query(&query)
            .send()
            .await
            .map_err(|e| CredentialError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(CredentialError::Rejected {
                status,
                message: error_message(response).await,
            });
        }

        let minted: SessionTokenResponse = response
            .json()
            .await
            .map_err(|_| CredentialError::MissingToken)?;
        if minted.client_secret.value.is_empty() {
            return Err(CredentialError::MissingToken);
        }
        debug!(expires_at = ?minted.client_secret.expires_at, "Minted ephemeral token");
        Ok(EphemeralToken::new(
            minted.client_secret.value,
            minted.client_secret.expires_at,
        ))
    }
}

#[async_trait]
impl ToolServices for ProxyClient {
    #[instrument(skip(self))]
    async fn generate_image(&self, prompt: &str) -> Result<String, ToolDispatchError> {
        let response = self
            .post_json(
                "image",
                "/generate-image",
                &GenerateImageRequest {
                    prompt: prompt.to_string(),
                },
            )
            .await?;
        if !response.status().is_success() {
            return Err(service_error("image", error_message(response).await));
        }
        let body: GenerateImageResponse = response
            .json()
            .await
            .map_err(|e| service_error("image", e))?;
        Ok(body.url)
    }

    #[instrument(skip(self))]
    async fn search_web(
        &self,
        query: &str,
        recency: Option<Recency>,
    ) -> Result<SearchWebResponse, ToolDispatchError> {
        let response = self
            .post_json(
                "search",
                "/search-web",
                &SearchWebRequest {
                    query: query.to_string(),
                    recency,
                },
            )
            .await?;
        if !response.status().is_success() {
            return Err(service_error("search", error_message(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| service_error("search", e))
    }

    #[instrument(skip(self))]
    async fn retrieve_file(&self, filename: &str) -> Result<String, ToolDispatchError> {
        if !is_allowed_file(filename) {
            return Err(ToolDispatchError::FileNotAllowed(filename.to_string()));
        }
        let response = self
            .post_json(
                "file",
                "/retrieve-file",
                &RetrieveFileRequest {
                    filename: filename.to_string(),
                },
            )
            .await?;
        file_content(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Citation;
    use secrecy::ExposeSecret;
    use serde_json::{Value, json};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        sync::oneshot,
    };

    /// Serves one request with `status` and `body`, and hands back the raw
    /// request it received.
    async fn serve_once(status: u16, body: Value) -> (ProxyClient, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = tcp.read(&mut chunk).await.unwrap();
                raw.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let _ = request_tx.send(String::from_utf8_lossy(&raw).into_owned());

            let body = body.to_string();
            let response = format!(
                "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            tcp.write_all(response.as_bytes()).await.unwrap();
            tcp.shutdown().await.unwrap();
        });

        (ProxyClient::new(format!("http://{addr}")), request_rx)
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = ProxyClient::new("http://localhost:3000/");
        assert_eq!(client.base_url(), "http://localhost:3000");
        assert_eq!(client.url("/session"), "http://localhost:3000/session");
    }

    #[tokio::test]
    async fn test_unlisted_file_is_rejected_without_a_request() {
        // Nothing listens on this port; an issued request would fail differently.
        let client = ProxyClient::new("http://127.0.0.1:9");

        let err = client.retrieve_file("../config.toml").await.unwrap_err();
        assert_eq!(
            err,
            ToolDispatchError::FileNotAllowed("../config.toml".to_string())
        );
        let err = client.fetch_file("id_rsa").await.unwrap_err();
        assert!(matches!(err, ToolDispatchError::FileNotAllowed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_a_credential_error() {
        let client = ProxyClient::new("http://127.0.0.1:9");

        let err = client.mint(&SessionConfig::default()).await.unwrap_err();
        assert!(matches!(err, CredentialError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_mint_reads_client_secret_value() {
        let (client, request) = serve_once(
            200,
            json!({
                "id": "sess_1",
                "client_secret": {"value": "ek_abc", "expires_at": 1_700_000_060}
            }),
        )
        .await;
        let config = SessionConfig {
            voice: "verse".to_string(),
            instructions: None,
        };

        let token = client.mint(&config).await.unwrap();
        assert_eq!(token.value.expose_secret(), "ek_abc");
        assert_eq!(token.expires_at, Some(1_700_000_060));
        assert!(request.await.unwrap().starts_with("GET /session?voice=verse "));
    }

    #[tokio::test]
    async fn test_mint_maps_error_body_to_rejection() {
        let (client, _request) = serve_once(500, json!({"error": "upstream down"})).await;

        let err = client.mint(&SessionConfig::default()).await.unwrap_err();
        match err {
            CredentialError::Rejected { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream down");
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_without_a_token_is_missing_token() {
        let (client, _request) = serve_once(200, json!({"client_secret": {"value": ""}})).await;

        let err = client.mint(&SessionConfig::default()).await.unwrap_err();
        assert!(matches!(err, CredentialError::MissingToken));
    }

    #[tokio::test]
    async fn test_generate_image_returns_url() {
        let (client, request) =
            serve_once(200, json!({"url": "https://images.example/cat.png"})).await;

        let url = client.generate_image("a cat").await.unwrap();
        assert_eq!(url, "https://images.example/cat.png");
        let request = request.await.unwrap();
        assert!(request.starts_with("POST /generate-image "));
        assert!(request.ends_with(r#"{"prompt":"a cat"}"#));
    }

    #[tokio::test]
    async fn test_generate_image_error_body_is_a_service_error() {
        let (client, _request) = serve_once(500, json!({"error": "quota exceeded"})).await;

        let err = client.generate_image("a cat").await.unwrap_err();
        assert_eq!(
            err,
            ToolDispatchError::Service {
                service: "image",
                message: "quota exceeded".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_search_web_returns_summary_and_citations() {
        let (client, request) = serve_once(
            200,
            json!({
                "text": "Rust 1.80 shipped [1].",
                "citations": [{"number": 1, "title": "Release notes", "url": "https://blog.rust-lang.org"}]
            }),
        )
        .await;

        let result = client.search_web("rust release", None).await.unwrap();
        assert_eq!(result.text, "Rust 1.80 shipped [1].");
        assert_eq!(
            result.citations,
            vec![Citation {
                number: 1,
                title: "Release notes".to_string(),
                url: "https://blog.rust-lang.org".to_string(),
            }]
        );
        assert!(request.await.unwrap().starts_with("POST /search-web "));
    }

    #[tokio::test]
    async fn test_search_web_error_body_is_a_service_error() {
        let (client, _request) =
            serve_once(500, json!({"error": "search is not configured"})).await;

        let err = client.search_web("rust", None).await.unwrap_err();
        assert_eq!(
            err,
            ToolDispatchError::Service {
                service: "search",
                message: "search is not configured".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_retrieve_file_failure_carries_the_error() {
        let (client, request) =
            serve_once(404, json!({"success": false, "error": "File not found"})).await;

        let err = client.retrieve_file("faq.md").await.unwrap_err();
        assert_eq!(
            err,
            ToolDispatchError::Service {
                service: "file",
                message: "File not found".to_string(),
            }
        );
        assert!(request.await.unwrap().starts_with("POST /retrieve-file "));
    }

    #[tokio::test]
    async fn test_unsuccessful_file_without_error_uses_status() {
        let (client, _request) = serve_once(200, json!({"success": false})).await;

        let err = client.fetch_file("bio.md").await.unwrap_err();
        assert_eq!(
            err,
            ToolDispatchError::Service {
                service: "file",
                message: "200 OK".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_file_returns_content() {
        let (client, request) =
            serve_once(200, json!({"success": true, "content": "# About me"})).await;

        let content = client.fetch_file("bio.md").await.unwrap();
        assert_eq!(content, "# About me");
        assert!(request.await.unwrap().starts_with("GET /api/files/bio.md "));
    }
}
