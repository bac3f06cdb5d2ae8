//! Request and response bodies of the backend proxy.
//!
//! Both the proxy (`parley-api`) and its client (`ProxyClient`) use these
//! types, so the wire contract lives in exactly one place.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Documents that may be retrieved through the proxy. Anything else is
/// rejected before a request is issued.
pub const ALLOWED_FILES: &[&str] = &["bio.md", "resume.md", "projects.md", "faq.md"];

pub fn is_allowed_file(filename: &str) -> bool {
    ALLOWED_FILES.contains(&filename)
}

/// Query string of `GET /session`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct SessionQuery {
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

/// The subset of the minted session the client relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SessionTokenResponse {
    pub client_secret: ClientSecret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ClientSecret {
    pub value: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GenerateImageRequest {
    #[cfg_attr(feature = "openapi", schema(example = "a red fox in the snow"))]
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GenerateImageResponse {
    pub url: String,
}

/// How fresh web search results must be.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Recency {
    Hour,
    Day,
    Week,
    Month,
}

impl fmt::Display for Recency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recency::Hour => "hour",
            Recency::Day => "day",
            Recency::Week => "week",
            Recency::Month => "month",
        };
        f.write_str(s)
    }
}

impl FromStr for Recency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" => Ok(Recency::Hour),
            "day" => Ok(Recency::Day),
            "week" => Ok(Recency::Week),
            "month" => Ok(Recency::Month),
            other => Err(format!("unknown recency '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SearchWebRequest {
    #[cfg_attr(feature = "openapi", schema(example = "latest rust release"))]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency: Option<Recency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Citation {
    pub number: u32,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SearchWebResponse {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RetrieveFileRequest {
    #[cfg_attr(feature = "openapi", schema(example = "bio.md"))]
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RetrieveFileResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetrieveFileResponse {
    pub fn found(content: String) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// Error body shared by every proxy endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        assert!(is_allowed_file("bio.md"));
        assert!(is_allowed_file("faq.md"));
        assert!(!is_allowed_file("BIO.md"));
        assert!(!is_allowed_file("../bio.md"));
        assert!(!is_allowed_file(""));
    }

    #[test]
    fn test_recency_parsing() {
        assert_eq!("Week".parse::<Recency>(), Ok(Recency::Week));
        assert_eq!(" hour ".parse::<Recency>(), Ok(Recency::Hour));
        assert!("year".parse::<Recency>().is_err());
        assert_eq!(Recency::Month.to_string(), "month");
    }

    #[test]
    fn test_search_request_omits_missing_recency() {
        let body = SearchWebRequest {
            query: "rust".to_string(),
            recency: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"query":"rust"}"#);

        let body = SearchWebRequest {
            query: "rust".to_string(),
            recency: Some(Recency::Day),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"query":"rust","recency":"day"}"#
        );
    }

    #[test]
    fn test_search_response_without_citations() {
        let response: SearchWebResponse =
            serde_json::from_str(r#"{"text":"Nothing new."}"#).unwrap();
        assert!(response.citations.is_empty());
    }

    #[test]
    fn test_retrieve_file_response_shapes() {
        let ok = serde_json::to_value(RetrieveFileResponse::found("hi".to_string())).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "content": "hi"}));

        let failed = serde_json::to_value(RetrieveFileResponse::failed("nope")).unwrap();
        assert_eq!(failed, serde_json::json!({"success": false, "error": "nope"}));
    }

    #[test]
    fn test_session_token_parsing() {
        let body = r#"{"id":"sess_1","object":"realtime.session","client_secret":{"value":"ek_123","expires_at":1700000000}}"#;
        let parsed: SessionTokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.client_secret.value, "ek_123");
        assert_eq!(parsed.client_secret.expires_at, Some(1_700_000_000));
    }
}
