//! Error taxonomy for the session front end.
//!
//! Each concern gets its own error type so callers can decide, by type alone,
//! whether a failure is fatal to `connect()`, isolated to a single tool call,
//! or merely something to surface as a status note.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::lifecycle::ConnectionState;

/// Ephemeral token acquisition failed. Fatal to `connect()`, never retried.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential service unreachable: {0}")]
    Unreachable(String),
    #[error("credential service returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("credential response did not contain client_secret.value")]
    MissingToken,
}

/// The capture device was denied or is unavailable. Fatal to `connect()`.
#[derive(Debug, Error)]
pub enum MediaAccessError {
    #[error("no audio input device available")]
    NoDevice,
    #[error("audio capture denied: {0}")]
    Denied(String),
    #[error("audio capture failed: {0}")]
    Stream(String),
}

/// Transport or event-channel failure.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to open event channel: {0}")]
    Connect(String),
    #[error("event channel did not become ready within {0:?}")]
    ReadyTimeout(Duration),
    #[error("event channel closed during setup: {0}")]
    ClosedDuringSetup(String),
}

/// Malformed tool arguments or a failing downstream service. Scoped to one call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolDispatchError {
    #[error("malformed arguments for {tool}: {reason}")]
    MalformedArguments { tool: String, reason: String },
    #[error("'{0}' is not an available document")]
    FileNotAllowed(String),
    #[error("{service} service failed: {message}")]
    Service {
        service: &'static str,
        message: String,
    },
}

/// An `error` event sent by the remote endpoint.
#[derive(Debug, Clone, Error, Deserialize, PartialEq)]
#[error("remote error ({kind}): {message}")]
pub struct RemoteProtocolError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl RemoteProtocolError {
    /// Codes that mean the session itself is gone, as opposed to a rejected request.
    const CONNECTION_CODES: &'static [&'static str] =
        &["session_expired", "connection_error", "websocket_error"];

    pub fn is_connection_error(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| Self::CONNECTION_CODES.contains(&code))
    }
}

/// Everything `connect()` can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Media(#[from] MediaAccessError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("session is already {0}")]
    Busy(ConnectionState),
}
