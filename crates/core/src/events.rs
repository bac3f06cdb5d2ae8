//! Typed events exchanged with the realtime endpoint.
//!
//! Inbound events form a closed tagged union so the session loop can dispatch
//! with a single `match`. Tags this crate does not model deserialize to
//! [`ServerEvent::Unknown`] instead of failing.

use crate::{error::RemoteProtocolError, lifecycle::SessionConfig};
use serde::{Deserialize, Serialize};

/// Events sent by the remote conversational endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: serde_json::Value,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: serde_json::Value,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: ConversationItem },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptionDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        transcript: String,
    },
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: ResponseInfo,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },
    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta,
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { call_id: String, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated,
    #[serde(rename = "error")]
    Error { error: RemoteProtocolError },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConversationItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// Typed text carried by the item, if any (`input_text` / `text` parts).
    pub fn typed_text(&self) -> Option<String> {
        let text: Vec<&str> = self
            .content
            .iter()
            .filter(|part| matches!(part.kind.as_str(), "input_text" | "text"))
            .filter_map(|part| part.text.as_deref())
            .filter(|text| !text.trim().is_empty())
            .collect();
        (!text.is_empty()).then(|| text.join("\n"))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Events sent to the remote endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: NewItem },
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseOptions },
}

impl ClientEvent {
    /// Initial session settings; enables input transcription so user speech
    /// shows up in the transcript.
    pub fn session_update(config: &SessionConfig) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionSettings {
                modalities: default_modalities(),
                voice: Some(config.voice.clone()),
                instructions: config.instructions.clone(),
                input_audio_format: "pcm16".to_string(),
                input_audio_transcription: Some(TranscriptionSettings {
                    model: "whisper-1".to_string(),
                }),
                turn_detection: Some(TurnDetection {
                    kind: "server_vad".to_string(),
                }),
            },
        }
    }

    /// Ask for a new response, steered by `instructions`.
    pub fn respond(instructions: impl Into<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: ResponseOptions {
                modalities: default_modalities(),
                instructions: Some(instructions.into()),
                voice: None,
            },
        }
    }

    /// Ask for a new response with the session defaults.
    pub fn respond_default() -> Self {
        ClientEvent::ResponseCreate {
            response: ResponseOptions {
                modalities: default_modalities(),
                instructions: None,
                voice: None,
            },
        }
    }

    pub fn message(id: Option<String>, role: &str, text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: NewItem {
                id,
                kind: "message".to_string(),
                role: Some(role.to_string()),
                content: vec![NewContent {
                    kind: "input_text".to_string(),
                    text: text.into(),
                }],
                call_id: None,
                output: None,
            },
        }
    }

    pub fn function_output(id: String, call_id: &str, output: String) -> Self {
        ClientEvent::ConversationItemCreate {
            item: NewItem {
                id: Some(id),
                kind: "function_call_output".to_string(),
                role: None,
                content: Vec::new(),
                call_id: Some(call_id.to_string()),
                output: Some(output),
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
        }
    }
}

fn default_modalities() -> Vec<String> {
    vec!["text".to_string(), "audio".to_string()]
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSettings {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TranscriptionSettings {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseOptions {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<NewContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}
