//! The conversation log and the seam to whatever renders it.

use crate::contract::Citation;
use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
    System,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
            Speaker::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Speech,
    Status,
    Image,
    CitationList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Streaming,
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPayload {
    Text(String),
    Image { url: String, prompt: String },
    Citations(Vec<Citation>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TurnId(pub u64);

/// One attributable unit of transcript content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: TurnId,
    pub speaker: Speaker,
    pub kind: TurnKind,
    pub payload: TurnPayload,
    pub status: TurnStatus,
}

impl Turn {
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            TurnPayload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status == TurnStatus::Streaming
    }

    /// Plain-text rendering used for logs and transcript comparisons.
    pub fn plain(&self) -> String {
        match &self.payload {
            TurnPayload::Text(text) => format!("{}: {}", self.speaker, text),
            TurnPayload::Image { url, prompt } => {
                format!("{}: [image] {} ({})", self.speaker, url, prompt)
            }
            TurnPayload::Citations(citations) => {
                let lines: Vec<String> = citations
                    .iter()
                    .map(|c| format!("[{}] {} <{}>", c.number, c.title, c.url))
                    .collect();
                format!("{}: {}", self.speaker, lines.join(" "))
            }
        }
    }
}

/// A turn that has not been placed in a transcript yet.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnDraft {
    pub speaker: Speaker,
    pub kind: TurnKind,
    pub payload: TurnPayload,
}

impl TurnDraft {
    pub fn speech(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            kind: TurnKind::Speech,
            payload: TurnPayload::Text(text.into()),
        }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::System,
            kind: TurnKind::Status,
            payload: TurnPayload::Text(text.into()),
        }
    }

    pub fn image(url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            kind: TurnKind::Image,
            payload: TurnPayload::Image {
                url: url.into(),
                prompt: prompt.into(),
            },
        }
    }

    /// An image the user shared into the conversation.
    pub fn shared_image(location: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            kind: TurnKind::Image,
            payload: TurnPayload::Image {
                url: location.into(),
                prompt: caption.into(),
            },
        }
    }

    pub fn citations(citations: Vec<Citation>) -> Self {
        Self {
            speaker: Speaker::System,
            kind: TurnKind::CitationList,
            payload: TurnPayload::Citations(citations),
        }
    }
}

/// Ordered, append-only sequence of turns. Only a streaming last turn may
/// still change.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    turns: Vec<Turn>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, draft: TurnDraft, status: TurnStatus) -> Turn {
        debug_assert!(
            self.streaming().is_none(),
            "a streaming turn must be finalized before another is appended"
        );
        self.next_id += 1;
        let turn = Turn {
            id: TurnId(self.next_id),
            speaker: draft.speaker,
            kind: draft.kind,
            payload: draft.payload,
            status,
        };
        self.turns.push(turn.clone());
        turn
    }

    /// Replaces the text of the streaming last turn. Returns `None` when `id`
    /// is not the streaming last turn.
    pub(crate) fn set_streaming_text(&mut self, id: TurnId, text: &str) -> Option<&Turn> {
        let turn = self.turns.last_mut().filter(|t| t.id == id && t.is_streaming())?;
        turn.payload = TurnPayload::Text(text.to_string());
        Some(turn)
    }

    pub(crate) fn finalize(&mut self, id: TurnId) -> Option<&Turn> {
        let turn = self.turns.last_mut().filter(|t| t.id == id && t.is_streaming())?;
        turn.status = TurnStatus::Final;
        Some(turn)
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.id == id)
    }

    pub fn streaming(&self) -> Option<&Turn> {
        self.turns.last().filter(|t| t.is_streaming())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// One line per turn.
    pub fn render_text(&self) -> String {
        self.turns
            .iter()
            .map(Turn::plain)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the render layer is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Append(Turn),
    /// Replace the already-rendered turn with the same id.
    Update(Turn),
}

/// The visual transcript. The render layer owns the mapping from turn ids to
/// whatever it displays; it may drop that mapping at any time.
pub trait RenderSink: Send {
    fn append(&mut self, turn: &Turn);

    /// Returns `false` when the sink no longer knows `turn.id`.
    fn update(&mut self, turn: &Turn) -> bool;

    fn status_line(&mut self, text: &str);
}

/// Applies `ops` in order; an update against a discarded turn becomes an append.
pub fn apply_ops(sink: &mut dyn RenderSink, ops: Vec<RenderOp>) {
    for op in ops {
        match op {
            RenderOp::Append(turn) => sink.append(&turn),
            RenderOp::Update(turn) => {
                if !sink.update(&turn) {
                    debug!(turn_id = turn.id.0, "Render handle is stale; appending instead");
                    sink.append(&turn);
                }
            }
        }
    }
}
