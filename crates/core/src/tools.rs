//! Tool-call correlation and dispatch.
//!
//! The remote endpoint streams tool-call arguments as fragments, possibly
//! interleaving several calls. Fragments are correlated strictly by call id.
//! When a call's arguments are complete the dispatcher decides what to invoke;
//! the invocation itself runs off the event loop via [`execute`] and its result
//! comes back through [`ToolDispatcher::resolve`].

use crate::{
    contract::{Recency, SearchWebResponse, is_allowed_file},
    error::ToolDispatchError,
    events::ClientEvent,
    transcript::{Speaker, TurnDraft},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const GENERATE_IMAGE: &str = "generate_image";
pub const SEARCH_WEB: &str = "search_web";
pub const RETRIEVE_FILE: &str = "retrieve_file";

/// External capabilities a tool call can reach.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolServices: Send + Sync {
    /// Returns the URL of the generated image.
    async fn generate_image(&self, prompt: &str) -> Result<String, ToolDispatchError>;

    async fn search_web(
        &self,
        query: &str,
        recency: Option<Recency>,
    ) -> Result<SearchWebResponse, ToolDispatchError>;

    /// Returns the document content.
    async fn retrieve_file(&self, filename: &str) -> Result<String, ToolDispatchError>;
}

/// Arguments accumulated for one call that has not completed yet.
#[derive(Debug, Default, Clone)]
pub struct PendingToolCall {
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    GenerateImage {
        call_id: String,
        prompt: String,
    },
    SearchWeb {
        call_id: String,
        query: String,
        recency: Option<Recency>,
    },
    RetrieveFile {
        call_id: String,
        filename: String,
    },
}

impl ToolInvocation {
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolInvocation::GenerateImage { .. } => GENERATE_IMAGE,
            ToolInvocation::SearchWeb { .. } => SEARCH_WEB,
            ToolInvocation::RetrieveFile { .. } => RETRIEVE_FILE,
        }
    }

    pub fn call_id(&self) -> &str {
        match self {
            ToolInvocation::GenerateImage { call_id, .. }
            | ToolInvocation::SearchWeb { call_id, .. }
            | ToolInvocation::RetrieveFile { call_id, .. } => call_id,
        }
    }
}

/// Completed invocation, success or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Image {
        call_id: String,
        prompt: String,
        outcome: Result<String, ToolDispatchError>,
    },
    Search {
        call_id: String,
        query: String,
        outcome: Result<SearchWebResponse, ToolDispatchError>,
    },
    File {
        call_id: String,
        filename: String,
        outcome: Result<String, ToolDispatchError>,
    },
}

/// An outbound step produced by a resolved tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundStep {
    Send(ClientEvent),
    /// Send `event` once the endpoint acknowledges the item `item_id`.
    AfterAck { item_id: String, event: ClientEvent },
}

/// Transcript and conversation side effects of a tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolEffects {
    pub turns: Vec<TurnDraft>,
    pub outbound: Vec<OutboundStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Invoke(ToolInvocation),
    /// Resolved without reaching any service.
    Resolved(ToolEffects),
    Ignored,
}

/// The most recently generated image, kept for follow-up questions.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageContext {
    pub prompt: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ImageArgs {
    prompt: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    recency: Option<String>,
}

#[derive(Deserialize)]
struct FileArgs {
    filename: String,
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, raw: &str) -> Result<T, ToolDispatchError> {
    serde_json::from_str(raw).map_err(|e| ToolDispatchError::MalformedArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

fn new_item_id() -> String {
    // The endpoint caps item ids at 32 characters.
    format!("item_{}", &Uuid::new_v4().simple().to_string()[..24])
}

#[derive(Debug, Default)]
pub struct ToolDispatcher {
    pending: HashMap<String, PendingToolCall>,
    last_image: Option<ImageContext>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn argument_text(&self, call_id: &str) -> Option<&str> {
        self.pending.get(call_id).map(|p| p.arguments.as_str())
    }

    pub fn last_image(&self) -> Option<&ImageContext> {
        self.last_image.as_ref()
    }

    /// Forgets calls whose arguments never completed.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "Discarding incomplete tool calls");
        }
        self.pending.clear();
    }

    /// Records the tool name announced before any argument fragment.
    pub fn on_output_item(&mut self, call_id: &str, name: &str) {
        let entry = self.pending.entry(call_id.to_string()).or_default();
        entry.name = Some(name.to_string());
    }

    pub fn on_argument_fragment(&mut self, call_id: &str, name: Option<&str>, delta: &str) {
        let entry = self.pending.entry(call_id.to_string()).or_default();
        if let Some(name) = name {
            entry.name = Some(name.to_string());
        }
        entry.arguments.push_str(delta);
    }

    /// Closes the call `call_id` and decides what to do with it. The pending
    /// entry is removed whatever the outcome.
    pub fn on_arguments_complete(
        &mut self,
        call_id: &str,
        name: Option<&str>,
        arguments: &str,
    ) -> Dispatch {
        let pending = self.pending.remove(call_id).unwrap_or_default();
        let Some(name) = name.map(str::to_string).or(pending.name) else {
            warn!(%call_id, "Tool call completed without a tool name; ignoring");
            return Dispatch::Ignored;
        };
        let raw = if arguments.trim().is_empty() {
            pending.arguments
        } else {
            arguments.to_string()
        };
        let call_id = call_id.to_string();
        info!(%call_id, tool = %name, "Tool call arguments complete");

        match name.as_str() {
            GENERATE_IMAGE => match parse_args::<ImageArgs>(&name, &raw) {
                Ok(args) => Dispatch::Invoke(ToolInvocation::GenerateImage {
                    call_id,
                    prompt: args.prompt,
                }),
                Err(e) => Dispatch::Resolved(Self::malformed(e)),
            },
            SEARCH_WEB => match parse_args::<SearchArgs>(&name, &raw) {
                Ok(args) => {
                    let recency = args.recency.and_then(|r| match r.parse() {
                        Ok(recency) => Some(recency),
                        Err(e) => {
                            warn!(%call_id, error = %e, "Ignoring recency filter");
                            None
                        }
                    });
                    Dispatch::Invoke(ToolInvocation::SearchWeb {
                        call_id,
                        query: args.query,
                        recency,
                    })
                }
                Err(e) => Dispatch::Resolved(Self::malformed(e)),
            },
            RETRIEVE_FILE => match parse_args::<FileArgs>(&name, &raw) {
                Ok(args) if is_allowed_file(&args.filename) => {
                    Dispatch::Invoke(ToolInvocation::RetrieveFile {
                        call_id,
                        filename: args.filename,
                    })
                }
                Ok(args) => {
                    warn!(%call_id, filename = %args.filename, "Rejected file outside the allow-list");
                    let error = ToolDispatchError::FileNotAllowed(args.filename.clone());
                    Dispatch::Resolved(self.resolve(
                        ToolResult::File {
                            call_id,
                            filename: args.filename,
                            outcome: Err(error),
                        },
                        Utc::now(),
                    ))
                }
                Err(e) => Dispatch::Resolved(Self::malformed(e)),
            },
            other => {
                warn!(%call_id, tool = %other, "Ignoring call to unknown tool");
                Dispatch::Ignored
            }
        }
    }

    fn malformed(error: ToolDispatchError) -> ToolEffects {
        warn!(error = %error, "Dropping tool call with malformed arguments");
        ToolEffects {
            turns: vec![TurnDraft::status(format!("Tool call failed: {error}"))],
            outbound: Vec::new(),
        }
    }

    /// Turns a finished invocation into transcript turns and outbound events.
    pub fn resolve(&mut self, result: ToolResult, now: DateTime<Utc>) -> ToolEffects {
        match result {
            ToolResult::Image {
                call_id,
                prompt,
                outcome: Ok(url),
            } => {
                let context = ImageContext {
                    prompt: prompt.clone(),
                    url: url.clone(),
                    created_at: now,
                };
                let output = json!({
                    "url": context.url,
                    "prompt": context.prompt,
                    "created_at": context.created_at.to_rfc3339(),
                })
                .to_string();
                self.last_image = Some(context);
                let item_id = new_item_id();
                ToolEffects {
                    turns: vec![TurnDraft::image(url, prompt)],
                    outbound: vec![
                        OutboundStep::Send(ClientEvent::function_output(
                            item_id.clone(),
                            &call_id,
                            output,
                        )),
                        OutboundStep::AfterAck {
                            item_id,
                            event: ClientEvent::respond(
                                "The image is now shown to the user. Briefly describe what you created.",
                            ),
                        },
                    ],
                }
            }
            ToolResult::Image {
                outcome: Err(error),
                ..
            } => ToolEffects {
                turns: vec![TurnDraft::status(format!("Image generation failed: {error}"))],
                outbound: Vec::new(),
            },
            ToolResult::Search {
                call_id,
                outcome: Ok(found),
                ..
            } => {
                let mut turns = vec![TurnDraft::speech(Speaker::System, found.text.clone())];
                if !found.citations.is_empty() {
                    turns.push(TurnDraft::citations(found.citations.clone()));
                }
                let item_id = new_item_id();
                ToolEffects {
                    turns,
                    outbound: vec![
                        OutboundStep::Send(ClientEvent::function_output(
                            item_id.clone(),
                            &call_id,
                            json!({ "summary": found.text }).to_string(),
                        )),
                        OutboundStep::AfterAck {
                            item_id,
                            event: ClientEvent::respond(format!(
                                "Continue the response using this summary of current web results: {}",
                                found.text
                            )),
                        },
                    ],
                }
            }
            ToolResult::Search {
                query,
                outcome: Err(error),
                ..
            } => ToolEffects {
                turns: vec![TurnDraft::status(format!("Web search failed: {error}"))],
                outbound: vec![OutboundStep::Send(ClientEvent::respond(format!(
                    "Apologize briefly: the web search for \"{query}\" did not work right now. Offer to try again later."
                )))],
            },
            ToolResult::File {
                filename,
                outcome: Ok(content),
                ..
            } => {
                let item_id = new_item_id();
                ToolEffects {
                    turns: vec![TurnDraft::status(format!("Retrieved {filename}"))],
                    outbound: vec![
                        OutboundStep::Send(ClientEvent::message(
                            Some(item_id.clone()),
                            "system",
                            format!("Contents of {filename}:\n\n{content}"),
                        )),
                        OutboundStep::AfterAck {
                            item_id,
                            event: ClientEvent::respond(
                                "Answer the user's question using the document that was just added to the conversation.",
                            ),
                        },
                    ],
                }
            }
            ToolResult::File {
                filename,
                outcome: Err(error),
                ..
            } => {
                let item_id = new_item_id();
                ToolEffects {
                    turns: vec![TurnDraft::status(format!("File retrieval failed: {error}"))],
                    outbound: vec![
                        OutboundStep::Send(ClientEvent::message(
                            Some(item_id.clone()),
                            "system",
                            format!("Retrieving {filename} failed: {error}"),
                        )),
                        OutboundStep::AfterAck {
                            item_id,
                            event: ClientEvent::respond(
                                "Tell the user that the requested document could not be retrieved.",
                            ),
                        },
                    ],
                }
            }
        }
    }
}

/// Runs `invocation` against the external services. Never panics; every
/// failure is captured in the returned result.
pub async fn execute(invocation: ToolInvocation, services: &dyn ToolServices) -> ToolResult {
    match invocation {
        ToolInvocation::GenerateImage { call_id, prompt } => {
            let outcome = services.generate_image(&prompt).await;
            ToolResult::Image {
                call_id,
                prompt,
                outcome,
            }
        }
        ToolInvocation::SearchWeb {
            call_id,
            query,
            recency,
        } => {
            let outcome = services.search_web(&query, recency).await;
            ToolResult::Search {
                call_id,
                query,
                outcome,
            }
        }
        ToolInvocation::RetrieveFile { call_id, filename } => {
            let outcome = if is_allowed_file(&filename) {
                services.retrieve_file(&filename).await
            } else {
                Err(ToolDispatchError::FileNotAllowed(filename.clone()))
            };
            ToolResult::File {
                call_id,
                filename,
                outcome,
            }
        }
    }
}
