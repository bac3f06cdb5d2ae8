//! Session lifecycle: connecting, tearing down, reconnecting, and the single
//! event loop that feeds the assembler and the tool dispatcher.
//!
//! All inbound events are handled on the task that runs
//! [`SessionController::run`], one at a time and in delivery order. Tool
//! invocations are the only work that leaves this task; their results come
//! back through a channel tagged with the session they were started under.

use crate::{
    assembler::{FlushPolicy, TranscriptAssembler},
    error::{ChannelError, SessionError},
    events::{ClientEvent, ServerEvent},
    tools::{
        Dispatch, OutboundStep, ToolDispatcher, ToolEffects, ToolInvocation, ToolResult, ToolServices,
        execute,
    },
    transcript::{RenderOp, RenderSink, Transcript, TurnDraft, apply_ops},
    transport::{
        ChannelEvent, ChannelHandle, CredentialProvider, MediaCapture, MediaSource, Transport,
    },
};
use chrono::Utc;
use std::{fmt, future, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until, timeout},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_VOICE: &str = "sage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Errored => write!(f, "errored"),
        }
    }
}

/// Voice and instructions a session is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub voice: String,
    pub instructions: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            instructions: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Wait between an unexpected closure and the reconnect attempt.
    pub reconnect_backoff: Duration,
    /// Automatic reconnects allowed since the last user-initiated connect.
    pub max_reconnects: u32,
    /// How long a follow-up waits for the item acknowledgment.
    pub follow_up_fallback: Duration,
    pub ready_timeout: Duration,
    pub flush: FlushPolicy,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(2),
            max_reconnects: 3,
            follow_up_fallback: Duration::from_millis(100),
            ready_timeout: Duration::from_secs(10),
            flush: FlushPolicy::default(),
        }
    }
}

/// Requests from the user-facing front end.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect,
    Disconnect,
    SetVoice(String),
    SetInstructions(Option<String>),
    /// A typed user message.
    SendText(String),
    /// A status note added to the transcript.
    Note(String),
    /// An image the user shared, already checked by the front end.
    ShareImage { location: String, caption: String },
    Shutdown,
}

/// Collaborators the controller reaches through traits.
#[derive(Clone)]
pub struct SessionServices {
    pub credentials: Arc<dyn CredentialProvider>,
    /// `None` runs without a microphone.
    pub media: Option<Arc<dyn MediaSource>>,
    pub transport: Arc<dyn Transport>,
    pub tools: Arc<dyn ToolServices>,
}

/// A tool result tagged with the session that started the call.
#[derive(Debug)]
pub struct ToolCompletion {
    pub session_id: Uuid,
    pub result: ToolResult,
}

struct Session {
    id: Uuid,
    channel: ChannelHandle,
    capture: Option<Box<dyn MediaCapture>>,
}

impl Session {
    /// Returns the handle of the channel's closing task.
    fn release(self) -> JoinHandle<()> {
        if let Some(capture) = self.capture {
            if let Err(e) = capture.release() {
                warn!(error = ?e, "Failed to release audio capture");
            }
        }
        self.channel.close()
    }
}

struct FollowUp {
    item_id: String,
    event: ClientEvent,
    deadline: Instant,
}

enum Wake {
    Command(Option<Command>),
    Channel(Option<ChannelEvent>),
    ToolDone(ToolCompletion),
    Deadline,
}

pub struct SessionController {
    config: SessionConfig,
    staged: Option<SessionConfig>,
    policy: SessionPolicy,
    state: ConnectionState,
    services: SessionServices,
    sink: Box<dyn RenderSink>,
    assembler: TranscriptAssembler,
    dispatcher: ToolDispatcher,
    session: Option<Session>,
    follow_ups: Vec<FollowUp>,
    reconnect_at: Option<Instant>,
    reconnects: u32,
    /// The last torn-down channel, awaited before `run` returns.
    closing: Option<JoinHandle<()>>,
    results_tx: mpsc::UnboundedSender<ToolCompletion>,
    results_rx: mpsc::UnboundedReceiver<ToolCompletion>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        policy: SessionPolicy,
        services: SessionServices,
        sink: Box<dyn RenderSink>,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            config,
            staged: None,
            assembler: TranscriptAssembler::new(policy.flush),
            policy,
            state: ConnectionState::Disconnected,
            services,
            sink,
            dispatcher: ToolDispatcher::new(),
            session: None,
            follow_ups: Vec::new(),
            reconnect_at: None,
            reconnects: 0,
            closing: None,
            results_tx,
            results_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Configuration waiting for the next connect.
    pub fn staged_config(&self) -> Option<&SessionConfig> {
        self.staged.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        self.assembler.transcript()
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// User-initiated connect. Resets the automatic reconnect budget.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.reconnects = 0;
        self.reconnect_at = None;
        self.start().await
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(SessionError::Busy(self.state));
        }
        if let Some(staged) = self.staged.take() {
            info!(voice = %staged.voice, "Applying staged session configuration");
            self.config = staged;
        }
        self.set_state(ConnectionState::Connecting);

        match self.establish().await {
            Ok((session, early)) => {
                info!(session_id = %session.id, voice = %self.config.voice, "Session connected");
                self.session = Some(session);
                self.set_state(ConnectionState::Connected);
                let now = Instant::now();
                for raw in early {
                    self.handle_raw(&raw, now);
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to connect");
                self.set_state(ConnectionState::Errored);
                self.note(format!("Connection failed: {e}"));
                Err(e)
            }
        }
    }

    /// Acquires credential, capture and channel in order. Anything acquired
    /// before a failure is released before the error is returned.
    async fn establish(&mut self) -> Result<(Session, Vec<String>), SessionError> {
        let token = self.services.credentials.mint(&self.config).await?;

        let mut capture = match &self.services.media {
            Some(media) => Some(media.acquire().await?),
            None => None,
        };
        let frames = capture.as_mut().and_then(|c| c.take_frames());

        let channel = match self
            .services
            .transport
            .open(token, &self.config, frames)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                if let Some(capture) = capture {
                    if let Err(release) = capture.release() {
                        warn!(error = ?release, "Failed to release audio capture");
                    }
                }
                return Err(e.into());
            }
        };

        let mut session = Session {
            id: Uuid::new_v4(),
            channel,
            capture,
        };
        let ready = timeout(
            self.policy.ready_timeout,
            wait_until_open(&mut session.channel),
        )
        .await;
        match ready {
            Ok(Ok(early)) => Ok((session, early)),
            Ok(Err(e)) => {
                session.release();
                Err(e.into())
            }
            Err(_) => {
                session.release();
                Err(ChannelError::ReadyTimeout(self.policy.ready_timeout).into())
            }
        }
    }

    /// Releases everything the session owns. Safe to call in any state.
    pub fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.teardown();
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn teardown(&mut self) {
        let ops = self.assembler.reset();
        self.render(ops);
        self.dispatcher.clear();
        self.follow_ups.clear();
        if let Some(session) = self.session.take() {
            info!(session_id = %session.id, "Tearing down session");
            self.closing = Some(session.release());
        }
    }

    /// Takes effect on the next connect when a session is live.
    pub fn set_voice(&mut self, voice: impl Into<String>) {
        let voice = voice.into();
        self.stage(|config| config.voice = voice);
    }

    pub fn set_instructions(&mut self, instructions: Option<String>) {
        self.stage(|config| config.instructions = instructions);
    }

    fn stage(&mut self, change: impl FnOnce(&mut SessionConfig)) {
        if self.session.is_none() {
            change(&mut self.config);
            return;
        }
        let mut staged = self.staged.take().unwrap_or_else(|| self.config.clone());
        change(&mut staged);
        self.staged = Some(staged);
        self.note("Configuration change will apply on the next connect.".to_string());
    }

    /// Sends `event` when the channel is ready. Otherwise the event is dropped.
    pub fn send(&mut self, event: ClientEvent) -> bool {
        let kind = event.type_name();
        let Some(session) = self
            .session
            .as_ref()
            .filter(|_| self.state == ConnectionState::Connected)
        else {
            warn!(event = kind, state = %self.state, "Dropping outbound event; channel not ready");
            return false;
        };
        match session.channel.outbound.try_send(event) {
            Ok(()) => {
                debug!(event = kind, "Sent outbound event");
                true
            }
            Err(e) => {
                warn!(event = kind, error = %e, "Dropping outbound event");
                false
            }
        }
    }

    pub fn send_text(&mut self, text: String) {
        if self.state != ConnectionState::Connected {
            self.note("Not connected; message not sent.".to_string());
            return;
        }
        if self.send(ClientEvent::message(None, "user", text)) {
            self.send(ClientEvent::respond_default());
        }
    }

    /// Shows a user-shared image in the transcript. It stays local to the
    /// transcript and is not sent to the endpoint.
    pub fn share_image(&mut self, location: String, caption: String) {
        info!(%location, "User shared an image");
        let ops = self
            .assembler
            .append_turn(TurnDraft::shared_image(location, caption));
        self.render(ops);
    }

    /// Adds a status turn to the transcript.
    pub fn note(&mut self, text: String) {
        let ops = self.assembler.append_turn(TurnDraft::status(text));
        self.render(ops);
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent, now: Instant) {
        match event {
            ChannelEvent::Open => debug!("Channel reported ready again"),
            ChannelEvent::Message(raw) => self.handle_raw(&raw, now),
            ChannelEvent::Closed { reason } => self.on_channel_lost(&reason, now),
        }
    }

    fn handle_raw(&mut self, raw: &str, now: Instant) {
        match ServerEvent::parse(raw) {
            Ok(event) => self.handle_event(event, now),
            Err(e) => warn!(error = %e, "Dropping unparseable inbound event"),
        }
    }

    pub fn handle_event(&mut self, event: ServerEvent, now: Instant) {
        let ops = self.assembler.handle(&event, now);
        self.render(ops);

        match event {
            ServerEvent::SessionCreated { .. } => info!("Remote session created"),
            ServerEvent::SessionUpdated { .. } => debug!("Remote session updated"),
            ServerEvent::OutputItemAdded { item } if item.kind == "function_call" => {
                if let (Some(call_id), Some(name)) = (item.call_id, item.name) {
                    self.dispatcher.on_output_item(&call_id, &name);
                }
            }
            ServerEvent::FunctionCallArgumentsDelta { call_id, delta } => {
                self.dispatcher.on_argument_fragment(&call_id, None, &delta);
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => match self
                .dispatcher
                .on_arguments_complete(&call_id, name.as_deref(), &arguments)
            {
                Dispatch::Invoke(invocation) => self.start_dispatch(invocation),
                Dispatch::Resolved(effects) => self.apply_effects(effects, now),
                Dispatch::Ignored => {}
            },
            ServerEvent::ConversationItemCreated { item } => {
                if let Some(id) = item.id {
                    self.acknowledge(&id);
                }
            }
            ServerEvent::Error { error } => {
                warn!(kind = %error.kind, code = ?error.code, message = %error.message, "Remote endpoint reported an error");
                self.note(format!("Remote error: {}", error.message));
                if error.is_connection_error() {
                    self.on_channel_lost(&error.to_string(), now);
                }
            }
            _ => {}
        }
    }

    fn start_dispatch(&mut self, invocation: ToolInvocation) {
        let Some(session_id) = self.session.as_ref().map(|s| s.id) else {
            warn!(call_id = %invocation.call_id(), "No live session; dropping tool call");
            return;
        };
        self.sink
            .status_line(&format!("Running {}", invocation.tool_name()));
        let services = Arc::clone(&self.services.tools);
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = execute(invocation, services.as_ref()).await;
            if results.send(ToolCompletion { session_id, result }).is_err() {
                debug!("Controller gone; discarding tool result");
            }
        });
    }

    /// Applies a finished tool call if its session is still live.
    pub fn handle_tool_result(&mut self, completion: ToolCompletion, now: Instant) {
        let live = self
            .session
            .as_ref()
            .is_some_and(|s| s.id == completion.session_id);
        if !live {
            info!(session_id = %completion.session_id, "Dropping tool result for a session that has ended");
            return;
        }
        let effects = self.dispatcher.resolve(completion.result, Utc::now());
        self.apply_effects(effects, now);
    }

    fn apply_effects(&mut self, effects: ToolEffects, now: Instant) {
        for draft in effects.turns {
            let ops = self.assembler.append_turn(draft);
            self.render(ops);
        }
        for step in effects.outbound {
            match step {
                OutboundStep::Send(event) => {
                    self.send(event);
                }
                OutboundStep::AfterAck { item_id, event } => self.follow_ups.push(FollowUp {
                    item_id,
                    event,
                    deadline: now + self.policy.follow_up_fallback,
                }),
            }
        }
    }

    fn acknowledge(&mut self, item_id: &str) {
        if let Some(pos) = self.follow_ups.iter().position(|f| f.item_id == item_id) {
            let follow_up = self.follow_ups.remove(pos);
            debug!(%item_id, "Item acknowledged; sending follow-up");
            self.send(follow_up.event);
        }
    }

    fn on_channel_lost(&mut self, reason: &str, now: Instant) {
        if self.session.is_none() {
            return;
        }
        warn!(%reason, "Channel closed unexpectedly");
        self.teardown();
        if self.reconnects >= self.policy.max_reconnects {
            error!(attempts = self.reconnects, "Reconnect limit reached");
            self.set_state(ConnectionState::Errored);
            self.note(format!(
                "Connection lost ({reason}). Not reconnecting after {} attempts.",
                self.reconnects
            ));
            return;
        }
        self.reconnects += 1;
        self.reconnect_at = Some(now + self.policy.reconnect_backoff);
        self.set_state(ConnectionState::Disconnected);
        self.note(format!(
            "Connection lost ({reason}). Reconnecting in {}s.",
            self.policy.reconnect_backoff.as_secs()
        ));
    }

    /// Earliest pending timer: idle flush, follow-up fallback or reconnect.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.assembler.flush_deadline(),
            self.follow_ups.iter().map(|f| f.deadline).min(),
            self.reconnect_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub async fn on_deadline(&mut self, now: Instant) {
        if self.assembler.flush_deadline().is_some_and(|d| d <= now) {
            let ops = self.assembler.on_flush_deadline(now);
            self.render(ops);
        }

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.follow_ups)
            .into_iter()
            .partition(|f| f.deadline <= now);
        self.follow_ups = waiting;
        for follow_up in due {
            debug!(item_id = %follow_up.item_id, "No acknowledgment; sending follow-up");
            self.send(follow_up.event);
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            info!(attempt = self.reconnects, "Reconnecting");
            // One attempt per closure; a failure is already surfaced.
            let _ = self.start().await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                let _ = self.connect().await;
            }
            Command::Disconnect => self.disconnect(),
            Command::SetVoice(voice) => self.set_voice(voice),
            Command::SetInstructions(instructions) => self.set_instructions(instructions),
            Command::SendText(text) => self.send_text(text),
            Command::Note(text) => self.note(text),
            Command::ShareImage { location, caption } => self.share_image(location, caption),
            Command::Shutdown => self.disconnect(),
        }
    }

    /// Drives the session until `commands` closes or a shutdown arrives.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let deadline = self.next_deadline();
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                event = next_channel_event(self.session.as_mut()) => Wake::Channel(event),
                Some(done) = self.results_rx.recv() => Wake::ToolDone(done),
                _ = sleep_until_deadline(deadline) => Wake::Deadline,
            };
            let now = Instant::now();
            match wake {
                Wake::Command(None) | Wake::Command(Some(Command::Shutdown)) => {
                    self.disconnect();
                    break;
                }
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Channel(Some(event)) => self.handle_channel_event(event, now),
                Wake::Channel(None) => self.on_channel_lost("event channel ended", now),
                Wake::ToolDone(done) => self.handle_tool_result(done, now),
                Wake::Deadline => self.on_deadline(now).await,
            }
        }
        if let Some(closing) = self.closing.take() {
            let _ = closing.await;
        }
        info!("Session controller stopped");
    }

    fn set_state(&mut self, state: ConnectionState) {
        info!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        self.sink.status_line(&state.to_string());
    }

    fn render(&mut self, ops: Vec<RenderOp>) {
        apply_ops(self.sink.as_mut(), ops);
    }
}

async fn wait_until_open(channel: &mut ChannelHandle) -> Result<Vec<String>, ChannelError> {
    let mut early = Vec::new();
    loop {
        match channel.events.recv().await {
            Some(ChannelEvent::Open) => return Ok(early),
            Some(ChannelEvent::Message(raw)) => early.push(raw),
            Some(ChannelEvent::Closed { reason }) => {
                return Err(ChannelError::ClosedDuringSetup(reason));
            }
            None => {
                return Err(ChannelError::ClosedDuringSetup(
                    "event channel dropped".to_string(),
                ));
            }
        }
    }
}

async fn next_channel_event(session: Option<&mut Session>) -> Option<ChannelEvent> {
    match session {
        Some(session) => session.channel.events.recv().await,
        None => future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
