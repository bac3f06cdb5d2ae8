//! WebSocket transport to the realtime conversational endpoint.
//!
//! [`WebSocketTransport::open`] authenticates with the ephemeral token,
//! configures the session and then hands the socket to a pump task that
//! bridges it to the controller's channels.

pub mod pcm;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use parley_core::{
    SessionConfig,
    error::ChannelError,
    events::ClientEvent,
    transport::{AudioFrames, ChannelEvent, ChannelHandle, EphemeralToken, Transport},
};
use secrecy::ExposeSecret;
use std::future;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::Message,
    },
};
use tracing::{debug, info, instrument, warn};

pub use pcm::{REALTIME_PCM16_SAMPLE_RATE, encode_pcm16};

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

const EVENT_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket per session.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    model: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_REALTIME_URL, DEFAULT_REALTIME_MODEL)
    }
}

fn connect_error(error: impl ToString) -> ChannelError {
    ChannelError::Connect(error.to_string())
}

#[async_trait]
impl Transport for WebSocketTransport {
    #[instrument(skip_all, fields(endpoint = %self.endpoint()))]
    async fn open(
        &self,
        token: EphemeralToken,
        config: &SessionConfig,
        audio: Option<AudioFrames>,
    ) -> Result<ChannelHandle, ChannelError> {
        let mut request = self.endpoint().into_client_request().map_err(connect_error)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.value.expose_secret()))
            .map_err(connect_error)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (socket, _) = connect_async(request).await.map_err(connect_error)?;
        info!("Connected to realtime endpoint");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let setup = ClientEvent::session_update(config);
        let task = tokio::spawn(pump(socket, setup, outbound_rx, audio, events_tx));

        Ok(ChannelHandle {
            events: events_rx,
            outbound: outbound_tx,
            task,
        })
    }
}

async fn send_event(
    sink: &mut SplitSink<Socket, Message>,
    event: &ClientEvent,
) -> Result<(), String> {
    let text = serde_json::to_string(event).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}

async fn next_frame(audio: &mut Option<AudioFrames>) -> Option<Vec<i16>> {
    match audio {
        Some(frames) => frames.recv().await,
        None => future::pending().await,
    }
}

/// Bridges the socket to the controller until either side goes away.
async fn pump(
    socket: Socket,
    setup: ClientEvent,
    mut outbound: mpsc::Receiver<ClientEvent>,
    mut audio: Option<AudioFrames>,
    events: mpsc::Sender<ChannelEvent>,
) {
    let (mut sink, mut stream) = socket.split();

    if let Err(reason) = send_event(&mut sink, &setup).await {
        let _ = events.send(ChannelEvent::Closed { reason }).await;
        return;
    }
    if events.send(ChannelEvent::Open).await.is_err() {
        return;
    }

    let reason = loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(event) => {
                    if let Err(e) = send_event(&mut sink, &event).await {
                        break format!("send failed: {e}");
                    }
                }
                None => {
                    debug!("Outbound channel dropped; closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            frame = next_frame(&mut audio) => match frame {
                Some(samples) => {
                    let append = ClientEvent::InputAudioBufferAppend {
                        audio: encode_pcm16(&samples),
                    };
                    if let Err(e) = send_event(&mut sink, &append).await {
                        break format!("send failed: {e}");
                    }
                }
                None => {
                    debug!("Audio capture ended");
                    audio = None;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events.send(ChannelEvent::Message(text.to_string())).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by remote".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },
        }
    };

    warn!(%reason, "Realtime channel closed");
    let _ = events.send(ChannelEvent::Closed { reason }).await;
}
