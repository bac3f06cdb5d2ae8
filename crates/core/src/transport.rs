//! Seams between the lifecycle controller and the outside world.

use crate::{
    error::{ChannelError, CredentialError, MediaAccessError},
    events::ClientEvent,
    lifecycle::SessionConfig,
};
use async_trait::async_trait;
use secrecy::SecretString;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::debug;

/// How long a closing pump may take to say goodbye before it is aborted.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Single-use credential for the realtime endpoint. Never persisted.
#[derive(Debug, Clone)]
pub struct EphemeralToken {
    pub value: SecretString,
    pub expires_at: Option<i64>,
}

impl EphemeralToken {
    pub fn new(value: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at,
        }
    }
}

/// Mono PCM16 frames at 24 kHz.
pub type AudioFrames = mpsc::Receiver<Vec<i16>>;

/// A live capture. Frames can be taken once; `release` stops the device.
pub trait MediaCapture: Send {
    fn take_frames(&mut self) -> Option<AudioFrames>;

    fn release(self: Box<Self>) -> anyhow::Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn mint(&self, config: &SessionConfig) -> Result<EphemeralToken, CredentialError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn MediaCapture>, MediaAccessError>;
}

/// What the event channel reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel is ready for outbound events.
    Open,
    /// A raw inbound text frame.
    Message(String),
    Closed { reason: String },
}

/// An open event channel. Dropping `outbound` asks the pump to close.
#[derive(Debug)]
pub struct ChannelHandle {
    pub events: mpsc::Receiver<ChannelEvent>,
    pub outbound: mpsc::Sender<ClientEvent>,
    pub task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Drops `outbound` so the pump can close the channel itself, and aborts
    /// the pump if it is still running after [`CLOSE_GRACE`]. The returned
    /// handle resolves once the pump is gone. Safe to call on a task that
    /// already finished.
    pub fn close(self) -> JoinHandle<()> {
        drop(self.outbound);
        let task = self.task;
        let abort = task.abort_handle();
        tokio::spawn(async move {
            if timeout(CLOSE_GRACE, task).await.is_err() {
                debug!("Channel pump did not stop in time; aborting");
                abort.abort();
            }
        })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        token: EphemeralToken,
        config: &SessionConfig,
        audio: Option<AudioFrames>,
    ) -> Result<ChannelHandle, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn handle(task: JoinHandle<()>, outbound: mpsc::Sender<ClientEvent>) -> ChannelHandle {
        let (_events_tx, events) = mpsc::channel(1);
        ChannelHandle {
            events,
            outbound,
            task,
        }
    }

    #[tokio::test]
    async fn test_close_lets_the_pump_finish_its_goodbye() {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(4);
        let (goodbye_tx, goodbye_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            while outbound_rx.recv().await.is_some() {}
            // Stands in for the close frame written after the sender drops.
            tokio::task::yield_now().await;
            let _ = goodbye_tx.send("close frame sent");
        });

        handle(task, outbound_tx).close().await.unwrap();
        assert_eq!(goodbye_rx.await.unwrap(), "close frame sent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_aborts_a_stuck_pump_after_the_grace_period() {
        let (outbound_tx, _outbound_rx) = mpsc::channel::<ClientEvent>(4);
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        let started = tokio::time::Instant::now();

        handle(task, outbound_tx).close().await.unwrap();
        assert!(started.elapsed() >= CLOSE_GRACE);
        // The aborted task dropped its sender.
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_close_after_the_pump_finished() {
        let (outbound_tx, _outbound_rx) = mpsc::channel::<ClientEvent>(4);
        let task = tokio::spawn(async {});
        tokio::task::yield_now().await;

        handle(task, outbound_tx).close().await.unwrap();
    }
}
