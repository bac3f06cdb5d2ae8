//! Microphone capture through `cpal`, resampled to mono PCM16 at 24 kHz.
//!
//! `cpal` streams are not `Send` on every platform, so each capture owns a
//! dedicated thread that builds the stream, resamples what the device
//! delivers and forwards frames to the realtime transport.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parley_core::{
    error::MediaAccessError,
    transport::{AudioFrames, MediaCapture, MediaSource},
};
use parley_realtime::REALTIME_PCM16_SAMPLE_RATE;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc,
    },
    thread::JoinHandle,
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Input samples handed to the resampler per call.
const RESAMPLER_CHUNK: usize = 480;
/// Frames buffered between the capture thread and the transport.
const FRAME_QUEUE: usize = 64;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1, // mono
    )?;
    Ok(resampler)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Averages interleaved channels down to one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Turns device-rate mono samples into 24 kHz PCM16.
pub struct FrameResampler {
    /// `None` when the device already runs at the target rate.
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl FrameResampler {
    pub fn new(input_rate: u32) -> anyhow::Result<Self> {
        let resampler = if input_rate == REALTIME_PCM16_SAMPLE_RATE {
            None
        } else {
            Some(create_resampler(
                input_rate as f64,
                REALTIME_PCM16_SAMPLE_RATE as f64,
                RESAMPLER_CHUNK,
            )?)
        };
        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    /// Returns whatever full chunks `samples` completed. Leftovers wait
    /// for the next call.
    pub fn push(&mut self, samples: &[f32]) -> anyhow::Result<Vec<i16>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(convert_f32_to_i16(samples));
        };
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let resampled = resampler.process(&[&self.pending[..needed]], None)?;
            self.pending.drain(..needed);
            if let Some(channel) = resampled.first() {
                output.extend(convert_f32_to_i16(channel));
            }
        }
        Ok(output)
    }
}

/// The default input device of the default host.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

#[async_trait]
impl MediaSource for CpalMicrophone {
    async fn acquire(&self) -> Result<Box<dyn MediaCapture>, MediaAccessError> {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("parley-capture".to_string())
            .spawn(move || capture_thread(frames_tx, thread_stop, ready_tx))
            .map_err(|e| MediaAccessError::Stream(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(CpalCapture {
                frames: Some(frames_rx),
                stop,
                thread: Some(thread),
            })),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => Err(MediaAccessError::Stream(
                "capture thread exited before the device opened".to_string(),
            )),
        }
    }
}

pub struct CpalCapture {
    frames: Option<AudioFrames>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MediaCapture for CpalCapture {
    fn take_frames(&mut self) -> Option<AudioFrames> {
        self.frames.take()
    }

    fn release(mut self: Box<Self>) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("audio capture thread panicked"))?;
        }
        info!("Microphone released");
        Ok(())
    }
}

fn open_stream(
    raw_tx: std_mpsc::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), MediaAccessError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(MediaAccessError::NoDevice)?;
    let supported = device
        .default_input_config()
        .map_err(|e| MediaAccessError::Denied(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(MediaAccessError::Stream(format!(
            "unsupported sample format {:?}",
            supported.sample_format()
        )));
    }

    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = raw_tx.send(downmix(data, channels));
            },
            |err| warn!(error = %err, "Audio input stream error"),
            None,
        )
        .map_err(|e| MediaAccessError::Denied(e.to_string()))?;
    stream
        .play()
        .map_err(|e| MediaAccessError::Stream(e.to_string()))?;

    info!(sample_rate, channels, "Microphone opened");
    Ok((stream, sample_rate))
}

fn capture_thread(
    frames_tx: mpsc::Sender<Vec<i16>>,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<(), MediaAccessError>>,
) {
    let (raw_tx, raw_rx) = std_mpsc::channel();
    let (stream, sample_rate) = match open_stream(raw_tx) {
        Ok(opened) => opened,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    let mut resampler = match FrameResampler::new(sample_rate) {
        Ok(resampler) => resampler,
        Err(err) => {
            let _ = ready.send(Err(MediaAccessError::Stream(err.to_string())));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::Relaxed) {
        match raw_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(samples) => match resampler.push(&samples) {
                Ok(frame) if frame.is_empty() => {}
                Ok(frame) => {
                    if frames_tx.try_send(frame).is_err() {
                        debug!("Dropping audio frame; the transport is behind or gone");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Resampling failed; stopping capture");
                    break;
                }
            },
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(stream);
}
