//! cpal-backed [`AudioBackend`]. cpal streams are not `Send`, so every stream
//! lives on its own thread and is dropped there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::SampleFormat;
use ringbuf::traits::{Consumer, Producer, Split};

use crate::audio::{self, DecodedAudio};
use crate::backend::{AudioBackend, CaptureStream, SystemCheck};
use crate::device;

const CAPTURE_CHANNEL_CAPACITY: usize = 256;
const PLAYBACK_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_device(mut self, name: impl Into<String>) -> Self {
        self.input_device = Some(name.into());
        self
    }

    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }
}

/// Dropping this ends the capture thread, which drops the cpal stream.
struct CaptureGuard(std::sync::mpsc::Sender<()>);

fn open_input(
    device_name: Option<&str>,
    tx: tokio::sync::mpsc::Sender<Vec<f32>>,
) -> anyhow::Result<(cpal::Stream, u32)> {
    let input = device::get_or_default_input(device_name)?;
    let config = input.default_input_config().context("failed to get default input config")?;
    let channels = config.channels() as usize;
    let sample_rate = config.sample_rate().0;
    tracing::info!("input: device={:?}, {}ch, {}hz", input.name().ok(), channels, sample_rate);

    let err_fn = |err| tracing::error!("an error occurred on input stream: {}", err);
    let stream = match config.sample_format() {
        SampleFormat::F32 => input.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Err(e) = tx.try_send(audio::downmix(data, channels)) {
                    tracing::warn!("dropping capture block: {}", e);
                }
            },
            err_fn,
            None,
        )?,
        SampleFormat::I16 => input.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let data: Vec<f32> = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                if let Err(e) = tx.try_send(audio::downmix(&data, channels)) {
                    tracing::warn!("dropping capture block: {}", e);
                }
            },
            err_fn,
            None,
        )?,
        other => anyhow::bail!("unsupported input sample format: {:?}", other),
    };
    stream.play().context("failed to start input stream")?;
    Ok((stream, sample_rate))
}

fn play_blocking(
    device_name: Option<&str>,
    clip: DecodedAudio,
    gain: f32,
    done: &tokio::sync::oneshot::Sender<anyhow::Result<()>>,
) -> anyhow::Result<()> {
    let output = device::get_or_default_output(device_name)?;
    let config = output.default_output_config().context("failed to get default output config")?;
    if config.sample_format() != SampleFormat::F32 {
        anyhow::bail!("unsupported output sample format: {:?}", config.sample_format());
    }
    let channels = config.channels() as usize;
    let sample_rate = config.sample_rate().0;

    let mut samples = audio::resample(&clip.samples, clip.sample_rate, sample_rate)?;
    audio::apply_gain(&mut samples, gain);

    let (mut producer, mut consumer) = audio::shared_buffer(samples.len().max(1)).split();
    producer.push_slice(&samples);

    let drained = Arc::new(AtomicBool::new(false));
    let drained_flag = drained.clone();
    let stream = output.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels.max(1)) {
                let sample = match consumer.try_pop() {
                    Some(sample) => sample,
                    None => {
                        drained_flag.store(true, Ordering::Release);
                        0.0
                    }
                };
                frame.iter_mut().for_each(|out| *out = sample);
            }
        },
        |err| tracing::error!("an error occurred on output stream: {}", err),
        None,
    )?;
    stream.play().context("failed to start output stream")?;

    while !drained.load(Ordering::Acquire) {
        if done.is_closed() {
            tracing::debug!("playback cancelled");
            break;
        }
        std::thread::sleep(PLAYBACK_POLL);
    }
    Ok(())
}

#[async_trait::async_trait]
impl AudioBackend for CpalBackend {
    fn capture(&self) -> anyhow::Result<CaptureStream> {
        let (tx, rx) = tokio::sync::mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<u32>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let device_name = self.input_device.clone();

        std::thread::Builder::new()
            .name("scriptbuddy-capture".to_string())
            .spawn(move || {
                let stream = match open_input(device_name.as_deref(), tx) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // returns once the guard is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("capture stream released");
            })
            .context("failed to spawn capture thread")?;

        let sample_rate = ready_rx.recv().context("capture thread exited early")??;
        Ok(CaptureStream::new(rx, sample_rate).with_guard(CaptureGuard(stop_tx)))
    }

    async fn play(&self, clip: DecodedAudio, gain: f32) -> anyhow::Result<()> {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let device_name = self.output_device.clone();

        std::thread::Builder::new()
            .name("scriptbuddy-playback".to_string())
            .spawn(move || {
                let result = play_blocking(device_name.as_deref(), clip, gain, &done_tx);
                let _ = done_tx.send(result);
            })
            .context("failed to spawn playback thread")?;

        done_rx.await.context("playback thread exited early")?
    }

    fn check_system(&self) -> SystemCheck {
        let capture_available = device::get_or_default_input(self.input_device.as_deref())
            .and_then(|d| d.default_input_config().map_err(Into::into))
            .map_err(|e| tracing::warn!("capture check failed: {:#}", e))
            .is_ok();
        let playback_ready = device::get_or_default_output(self.output_device.as_deref())
            .and_then(|d| d.default_output_config().map_err(Into::into))
            .map_err(|e| tracing::warn!("playback check failed: {:#}", e))
            .is_ok();
        SystemCheck { capture_available, playback_ready }
    }
}
