//! Recognition session: streams captured audio to the gateway and forwards
//! recognized text.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::client::{self, Config, Sequence, Stats};
use crate::types::{self, Payload, RecognitionRequest, ServerResponse};
use crate::utils::audio::{self, AudioChunker, LevelMeter, INPUT_CHUNK_SIZE, TARGET_SAMPLE_RATE};
use crate::utils::CaptureStream;

/// Receives each recognized text. Called from the session's receive task.
pub type ResultCallback = Arc<dyn Fn(String) + Send + Sync>;

const STOP_GRACE: Duration = Duration::from_secs(2);

pub struct RecognitionSession {
    reqid: String,
    stop_tx: Option<oneshot::Sender<()>>,
    send_handle: Option<JoinHandle<()>>,
    recv_handle: Option<JoinHandle<()>>,
    stats: Arc<Mutex<Stats>>,
}

impl RecognitionSession {
    /// Connects, sends the opening request and starts streaming `capture`.
    /// The capture stream is released when the session ends.
    pub async fn start(
        config: &Config,
        capture: CaptureStream,
        on_result: ResultCallback,
    ) -> anyhow::Result<Self> {
        let ws_stream = client::connect(config.recognition_url(), config).await?;
        let (mut write, read) = ws_stream.split();

        let reqid = uuid::Uuid::new_v4().to_string();
        let mut sequence = Sequence::new();
        let request = RecognitionRequest::new(config.uid(), reqid.clone())
            .with_model(config.model())
            .with_sequence(sequence.next());
        let frame = types::encode_full_request(&request)?;

        let stats = Arc::new(Mutex::new(Stats::new()));
        let frame_len = frame.len();
        write
            .send(Message::Binary(frame.into()))
            .await
            .context("failed to send recognition request")?;
        if let Ok(mut stats_guard) = stats.lock() {
            stats_guard.record_sent(frame_len);
        }
        tracing::info!("recognition session {} started", reqid);

        let (stop_tx, stop_rx) = oneshot::channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        let send_handle = tokio::spawn(send_audio(
            write,
            capture,
            sequence,
            stop_rx,
            closed_rx,
            stats.clone(),
        ));
        let recv_handle = tokio::spawn(receive_results(read, on_result, closed_tx, stats.clone()));

        Ok(Self {
            reqid,
            stop_tx: Some(stop_tx),
            send_handle: Some(send_handle),
            recv_handle: Some(recv_handle),
            stats,
        })
    }

    pub fn reqid(&self) -> &str {
        &self.reqid
    }

    pub fn stats(&self) -> Stats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Sends the final frame, closes the connection and releases capture.
    /// Stopping twice is a no-op.
    pub async fn stop(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(());

        if let Some(mut handle) = self.send_handle.take() {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                tracing::warn!("recognition session {} did not close in time", self.reqid);
                handle.abort();
            }
        }
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }

        let stats = self.stats();
        tracing::info!(
            "recognition session {} stopped. frames sent: {}, bytes sent: {}, frames received: {}",
            self.reqid,
            stats.frames_sent(),
            stats.bytes_sent(),
            stats.frames_received()
        );
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        // the send task sees the dropped stop channel and closes on its own
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
    }
}

async fn send_frame<S>(write: &mut S, frame: Vec<u8>, stats: &Mutex<Stats>) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let len = frame.len();
    match write.send(Message::Binary(frame.into())).await {
        Ok(()) => {
            if let Ok(mut stats_guard) = stats.lock() {
                stats_guard.record_sent(len);
            }
            true
        }
        Err(e) => {
            tracing::error!("failed to send audio frame: {}", e);
            false
        }
    }
}

fn encode_chunk(chunk: &[f32], native_rate: u32, sequence: i32) -> Option<Vec<u8>> {
    let downsampled = audio::downsample(chunk, native_rate, TARGET_SAMPLE_RATE);
    let pcm = audio::quantize_pcm16(&downsampled);
    match types::encode_audio_frame(&pcm, sequence, false) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!("failed to encode audio frame: {}", e);
            None
        }
    }
}

async fn send_audio<S>(
    mut write: S,
    mut capture: CaptureStream,
    mut sequence: Sequence,
    mut stop_rx: oneshot::Receiver<()>,
    mut closed_rx: oneshot::Receiver<()>,
    stats: Arc<Mutex<Stats>>,
) where
    S: futures_util::Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    let native_rate = capture.sample_rate();
    let mut chunker = AudioChunker::new(INPUT_CHUNK_SIZE);
    let mut meter = LevelMeter::default();
    let mut capturing = true;

    'stream: loop {
        tokio::select! {
            _ = &mut stop_rx => {
                // a dropped session counts as a stop
                match types::encode_audio_frame(&[], sequence.next(), true) {
                    Ok(frame) => {
                        tracing::debug!("sending final audio frame");
                        send_frame(&mut write, frame, &stats).await;
                    }
                    Err(e) => tracing::error!("failed to encode final frame: {}", e),
                }
                break 'stream;
            }
            _ = &mut closed_rx => {
                tracing::debug!("recognition exchange ended by gateway");
                break 'stream;
            }
            block = capture.recv(), if capturing => {
                let Some(samples) = block else {
                    tracing::warn!("capture stream ended");
                    capturing = false;
                    continue;
                };
                for chunk in chunker.push(&samples) {
                    if let Some(report) = meter.observe(&chunk) {
                        tracing::debug!(
                            "audio level avg: {:.4}, max seen: {:.4}",
                            report.average,
                            report.peak
                        );
                        if report.is_low() {
                            tracing::warn!("audio level very low, check the microphone");
                        }
                    }
                    let Some(frame) = encode_chunk(&chunk, native_rate, sequence.next()) else {
                        continue;
                    };
                    if !send_frame(&mut write, frame, &stats).await {
                        break 'stream;
                    }
                }
            }
        }
    }

    if let Err(e) = write.close().await {
        tracing::debug!("close after recognition failed: {}", e);
    }
    drop(capture);
}

async fn receive_results<R>(
    mut read: R,
    on_result: ResultCallback,
    closed_tx: oneshot::Sender<()>,
    stats: Arc<Mutex<Stats>>,
) where
    R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut last_text: Option<String> = None;

    while let Some(message) = read.next().await {
        let message = match message {
            Err(e) => {
                tracing::error!("failed to read message: {}", e);
                break;
            }
            Ok(message) => message,
        };
        let bytes = match message {
            Message::Binary(bytes) => bytes,
            Message::Close(reason) => {
                tracing::info!("connection closed: {:?}", reason);
                break;
            }
            Message::Text(text) => {
                tracing::warn!("unexpected text message: {}", text);
                continue;
            }
            _ => continue,
        };
        if let Ok(mut stats_guard) = stats.lock() {
            stats_guard.record_received(bytes.len());
        }

        let frame = match types::decode_frame(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("dropping malformed frame: {}", e);
                continue;
            }
        };
        tracing::debug!("received {:?}, seq={:?}", frame.message_type(), frame.sequence());
        let is_last = frame.is_last();

        match frame.into_payload() {
            Payload::Json(value) => match serde_json::from_value::<ServerResponse>(value) {
                Ok(response) if response.is_error() => {
                    tracing::error!(
                        "recognition error {:?}: {}",
                        response.code(),
                        response.message().unwrap_or("unknown")
                    );
                    break;
                }
                Ok(response) => {
                    if let Some(text) = response.text() {
                        if last_text.as_deref() != Some(text) {
                            tracing::info!("recognized: {}", text);
                            last_text = Some(text.to_string());
                            on_result(text.to_string());
                        }
                    }
                }
                Err(e) => tracing::warn!("unexpected recognition payload: {}", e),
            },
            Payload::Error(text) => {
                tracing::error!("gateway error: {}", text);
                break;
            }
            _ => tracing::debug!("ignoring non-structured payload"),
        }

        if is_last {
            tracing::debug!("final recognition frame received");
            break;
        }
    }

    let _ = closed_tx.send(());
}
