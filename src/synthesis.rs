//! Synthesis session: submits one text and collects the audio fragments the
//! gateway streams back.

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::client::{self, Config, Stats, WsStream};
use crate::types::{self, Payload, ServerResponse, SynthesisRequest};

pub struct SynthesisSession {
    reqid: String,
    ws_stream: Option<WsStream>,
    audio: Vec<u8>,
    stats: Stats,
}

impl SynthesisSession {
    pub async fn start(config: &Config, text: &str) -> anyhow::Result<Self> {
        let mut ws_stream = client::connect(config.synthesis_url(), config).await?;

        let reqid = uuid::Uuid::new_v4().to_string();
        let request = SynthesisRequest::new(config.uid(), reqid.clone(), text)
            .with_voice(config.voice())
            .with_encoding(config.encoding(), config.synthesis_rate());
        let frame = types::encode_full_request(&request)?;

        let mut stats = Stats::new();
        stats.record_sent(frame.len());
        ws_stream
            .send(Message::Binary(frame.into()))
            .await
            .context("failed to send synthesis request")?;
        tracing::info!("synthesis session {} started ({} chars)", reqid, text.chars().count());

        Ok(Self {
            reqid,
            ws_stream: Some(ws_stream),
            audio: Vec::new(),
            stats,
        })
    }

    pub fn reqid(&self) -> &str {
        &self.reqid
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Reads until the final frame or until the connection closes and returns
    /// the concatenated audio. Transport and protocol failures end the read
    /// early; whatever arrived so far is returned, possibly nothing.
    pub async fn collect_audio(&mut self) -> Vec<u8> {
        if let Some(ws_stream) = self.ws_stream.as_mut() {
            while let Some(message) = ws_stream.next().await {
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
                    _ => continue,
                };
                self.stats.record_received(bytes.len());

                let frame = match types::decode_frame(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("dropping malformed frame: {}", e);
                        continue;
                    }
                };
                let is_last = frame.is_last();

                match frame.into_payload() {
                    Payload::Audio(part) => {
                        self.audio.extend_from_slice(&part);
                        tracing::debug!(
                            "audio part {} bytes, total {}",
                            part.len(),
                            self.audio.len()
                        );
                    }
                    Payload::Json(value) => {
                        if let Ok(response) = serde_json::from_value::<ServerResponse>(value) {
                            if response.is_error() {
                                tracing::error!(
                                    "synthesis error {:?}: {}",
                                    response.code(),
                                    response.message().unwrap_or("unknown")
                                );
                                self.audio.clear();
                                break;
                            }
                        }
                    }
                    Payload::Error(text) => {
                        tracing::error!("gateway error: {}", text);
                        self.audio.clear();
                        break;
                    }
                    Payload::Raw(_) => {}
                }

                if is_last {
                    break;
                }
            }
        }

        self.stop().await;
        tracing::info!(
            "synthesis session {} done. frames received: {}, audio bytes: {}",
            self.reqid,
            self.stats.frames_received(),
            self.audio.len()
        );
        std::mem::take(&mut self.audio)
    }

    /// Closes the connection. Stopping twice is a no-op.
    pub async fn stop(&mut self) {
        if let Some(mut ws_stream) = self.ws_stream.take() {
            if let Err(e) = ws_stream.close(None).await {
                tracing::debug!("close after synthesis failed: {}", e);
            }
        }
    }
}
