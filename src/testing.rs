//! In-process gateway, HTTP and audio fakes shared by the session,
//! performer, flow and document source tests.

use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use scriptbuddy_realtime_utils::audio::DecodedAudio;
use scriptbuddy_realtime_utils::{AudioBackend, CaptureStream, SystemCheck};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub(crate) type ServerStream = WebSocketStream<TcpStream>;

/// Accepts websocket connections on an ephemeral port and hands each one to
/// `handler`. Returns the url to connect to.
pub(crate) async fn spawn_gateway<F, Fut>(handler: F) -> String
where
    F: Fn(ServerStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    handler(ws).await;
                }
            });
        }
    });
    format!("ws://{addr}/api/ws")
}

/// Serves one canned HTTP reply and hands back the raw request.
pub(crate) async fn http_stub(status: &'static str, body: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
             content-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        String::from_utf8_lossy(&request).to_string()
    });
    (format!("http://{addr}"), handle)
}

pub(crate) fn request_body(request: &str) -> &str {
    request.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or_default()
}

/// The request target of the first line, e.g. `/api/script?id=1`.
pub(crate) fn request_target(request: &str) -> &str {
    request.split(' ').nth(1).unwrap_or_default()
}

/// Next binary message from the client, skipping control frames.
pub(crate) async fn next_binary(ws: &mut ServerStream) -> Option<Vec<u8>> {
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Binary(bytes) => return Some(bytes.to_vec()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

pub(crate) async fn send_binary(ws: &mut ServerStream, bytes: Vec<u8>) {
    let _ = ws.send(Message::Binary(bytes.into())).await;
}

fn server_frame(
    message_type: u8,
    serialization: u8,
    sequence: Option<i32>,
    body: &[u8],
) -> Vec<u8> {
    let flags = match sequence {
        None => 0b0000,
        Some(seq) if seq < 0 => 0b0011,
        Some(_) => 0b0001,
    };
    let mut bytes = vec![0x11, (message_type << 4) | flags, serialization << 4, 0x00];
    if let Some(seq) = sequence {
        bytes.extend_from_slice(&seq.to_be_bytes());
    }
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(body);
    bytes
}

pub(crate) fn response_frame(payload: serde_json::Value, sequence: i32) -> Vec<u8> {
    server_frame(0b1001, 0b0001, Some(sequence), payload.to_string().as_bytes())
}

pub(crate) fn ack_frame(audio: &[u8], sequence: i32) -> Vec<u8> {
    server_frame(0b1011, 0b0000, Some(sequence), audio)
}

pub(crate) fn error_frame(text: &str) -> Vec<u8> {
    server_frame(0b1111, 0b0000, None, text.as_bytes())
}

/// A short mono WAV clip, decodable by the compressed-stream decoder.
pub(crate) fn wav_clip(samples: usize, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            writer.write_sample(if i % 2 == 0 { 8000i16 } else { -8000 }).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

struct CaptureRelease {
    released: Arc<AtomicUsize>,
    _tx: tokio::sync::mpsc::Sender<Vec<f32>>,
}

impl Drop for CaptureRelease {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Audio backend that feeds canned capture blocks and records playback.
pub(crate) struct FakeAudio {
    blocks: Vec<Vec<f32>>,
    sample_rate: u32,
    check: SystemCheck,
    pub(crate) opened: AtomicUsize,
    pub(crate) released: Arc<AtomicUsize>,
    pub(crate) played: Mutex<Vec<(DecodedAudio, f32)>>,
}

impl FakeAudio {
    pub(crate) fn new(blocks: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            blocks,
            sample_rate,
            check: SystemCheck { capture_available: true, playback_ready: true },
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            played: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn silent() -> Self {
        Self::new(Vec::new(), 16000)
    }

    pub(crate) fn with_check(mut self, check: SystemCheck) -> Self {
        self.check = check;
        self
    }

    pub(crate) fn played(&self) -> Vec<(DecodedAudio, f32)> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AudioBackend for FakeAudio {
    fn capture(&self) -> anyhow::Result<CaptureStream> {
        let (tx, rx) = tokio::sync::mpsc::channel(self.blocks.len().max(1));
        for block in &self.blocks {
            tx.try_send(block.clone())?;
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let guard = CaptureRelease {
            released: self.released.clone(),
            _tx: tx,
        };
        Ok(CaptureStream::new(rx, self.sample_rate).with_guard(guard))
    }

    async fn play(&self, clip: DecodedAudio, gain: f32) -> anyhow::Result<()> {
        self.played.lock().unwrap().push((clip, gain));
        Ok(())
    }

    fn check_system(&self) -> SystemCheck {
        self.check
    }
}
