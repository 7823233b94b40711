use anyhow::Context;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

mod consts;
mod config;
mod utils;
mod stats;

pub use config::{Config, ConfigBuilder};
pub use stats::Stats;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one duplex gateway connection.
pub(crate) async fn connect(url: &str, config: &Config) -> anyhow::Result<WsStream> {
    let request = utils::build_request(url, config)
        .with_context(|| format!("invalid gateway url {url}"))?;
    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    tracing::info!("connected to {}", url);
    Ok(ws_stream)
}

/// Outbound sequence counter of one session. Starts at 1 and only grows.
#[derive(Debug)]
pub struct Sequence {
    next: i32,
}

impl Sequence {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> i32 {
        let current = self.next;
        self.next = self.next.saturating_add(1);
        current
    }

    pub fn peek(&self) -> i32 {
        self.next
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}
