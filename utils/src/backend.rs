use std::any::Any;

use crate::audio::DecodedAudio;

/// Startup-time audio failures. These are the only audio errors surfaced to
/// the user; everything else is logged and absorbed.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("no capture device available")]
    CaptureUnavailable,
    #[error("playback device not ready")]
    PlaybackUnavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemCheck {
    pub capture_available: bool,
    pub playback_ready: bool,
}

impl SystemCheck {
    pub fn ensure_ready(&self) -> Result<(), ResourceError> {
        if !self.capture_available {
            return Err(ResourceError::CaptureUnavailable);
        }
        if !self.playback_ready {
            return Err(ResourceError::PlaybackUnavailable);
        }
        Ok(())
    }
}

/// Mono capture blocks at the device's native rate. Dropping the stream
/// releases the device.
pub struct CaptureStream {
    samples: tokio::sync::mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
    _guard: Option<Box<dyn Any + Send>>,
}

impl CaptureStream {
    pub fn new(samples: tokio::sync::mpsc::Receiver<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            _guard: None,
        }
    }

    /// Keeps `guard` alive for as long as the stream is.
    pub fn with_guard<G: Any + Send>(mut self, guard: G) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Next block, or `None` once the device side has gone away.
    pub async fn recv(&mut self) -> Option<Vec<f32>> {
        self.samples.recv().await
    }
}

/// Capture and playback primitives the performance engine runs on.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Opens the capture device. Each call yields an independent stream.
    fn capture(&self) -> anyhow::Result<CaptureStream>;

    /// Plays `clip` to completion with a linear `gain` in [0, 1]. Dropping the
    /// returned future stops playback.
    async fn play(&self, clip: DecodedAudio, gain: f32) -> anyhow::Result<()>;

    fn check_system(&self) -> SystemCheck;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_ready_reports_first_missing_capability() {
        let check = SystemCheck { capture_available: false, playback_ready: false };
        assert!(matches!(check.ensure_ready(), Err(ResourceError::CaptureUnavailable)));
        let check = SystemCheck { capture_available: true, playback_ready: false };
        assert!(matches!(check.ensure_ready(), Err(ResourceError::PlaybackUnavailable)));
        assert!(SystemCheck { capture_available: true, playback_ready: true }.ensure_ready().is_ok());
    }

    #[tokio::test]
    async fn stream_ends_when_sender_drops() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let mut stream = CaptureStream::new(rx, 48000).with_guard(());
        tx.send(vec![0.1, 0.2]).await.unwrap();
        drop(tx);
        assert_eq!(stream.recv().await, Some(vec![0.1, 0.2]));
        assert_eq!(stream.recv().await, None);
        assert_eq!(stream.sample_rate(), 48000);
    }
}
