//! The performer speaks and listens on behalf of the rehearsal flow.
//!
//! Speaking and listening are tracked independently: a script line performed
//! "together" keeps a synthesis and a recognition session alive at the same
//! time. The reported [`PerformerState`] resolves the two flags, so a speak
//! that finishes while a listen is still open does not report `Idle`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::client::Config;
use crate::recognition::{RecognitionSession, ResultCallback};
use crate::synthesis::SynthesisSession;
use crate::utils::audio;
use crate::utils::{AudioBackend, SystemCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformerState {
    Idle,
    Speaking,
    Listening,
}

/// Observes every state transition, in order. Invoked while the performer's
/// state lock is held, so it must not call back into the performer.
pub type StateListener = Arc<dyn Fn(PerformerState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakOptions {
    /// Linear gain in [0, 1].
    pub volume: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}

impl SpeakOptions {
    pub fn with_volume(volume: f32) -> Self {
        Self { volume }
    }
}

/// The listen/speak/stop contract the rehearsal flow drives.
#[async_trait]
pub trait PerformerApi: Send + Sync {
    /// Starts a fresh recognition session; each recognized text goes to
    /// `on_result`. Returns once the session is running (or failed to start).
    async fn listen(&self, on_result: ResultCallback);

    /// Synthesizes and plays `text`. Resolves when playback has finished, the
    /// performer was stopped, or synthesis produced nothing playable.
    async fn speak(&self, text: &str, options: SpeakOptions);

    /// Stops both sessions, clears both flags and reports `Idle`.
    async fn stop(&self);

    fn check_system(&self) -> SystemCheck;
}

#[derive(Default)]
struct Inner {
    listening: bool,
    listen_epoch: u64,
    recognition: Option<RecognitionSession>,
    speaks: HashMap<u64, Arc<Notify>>,
    next_speak: u64,
    last_reported: Option<PerformerState>,
}

impl Inner {
    fn speaking(&self) -> bool {
        !self.speaks.is_empty()
    }

    fn report(&mut self, listener: Option<&StateListener>, state: PerformerState) {
        if self.last_reported == Some(state) {
            return;
        }
        self.last_reported = Some(state);
        tracing::debug!("performer state: {:?}", state);
        if let Some(listener) = listener {
            listener(state);
        }
    }
}

pub struct Performer {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    listener: Option<StateListener>,
    inner: Mutex<Inner>,
}

impl Performer {
    pub fn new(config: Config, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            config,
            backend,
            listener: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_listening(&self) -> bool {
        self.inner().listening
    }

    pub fn is_speaking(&self) -> bool {
        self.inner().speaking()
    }

    /// Synthesis, decode and playback of one text. Every failure is logged and
    /// ends the speak quietly.
    async fn perform(&self, text: &str, options: SpeakOptions) {
        let mut session = match SynthesisSession::start(&self.config, text).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("failed to start synthesis: {:#}", e);
                return;
            }
        };
        let bytes = session.collect_audio().await;
        if bytes.is_empty() {
            tracing::warn!("no audio received for {:?}", text);
            return;
        }

        let extension = self.config.encoding().to_string();
        let decoded =
            tokio::task::spawn_blocking(move || audio::decode_compressed(&bytes, Some(&extension)))
                .await;
        let clip = match decoded {
            Ok(Ok(clip)) => clip,
            Ok(Err(e)) => {
                tracing::warn!("failed to decode synthesized audio: {:#}", e);
                return;
            }
            Err(e) => {
                tracing::error!("decode task failed: {}", e);
                return;
            }
        };
        tracing::debug!("playing {:.2}s at volume {}", clip.duration_secs(), options.volume);
        if let Err(e) = self.backend.play(clip, options.volume).await {
            tracing::warn!("playback failed: {:#}", e);
        }
    }
}

#[async_trait]
impl PerformerApi for Performer {
    async fn listen(&self, on_result: ResultCallback) {
        let (previous, epoch) = {
            let mut inner = self.inner();
            if inner.speaking() {
                tracing::info!("listening while speaking (together mode)");
            }
            inner.listen_epoch += 1;
            inner.listening = true;
            inner.report(self.listener.as_ref(), PerformerState::Listening);
            (inner.recognition.take(), inner.listen_epoch)
        };
        if let Some(mut previous) = previous {
            tracing::warn!("replacing recognition session {}", previous.reqid());
            previous.stop().await;
        }

        let capture = match self.backend.capture() {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!("failed to open capture: {:#}", e);
                return;
            }
        };
        let mut session = match RecognitionSession::start(&self.config, capture, on_result).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("failed to start recognition: {:#}", e);
                return;
            }
        };

        let stale = {
            let mut inner = self.inner();
            if inner.listening && inner.listen_epoch == epoch {
                inner.recognition = Some(session);
                None
            } else {
                Some(session)
            }
        };
        // stopped (or superseded) while connecting
        if let Some(mut session) = stale {
            session.stop().await;
        }
    }

    async fn speak(&self, text: &str, options: SpeakOptions) {
        let (id, cancel) = {
            let mut inner = self.inner();
            let id = inner.next_speak;
            inner.next_speak += 1;
            let cancel = Arc::new(Notify::new());
            inner.speaks.insert(id, cancel.clone());
            inner.report(self.listener.as_ref(), PerformerState::Speaking);
            (id, cancel)
        };

        let finished = tokio::select! {
            _ = self.perform(text, options) => true,
            _ = cancel.notified() => false,
        };

        let mut inner = self.inner();
        inner.speaks.remove(&id);
        // a stopped speak was already reported idle by stop()
        if finished && !inner.listening && !inner.speaking() {
            inner.report(self.listener.as_ref(), PerformerState::Idle);
        }
    }

    async fn stop(&self) {
        let session = {
            let mut inner = self.inner();
            inner.listen_epoch += 1;
            inner.listening = false;
            for (_, cancel) in inner.speaks.drain() {
                cancel.notify_one();
            }
            inner.report(self.listener.as_ref(), PerformerState::Idle);
            inner.recognition.take()
        };
        if let Some(mut session) = session {
            session.stop().await;
        }
    }

    fn check_system(&self) -> SystemCheck {
        self.backend.check_system()
    }
}
