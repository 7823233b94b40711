//! Owned rehearsal state. The flow controller and the presentation layer hold
//! clones of one [`RehearsalStore`]; every mutation goes through one of its
//! five write operations and is broadcast to subscribers.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::types::{RoleKey, ScriptDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Initializing,
    SelectingRole,
    Rehearsing,
    Terminated,
}

/// How much of the script the presentation layer hides. Always within 1..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MasteryLevel(u8);

impl MasteryLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    pub fn new(level: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&level).then_some(Self(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// 1 → 2 → 3 → 1.
    pub fn next(self) -> Self {
        if self.0 >= Self::MAX {
            Self(Self::MIN)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Default for MasteryLevel {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("no script loaded")]
    NoScript,
    #[error("no role selected")]
    NoRole,
}

#[derive(Debug, Clone, Default)]
pub struct RehearsalState {
    pub cursor: usize,
    pub role: Option<RoleKey>,
    pub level: MasteryLevel,
    pub phase: Phase,
    pub script: Option<Arc<ScriptDocument>>,
    /// Bumped on every script load.
    pub revision: u64,
}

impl RehearsalState {
    pub fn current_line(&self) -> Option<&crate::types::ScriptLine> {
        self.script.as_ref()?.line(self.cursor)
    }

    /// True once the cursor has walked past the last line.
    pub fn is_finished(&self) -> bool {
        self.script.as_ref().is_some_and(|script| self.cursor >= script.len())
    }
}

#[derive(Clone)]
pub struct RehearsalStore {
    tx: Arc<watch::Sender<RehearsalState>>,
}

impl RehearsalStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RehearsalState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> RehearsalState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RehearsalState> {
        self.tx.subscribe()
    }

    pub fn advance_cursor(&self) {
        self.tx.send_modify(|state| state.cursor += 1);
    }

    pub fn select_role(&self, role: RoleKey) {
        self.tx.send_modify(|state| state.role = Some(role));
    }

    pub fn set_level(&self, level: MasteryLevel) {
        self.tx.send_if_modified(|state| {
            let changed = state.level != level;
            state.level = level;
            changed
        });
    }

    /// Entering `Rehearsing` needs a script and a role. `Initializing` and
    /// `Terminated` reset the cursor.
    pub fn set_phase(&self, phase: Phase) -> Result<(), PhaseError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if phase == Phase::Rehearsing {
                if state.script.is_none() {
                    result = Err(PhaseError::NoScript);
                    return false;
                }
                if state.role.is_none() {
                    result = Err(PhaseError::NoRole);
                    return false;
                }
            }
            let reset =
                matches!(phase, Phase::Initializing | Phase::Terminated) && state.cursor != 0;
            if reset {
                state.cursor = 0;
            }
            let changed = state.phase != phase || reset;
            state.phase = phase;
            changed
        });
        if result.is_ok() {
            tracing::info!("phase: {:?}", phase);
        }
        result
    }

    pub fn load_script(&self, script: ScriptDocument) {
        tracing::info!("loaded script {:?} ({} lines)", script.title(), script.len());
        self.tx.send_modify(|state| {
            state.script = Some(Arc::new(script));
            state.cursor = 0;
            state.revision += 1;
        });
    }
}

impl Default for RehearsalStore {
    fn default() -> Self {
        Self::new()
    }
}
