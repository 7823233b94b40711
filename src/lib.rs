pub mod client;
pub mod flow;
pub mod performer;
pub mod recognition;
pub mod remote;
pub mod reviewer;
pub mod settings;
pub mod store;
pub mod synthesis;

#[cfg(test)]
mod testing;

pub use scriptbuddy_realtime_types as types;
pub use scriptbuddy_realtime_utils as utils;

pub use client::{Config, ConfigBuilder};
pub use flow::RehearsalFlow;
pub use performer::{Performer, PerformerApi, PerformerState, SpeakOptions, StateListener};
pub use recognition::RecognitionSession;
pub use reviewer::{Reviewer, ReviewerClient};
pub use store::{MasteryLevel, Phase, RehearsalState, RehearsalStore};
pub use synthesis::SynthesisSession;
