//! Turn-taking controller. Walks the script line by line and decides, per line,
//! whether the performer listens, speaks, or does both.
//!
//! The controller re-evaluates whenever the phase, cursor, selected role or
//! script changes. Every listen or speak it starts is tagged with a turn id;
//! results that arrive for a turn that is no longer current are dropped, so a
//! lingering callback can never move the cursor twice.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::performer::{PerformerApi, SpeakOptions};
use crate::reviewer::Reviewer;
use crate::settings::DEFAULT_COMPLETION_PHRASE;
use crate::store::{Phase, RehearsalState, RehearsalStore};
use crate::types::{Intent, IntentContext, RoleKey};

/// Volume of the companion voice while the user speaks along.
pub const TOGETHER_VOLUME: f32 = 0.3;

#[derive(Debug)]
enum FlowEvent {
    Recognized { turn: u64, text: String },
    Judged { turn: u64, intent: Intent },
    Spoken { turn: u64 },
}

/// What a dispatch depends on. A change in any of these re-dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DispatchKey {
    cursor: usize,
    role: Option<RoleKey>,
    revision: u64,
}

impl DispatchKey {
    fn of(state: &RehearsalState) -> Option<Self> {
        (state.phase == Phase::Rehearsing).then_some(Self {
            cursor: state.cursor,
            role: state.role,
            revision: state.revision,
        })
    }
}

#[derive(Debug)]
enum TurnKind {
    User { context: IntentContext },
    Together,
    Companion,
    Farewell,
}

#[derive(Debug)]
struct Turn {
    id: u64,
    kind: TurnKind,
    /// The turn already moved the cursor or ended the session.
    consumed: bool,
    /// A classification is in flight; further texts wait for it.
    judging: bool,
    /// Latest text heard while judging, judged next if the utterance in
    /// flight turns out to be a level change.
    pending: Option<String>,
}

pub struct RehearsalFlow {
    store: RehearsalStore,
    performer: Arc<dyn PerformerApi>,
    reviewer: Option<Arc<dyn Reviewer>>,
    completion_phrase: String,
    events_tx: mpsc::UnboundedSender<FlowEvent>,
    events_rx: mpsc::UnboundedReceiver<FlowEvent>,
    turn: Option<Turn>,
    next_turn: u64,
}

impl RehearsalFlow {
    pub fn new(store: RehearsalStore, performer: Arc<dyn PerformerApi>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            performer,
            reviewer: None,
            completion_phrase: DEFAULT_COMPLETION_PHRASE.to_string(),
            events_tx,
            events_rx,
            turn: None,
            next_turn: 0,
        }
    }

    /// Without a reviewer every recognized text on the user's line advances.
    pub fn with_reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_completion_phrase(mut self, phrase: &str) -> Self {
        self.completion_phrase = phrase.to_string();
        self
    }

    /// Drives the rehearsal until the store reaches `Terminated` (or is
    /// dropped), then stops the performer. Anything still speaking or
    /// listening at that point is cancelled.
    pub async fn run(mut self) {
        let mut state_rx = self.store.subscribe();
        let mut dispatched: Option<DispatchKey> = None;

        loop {
            let state = state_rx.borrow_and_update().clone();
            if state.phase == Phase::Terminated {
                break;
            }

            let key = DispatchKey::of(&state);
            if key != dispatched {
                if key.is_none() {
                    self.leave_rehearsal().await;
                } else {
                    self.dispatch(&state).await;
                }
                dispatched = key;
                // the dispatch may itself have changed the store
                continue;
            }

            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(event) = self.events_rx.recv() => self.handle(event).await,
            }
        }

        self.performer.stop().await;
        tracing::info!("rehearsal flow finished");
    }

    fn begin_turn(&mut self, kind: TurnKind) -> u64 {
        let id = self.next_turn;
        self.next_turn += 1;
        self.turn = Some(Turn {
            id,
            kind,
            consumed: false,
            judging: false,
            pending: None,
        });
        id
    }

    fn result_callback(&self, turn: u64) -> crate::recognition::ResultCallback {
        let events = self.events_tx.clone();
        Arc::new(move |text| {
            let _ = events.send(FlowEvent::Recognized { turn, text });
        })
    }

    async fn leave_rehearsal(&mut self) {
        self.turn = None;
        self.performer.stop().await;
    }

    fn judge(&self, turn: u64, text: String, context: IntentContext) {
        let Some(reviewer) = self.reviewer.clone() else {
            return;
        };
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let intent = reviewer.judge_intent(&text, &context).await;
            let _ = events.send(FlowEvent::Judged { turn, intent });
        });
    }

    async fn dispatch(&mut self, state: &RehearsalState) {
        let (Some(script), Some(user_role)) = (state.script.clone(), state.role) else {
            return;
        };

        let Some(line) = script.line(state.cursor) else {
            tracing::info!("end of script");
            self.performer.stop().await;
            let turn = self.begin_turn(TurnKind::Farewell);
            self.speak_then_report(turn, self.completion_phrase.clone());
            return;
        };

        let role = line.role();
        let content = line.content().to_string();
        tracing::debug!("line {} ({}): {}", state.cursor, role, content);

        if role == user_role {
            tracing::info!("user turn");
            self.performer.stop().await;
            let context = IntentContext::new()
                .with_last_line(content)
                .with_current_role(user_role);
            let turn = self.begin_turn(TurnKind::User { context });
            self.performer.listen(self.result_callback(turn)).await;
        } else if role.is_together() {
            tracing::info!("together turn");
            let turn = self.begin_turn(TurnKind::Together);
            let performer = self.performer.clone();
            tokio::spawn(async move {
                performer.speak(&content, SpeakOptions::with_volume(TOGETHER_VOLUME)).await;
            });
            self.performer.listen(self.result_callback(turn)).await;
        } else {
            tracing::info!("companion turn");
            self.performer.stop().await;
            let turn = self.begin_turn(TurnKind::Companion);
            self.speak_then_report(turn, content);
        }
    }

    fn speak_then_report(&self, turn: u64, text: String) {
        let performer = self.performer.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            performer.speak(&text, SpeakOptions::default()).await;
            let _ = events.send(FlowEvent::Spoken { turn });
        });
    }

    async fn handle(&mut self, event: FlowEvent) {
        let turn_id = match &event {
            FlowEvent::Recognized { turn, .. }
            | FlowEvent::Judged { turn, .. }
            | FlowEvent::Spoken { turn } => *turn,
        };
        let Some(turn) = self
            .turn
            .as_mut()
            .filter(|turn| turn.id == turn_id && !turn.consumed)
        else {
            tracing::debug!("dropping stale event {:?}", event);
            return;
        };

        match event {
            FlowEvent::Recognized { text, .. } => {
                tracing::info!("heard: {}", text);
                match &turn.kind {
                    TurnKind::User { context } => {
                        if turn.judging {
                            turn.pending = Some(text);
                        } else if self.reviewer.is_some() {
                            turn.judging = true;
                            let context = context.clone();
                            self.judge(turn_id, text, context);
                        } else {
                            turn.consumed = true;
                            self.store.advance_cursor();
                        }
                    }
                    TurnKind::Together => {
                        turn.consumed = true;
                        self.store.advance_cursor();
                    }
                    TurnKind::Companion | TurnKind::Farewell => {}
                }
            }
            FlowEvent::Judged { intent, .. } => {
                turn.judging = false;
                let pending = turn.pending.take();
                let context = match &turn.kind {
                    TurnKind::User { context } => Some(context.clone()),
                    _ => None,
                };
                match intent {
                    Intent::Stop => {
                        turn.consumed = true;
                        tracing::info!("stop requested");
                        self.performer.stop().await;
                        if let Err(e) = self.store.set_phase(Phase::Initializing) {
                            tracing::warn!("failed to end rehearsal: {}", e);
                        }
                    }
                    Intent::ChangeLevel => {
                        if let (Some(text), Some(context)) = (pending, context) {
                            tracing::debug!("judging text heard meanwhile: {}", text);
                            turn.judging = true;
                            self.judge(turn_id, text, context);
                        }
                        let level = self.store.snapshot().level.next();
                        tracing::info!("mastery level -> {}", level.get());
                        self.store.set_level(level);
                    }
                    Intent::None | Intent::Restart | Intent::ChangeRole => {
                        turn.consumed = true;
                        self.store.advance_cursor();
                    }
                }
            }
            FlowEvent::Spoken { .. } => match turn.kind {
                TurnKind::Companion => {
                    turn.consumed = true;
                    self.store.advance_cursor();
                }
                TurnKind::Farewell => {
                    turn.consumed = true;
                    if let Err(e) = self.store.set_phase(Phase::Initializing) {
                        tracing::warn!("failed to end rehearsal: {}", e);
                    }
                }
                TurnKind::User { .. } | TurnKind::Together => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Config;
    use crate::performer::{Performer, PerformerState};
    use crate::recognition::ResultCallback;
    use crate::reviewer::MockReviewer;
    use crate::store::MasteryLevel;
    use crate::testing::{self, FakeAudio};
    use crate::types::{ScriptDocument, ScriptLine};
    use crate::utils::SystemCheck;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Listen,
        Speak(String, f32),
        Stop,
    }

    /// Records calls; speaking finishes at once and recognized text is
    /// injected with `say`.
    #[derive(Default)]
    struct ScriptedPerformer {
        calls: Mutex<Vec<Call>>,
        on_result: Mutex<Option<ResultCallback>>,
    }

    impl ScriptedPerformer {
        fn say(&self, text: &str) {
            let callback = self.on_result.lock().unwrap().clone();
            callback.expect("nobody is listening")(text.to_string());
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn wait_until(&self, condition: impl Fn(&[Call]) -> bool) {
            tokio::time::timeout(Duration::from_secs(2), async {
                while !condition(&self.calls.lock().unwrap()) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("performer never reached the expected calls");
        }
    }

    #[async_trait]
    impl PerformerApi for ScriptedPerformer {
        async fn listen(&self, on_result: ResultCallback) {
            self.calls.lock().unwrap().push(Call::Listen);
            *self.on_result.lock().unwrap() = Some(on_result);
        }

        async fn speak(&self, text: &str, options: SpeakOptions) {
            self.calls.lock().unwrap().push(Call::Speak(text.to_string(), options.volume));
        }

        async fn stop(&self) {
            self.calls.lock().unwrap().push(Call::Stop);
            *self.on_result.lock().unwrap() = None;
        }

        fn check_system(&self) -> SystemCheck {
            SystemCheck {
                capture_available: true,
                playback_ready: true,
            }
        }
    }

    /// Speaking only finishes once stopped, like a synthesis that never
    /// sends its final frame.
    #[derive(Default)]
    struct StallingPerformer {
        inner: ScriptedPerformer,
        released: Notify,
    }

    #[async_trait]
    impl PerformerApi for StallingPerformer {
        async fn listen(&self, on_result: ResultCallback) {
            self.inner.listen(on_result).await;
        }

        async fn speak(&self, text: &str, options: SpeakOptions) {
            let released = self.released.notified();
            self.inner.speak(text, options).await;
            released.await;
        }

        async fn stop(&self) {
            self.released.notify_waiters();
            self.inner.stop().await;
        }

        fn check_system(&self) -> SystemCheck {
            self.inner.check_system()
        }
    }

    /// Takes a while to answer; "太难了" asks for a level change.
    #[derive(Default)]
    struct SlowReviewer {
        heard: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Reviewer for SlowReviewer {
        async fn judge_intent(&self, text: &str, _context: &IntentContext) -> Intent {
            self.heard.lock().unwrap().push(text.to_string());
            tokio::time::sleep(Duration::from_millis(100)).await;
            if text == "太难了" {
                Intent::ChangeLevel
            } else {
                Intent::None
            }
        }
    }

    fn listens(calls: &[Call]) -> usize {
        calls.iter().filter(|call| **call == Call::Listen).count()
    }

    fn speaks(calls: &[Call]) -> Vec<(String, f32)> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::Speak(text, volume) => Some((text.clone(), *volume)),
                _ => None,
            })
            .collect()
    }

    fn rehearsal(lines: Vec<ScriptLine>, role: RoleKey) -> RehearsalStore {
        let store = RehearsalStore::new();
        store.load_script(ScriptDocument::new("test", lines));
        store.select_role(role);
        store.set_phase(Phase::Rehearsing).unwrap();
        store
    }

    async fn wait_for_state(store: &RehearsalStore, condition: impl FnMut(&RehearsalState) -> bool) {
        let mut rx = store.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(condition))
            .await
            .expect("store never reached the expected state")
            .unwrap();
    }

    #[tokio::test]
    async fn walks_companion_user_and_together_lines() {
        let store = rehearsal(
            vec![
                ScriptLine::new(1, RoleKey::Jia, "x"),
                ScriptLine::new(2, RoleKey::Yi, "y"),
                ScriptLine::new(3, RoleKey::Together, "z"),
            ],
            RoleKey::Yi,
        );
        let performer = Arc::new(ScriptedPerformer::default());
        let flow = tokio::spawn(RehearsalFlow::new(store.clone(), performer.clone()).run());

        // companion line is spoken and then advanced past
        performer.wait_until(|calls| listens(calls) == 1).await;
        assert_eq!(store.snapshot().cursor, 1);
        assert_eq!(speaks(&performer.calls()), vec![("x".to_string(), 1.0)]);

        performer.say("y");
        performer.wait_until(|calls| listens(calls) == 2 && speaks(calls).len() == 2).await;
        assert_eq!(store.snapshot().cursor, 2);
        assert_eq!(speaks(&performer.calls())[1], ("z".to_string(), TOGETHER_VOLUME));

        performer.say("z");
        wait_for_state(&store, |state| state.phase == Phase::Initializing).await;
        performer.wait_until(|calls| speaks(calls).len() == 3).await;
        assert_eq!(speaks(&performer.calls())[2], (DEFAULT_COMPLETION_PHRASE.to_string(), 1.0));
        assert_eq!(store.snapshot().cursor, 0);

        store.set_phase(Phase::Terminated).unwrap();
        flow.await.unwrap();
        assert_eq!(performer.calls().last(), Some(&Call::Stop));
    }

    #[tokio::test]
    async fn user_and_companion_turns_stop_first() {
        let store = rehearsal(
            vec![ScriptLine::new(1, RoleKey::Jia, "x"), ScriptLine::new(2, RoleKey::Yi, "y")],
            RoleKey::Yi,
        );
        let performer = Arc::new(ScriptedPerformer::default());
        let flow = tokio::spawn(RehearsalFlow::new(store.clone(), performer.clone()).run());

        performer.wait_until(|calls| listens(calls) == 1).await;
        let calls = performer.calls();
        assert_eq!(calls[0], Call::Stop);
        assert_eq!(calls[1], Call::Speak("x".to_string(), 1.0));
        assert_eq!(calls[2], Call::Stop);
        assert_eq!(calls[3], Call::Listen);

        store.set_phase(Phase::Terminated).unwrap();
        flow.await.unwrap();
    }

    #[tokio::test]
    async fn change_level_keeps_listening_on_the_same_line() {
        let store = rehearsal(
            vec![ScriptLine::new(1, RoleKey::Yi, "y"), ScriptLine::new(2, RoleKey::Jia, "x")],
            RoleKey::Yi,
        );
        let mut reviewer = MockReviewer::new();
        let mut seq = mockall::Sequence::new();
        reviewer
            .expect_judge_intent()
            .withf(|text, context| text == "太难了" && context.last_line() == Some("y"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Intent::ChangeLevel);
        reviewer
            .expect_judge_intent()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Intent::None);

        let performer = Arc::new(ScriptedPerformer::default());
        let flow = tokio::spawn(
            RehearsalFlow::new(store.clone(), performer.clone())
                .with_reviewer(Arc::new(reviewer))
                .run(),
        );

        performer.wait_until(|calls| listens(calls) == 1).await;
        performer.say("太难了");
        wait_for_state(&store, |state| state.level == MasteryLevel::new(2).unwrap()).await;
        assert_eq!(store.snapshot().cursor, 0);
        assert_eq!(listens(&performer.calls()), 1);

        performer.say("y");
        performer.wait_until(|calls| speaks(calls).first().is_some_and(|(text, _)| text == "x")).await;
        assert_eq!(store.snapshot().level.get(), 2);

        store.set_phase(Phase::Terminated).unwrap();
        flow.await.unwrap();
    }

    #[tokio::test]
    async fn stop_intent_ends_session_and_reports_idle() {
        let asr = testing::spawn_gateway(|mut ws| async move {
            let _ = testing::next_binary(&mut ws).await;
            let result = serde_json::json!({"code": 1000, "result": {"text": "我不练了"}});
            testing::send_binary(&mut ws, testing::response_frame(result, 1)).await;
            while testing::next_binary(&mut ws).await.is_some() {}
        })
        .await;

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let performer = Arc::new(
            Performer::new(
                Config::builder().with_recognition_url(&asr).build(),
                Arc::new(FakeAudio::silent()),
            )
            .with_listener(Arc::new(move |state| sink.lock().unwrap().push(state))),
        );
        let mut reviewer = MockReviewer::new();
        reviewer.expect_judge_intent().times(1).returning(|_, _| Intent::Stop);

        let store = rehearsal(vec![ScriptLine::new(1, RoleKey::Yi, "y")], RoleKey::Yi);
        let flow = tokio::spawn(
            RehearsalFlow::new(store.clone(), performer.clone())
                .with_reviewer(Arc::new(reviewer))
                .run(),
        );

        wait_for_state(&store, |state| state.phase == Phase::Initializing).await;
        assert!(!performer.is_listening());
        assert!(!performer.is_speaking());
        let states = states.lock().unwrap().clone();
        assert!(states.contains(&PerformerState::Listening));
        assert_eq!(states.last(), Some(&PerformerState::Idle));

        store.set_phase(Phase::Terminated).unwrap();
        flow.await.unwrap();
    }

    #[tokio::test]
    async fn stale_results_do_not_advance() {
        let store = rehearsal(
            vec![ScriptLine::new(1, RoleKey::Together, "z"), ScriptLine::new(2, RoleKey::Yi, "y")],
            RoleKey::Yi,
        );
        let performer = Arc::new(ScriptedPerformer::default());
        let flow = tokio::spawn(RehearsalFlow::new(store.clone(), performer.clone()).run());

        performer.wait_until(|calls| listens(calls) == 1).await;
        let together = performer.on_result.lock().unwrap().clone().unwrap();
        together("z".to_string());
        performer.wait_until(|calls| listens(calls) == 2).await;
        assert_eq!(store.snapshot().cursor, 1);

        // the together line's callback fires again after the user turn began
        together("z again".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.snapshot().cursor, 1);

        store.set_phase(Phase::Terminated).unwrap();
        flow.await.unwrap();
    }

    #[tokio::test]
    async fn text_heard_while_judging_is_not_lost_after_level_change() {
        let store = rehearsal(
            vec![ScriptLine::new(1, RoleKey::Yi, "蒸羊羔"), ScriptLine::new(2, RoleKey::Jia, "x")],
            RoleKey::Yi,
        );
        let reviewer = Arc::new(SlowReviewer::default());
        let performer = Arc::new(ScriptedPerformer::default());
        let flow = tokio::spawn(
            RehearsalFlow::new(store.clone(), performer.clone())
                .with_reviewer(reviewer.clone())
                .run(),
        );

        performer.wait_until(|calls| listens(calls) == 1).await;
        performer.say("太难了");
        performer.say("太难了。蒸羊羔");

        wait_for_state(&store, |state| state.cursor == 1).await;
        assert_eq!(store.snapshot().level.get(), 2);
        assert_eq!(*reviewer.heard.lock().unwrap(), vec!["太难了", "太难了。蒸羊羔"]);

        store.set_phase(Phase::Terminated).unwrap();
        flow.await.unwrap();
    }

    #[tokio::test]
    async fn terminating_cancels_a_farewell_that_never_finishes() {
        let store = rehearsal(vec![ScriptLine::new(1, RoleKey::Yi, "y")], RoleKey::Yi);
        let performer = Arc::new(StallingPerformer::default());
        let flow = tokio::spawn(RehearsalFlow::new(store.clone(), performer.clone()).run());

        performer.inner.wait_until(|calls| listens(calls) == 1).await;
        performer.inner.say("y");
        performer.inner.wait_until(|calls| speaks(calls).len() == 1).await;
        assert_eq!(store.snapshot().phase, Phase::Rehearsing);

        store.set_phase(Phase::Terminated).unwrap();
        tokio::time::timeout(Duration::from_secs(2), flow)
            .await
            .expect("flow did not finish after termination")
            .unwrap();
        assert_eq!(performer.inner.calls().last(), Some(&Call::Stop));
    }
}
