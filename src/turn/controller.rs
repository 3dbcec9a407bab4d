//! Turn-taking controller implementation
//!
//! Presents a continuous listening experience over a session-based
//! recognizer: accumulates per-session results into one draft, relaunches
//! sessions after results and faults, and commits the draft exactly once
//! per listening session no matter which confirmation path fires first.
//!
//! Every state transition runs on one task, fed by a single event queue;
//! recognizer callbacks, timer firings, playback callbacks, and user
//! gestures all enter through [`ControllerEvent`]. In-flight recognizer
//! callbacks are cancelled by staleness: each session carries a generation
//! tag, and events for an older generation are ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::chat::ConversationSink;
use crate::config::TurnConfig;
use crate::events::TurnEvent;
use crate::speech::{
    chunk_utterance, FaultClass, PlaybackState, QueueMode, RecognizerFault, SessionHandle,
    SpeechRecognizer, SpeechSynthesizer,
};

use super::draft::SpeechDraft;
use super::timers::TimerSlot;

/// Microphone-session phase. Exactly one holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningPhase {
    /// No capture, waiting for a start gesture
    Idle,
    /// A recognizer session is live or about to relaunch
    Listening,
    /// Waiting out a retry delay after a recognizer fault
    ErrorBackoff,
}

impl Default for ListeningPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for ListeningPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListeningPhase::Idle => write!(f, "Idle"),
            ListeningPhase::Listening => write!(f, "Listening"),
            ListeningPhase::ErrorBackoff => write!(f, "ErrorBackoff"),
        }
    }
}

/// Snapshot of the controller for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnStatus {
    pub phase: ListeningPhase,
    pub speaking: bool,
    pub speak_replies: bool,
}

/// The bounded set of events the controller consumes, in arrival order.
#[derive(Debug)]
pub enum ControllerEvent {
    /// User start gesture
    StartRequested,
    /// User stop gesture
    StopRequested,
    /// Toggle speaking replies aloud
    SetSpeakReplies { enabled: bool },
    /// Recognizer delivered an interim result
    PartialResult { generation: u64, text: String },
    /// Recognizer delivered a session-final result
    FinalResult { generation: u64, text: String },
    /// Recognizer session failed
    RecognizerFailed {
        generation: u64,
        fault: RecognizerFault,
    },
    /// Restart timer fired
    RestartElapsed { seq: u64 },
    /// Safety-commit timer fired
    SafetyCommitElapsed { seq: u64 },
    /// Speech output began one utterance chunk
    PlaybackStarted { utterance_id: String },
    /// Speech output finished one utterance chunk
    PlaybackFinished { utterance_id: String },
    /// Speech output failed one utterance chunk
    PlaybackFailed { utterance_id: String },
    /// Speech output was stopped
    PlaybackStopped {
        utterance_id: String,
        interrupted: bool,
    },
    /// Conversation sink produced a reply
    ReplyReady { text: String },
    /// Conversation sink failed
    ReplyFailed { message: String },
}

/// The turn-taking controller. Owns the listening session, the draft, and
/// the playback state; everything else reaches it through the event queue.
pub struct TurnController {
    phase: ListeningPhase,
    /// User intent: capture stays on until a stop gesture. Cleared first on
    /// stop so in-flight events observe it and commit instead of relaunch.
    active: bool,
    /// Bumped on every recognizer session (re)start; stale events carry an
    /// older value and are dropped on delivery.
    generation: u64,
    draft: SpeechDraft,
    playback: PlaybackState,
    restart_timer: TimerSlot,
    commit_timer: TimerSlot,
    speak_replies: bool,
    reply_seq: u64,
    /// Consecutive recreate-class faults since the last accepted result.
    engine_resets: u32,
    listening_since: Option<Instant>,
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn ConversationSink>,
    event_tx: broadcast::Sender<TurnEvent>,
    status_tx: watch::Sender<TurnStatus>,
    /// Clone handed to timer and sink tasks so their outcomes re-enter the
    /// same queue as everything else.
    self_tx: mpsc::Sender<ControllerEvent>,
    config: TurnConfig,
}

impl TurnController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TurnConfig,
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn ConversationSink>,
        event_tx: broadcast::Sender<TurnEvent>,
        status_tx: watch::Sender<TurnStatus>,
        self_tx: mpsc::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            phase: ListeningPhase::Idle,
            active: false,
            generation: 0,
            draft: SpeechDraft::new(),
            playback: PlaybackState::new(),
            restart_timer: TimerSlot::new(),
            commit_timer: TimerSlot::new(),
            speak_replies: config.speak_replies,
            reply_seq: 0,
            engine_resets: 0,
            listening_since: None,
            recognizer,
            synthesizer,
            sink,
            event_tx,
            status_tx,
            self_tx,
            config,
        }
    }

    /// Run the controller, processing events until the queue closes.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<ControllerEvent>) {
        info!("turn controller started in Idle phase");

        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }

        info!("turn controller stopped");
    }

    /// Tear down the engines on daemon shutdown: stop, cancel, then
    /// release, in that order, all best-effort.
    pub async fn shutdown(&mut self) {
        self.active = false;
        self.restart_timer.disarm();
        self.commit_timer.disarm();
        self.recognizer.stop().await;
        self.recognizer.cancel().await;
        self.recognizer.release().await;
        self.synthesizer.stop().await;
    }

    /// The single state-transition function.
    async fn handle_event(&mut self, event: ControllerEvent) {
        trace!(?event, "controller event");

        match event {
            ControllerEvent::StartRequested => self.on_start_requested().await,
            ControllerEvent::StopRequested => self.on_stop_requested().await,
            ControllerEvent::SetSpeakReplies { enabled } => {
                info!(enabled, "speak replies toggled");
                self.speak_replies = enabled;
            }
            ControllerEvent::PartialResult { generation, text }
            | ControllerEvent::FinalResult { generation, text } => {
                self.on_result(generation, text).await;
            }
            ControllerEvent::RecognizerFailed { generation, fault } => {
                self.on_recognizer_failed(generation, fault).await;
            }
            ControllerEvent::RestartElapsed { seq } => self.on_restart_elapsed(seq).await,
            ControllerEvent::SafetyCommitElapsed { seq } => {
                self.on_safety_commit_elapsed(seq).await;
            }
            ControllerEvent::PlaybackStarted { utterance_id } => {
                if self.playback.on_started(&utterance_id) {
                    self.emit(TurnEvent::SpeakingStarted);
                }
            }
            ControllerEvent::PlaybackFinished { utterance_id } => {
                if self.playback.on_completed(&utterance_id) {
                    self.emit(TurnEvent::SpeakingFinished { interrupted: false });
                }
            }
            ControllerEvent::PlaybackFailed { utterance_id } => {
                warn!(%utterance_id, "speech output failed for one chunk");
                if self.playback.on_completed(&utterance_id) {
                    self.emit(TurnEvent::SpeakingFinished { interrupted: false });
                }
            }
            ControllerEvent::PlaybackStopped {
                utterance_id,
                interrupted,
            } => {
                if self.playback.on_stopped(&utterance_id, interrupted) {
                    self.emit(TurnEvent::SpeakingFinished { interrupted });
                }
            }
            ControllerEvent::ReplyReady { text } => self.on_reply_ready(text).await,
            ControllerEvent::ReplyFailed { message } => {
                warn!(%message, "conversation sink failed");
                self.emit(TurnEvent::ReplyFailed { message });
            }
        }

        self.publish_status();
    }

    // ── user gestures ────────────────────────────────────────────────────

    async fn on_start_requested(&mut self) {
        if self.playback.speaking {
            // First gesture while the assistant talks silences it; the
            // flag clears eagerly so the next gesture is never swallowed
            // by a slow engine callback.
            info!("start gesture while speaking, silencing playback");
            self.synthesizer.stop().await;
            if self.playback.silence() {
                self.emit(TurnEvent::SpeakingFinished { interrupted: true });
            }
            return;
        }

        if self.active {
            debug!("start gesture while already listening, ignored");
            return;
        }

        self.active = true;
        self.set_phase(ListeningPhase::Listening);
        self.listening_since = Some(Instant::now());
        self.draft.clear();
        self.engine_resets = 0;
        self.commit_timer.disarm();
        self.emit(TurnEvent::ListeningStarted);

        // Let the audio path settle before the first session grabs the mic.
        self.arm_restart(self.config.start_warmup);
    }

    async fn on_stop_requested(&mut self) {
        if !self.active {
            debug!("stop gesture while idle, ignored");
            return;
        }

        // Cleared before anything async: any result or fault still in
        // flight observes it and commits instead of relaunching.
        self.active = false;
        self.set_phase(ListeningPhase::Idle);
        let duration_ms = self
            .listening_since
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        self.restart_timer.disarm();
        self.recognizer.stop().await;

        // The stop confirmation may never arrive, or arrive with no
        // payload; the safety timer commits whatever the draft holds.
        self.arm_safety_commit(self.config.safety_commit);

        info!(
            duration_ms,
            pending_draft = !self.draft.is_empty(),
            "listening stopped, awaiting final result"
        );
        self.emit(TurnEvent::ListeningStopped { duration_ms });
    }

    // ── recognizer events ────────────────────────────────────────────────

    async fn on_result(&mut self, generation: u64, text: String) {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "stale result ignored"
            );
            return;
        }

        self.commit_timer.disarm();
        self.engine_resets = 0;
        self.draft.append(&text);

        if self.active {
            self.set_phase(ListeningPhase::Listening);
            // Session-based engines end after one utterance; relaunch
            // after a cooldown so the next session does not hit a busy
            // engine.
            self.arm_restart(self.config.restart_cooldown);
        } else {
            self.commit().await;
        }
    }

    async fn on_recognizer_failed(&mut self, generation: u64, fault: RecognizerFault) {
        if generation != self.generation {
            debug!(generation, current = self.generation, %fault, "stale fault ignored");
            return;
        }

        if !self.active {
            // Post-stop faults of any class are the stop confirmation:
            // commit and retire.
            debug!(%fault, "fault after stop, committing draft");
            self.commit_timer.disarm();
            self.commit().await;
            return;
        }

        match fault.class() {
            FaultClass::NoRetry => {
                warn!(%fault, "recognizer unavailable, stopping session");
                self.emit(TurnEvent::RecognizerUnavailable {
                    reason: fault.to_string(),
                });
                self.deactivate_and_commit().await;
            }
            FaultClass::Recreate => {
                self.engine_resets += 1;
                if self.engine_resets > self.config.max_engine_resets {
                    warn!(%fault, resets = self.engine_resets, "recognizer keeps failing, giving up");
                    self.emit(TurnEvent::RecognizerUnavailable {
                        reason: fault.to_string(),
                    });
                    self.deactivate_and_commit().await;
                    return;
                }
                // The failed session is unusable; rebuild before retrying.
                warn!(%fault, "recognizer session unusable, recreating engine");
                self.recognizer.recreate().await;
                self.schedule_retry(self.config.transient_retry);
            }
            FaultClass::Busy => self.schedule_retry(self.config.busy_retry),
            FaultClass::Transient => self.schedule_retry(self.config.transient_retry),
        }
    }

    // ── timers ───────────────────────────────────────────────────────────

    async fn on_restart_elapsed(&mut self, seq: u64) {
        if !self.restart_timer.accepts(seq) {
            trace!(seq, "stale restart timer ignored");
            return;
        }
        if !self.active {
            debug!("restart timer after deactivation, ignored");
            self.set_phase(ListeningPhase::Idle);
            return;
        }
        self.start_session().await;
    }

    async fn on_safety_commit_elapsed(&mut self, seq: u64) {
        if !self.commit_timer.accepts(seq) {
            trace!(seq, "stale safety-commit timer ignored");
            return;
        }
        if self.active {
            // A new listening session started since the stop; its draft
            // is not this timer's to commit.
            debug!("safety commit after restart, ignored");
            return;
        }
        debug!("safety commit firing");
        self.commit().await;
    }

    fn arm_restart(&mut self, delay: Duration) {
        let seq = self.restart_timer.arm();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ControllerEvent::RestartElapsed { seq }).await;
        });
    }

    fn arm_safety_commit(&mut self, delay: Duration) {
        let seq = self.commit_timer.arm();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ControllerEvent::SafetyCommitElapsed { seq }).await;
        });
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.set_phase(ListeningPhase::ErrorBackoff);
        self.emit(TurnEvent::RetryScheduled {
            delay_ms: delay.as_millis() as u64,
        });
        self.arm_restart(delay);
    }

    // ── session lifecycle ────────────────────────────────────────────────

    async fn start_session(&mut self) {
        self.generation += 1;
        self.set_phase(ListeningPhase::Listening);
        debug!(generation = self.generation, "starting recognizer session");

        let session = SessionHandle {
            generation: self.generation,
        };
        if let Err(fault) = self.recognizer.start(session).await {
            self.on_recognizer_failed(self.generation, fault).await;
        }
    }

    async fn deactivate_and_commit(&mut self) {
        self.active = false;
        self.set_phase(ListeningPhase::Idle);
        self.listening_since = None;
        self.restart_timer.disarm();
        self.commit_timer.disarm();
        self.commit().await;
    }

    /// Commit the draft as one user utterance. Reached from the post-stop
    /// result path, the safety timer, and the error-as-stop path; the
    /// draft is consumed on first entry, so later entries are no-ops.
    async fn commit(&mut self) {
        self.set_phase(ListeningPhase::Idle);

        let text = self.draft.take();
        if text.is_empty() {
            debug!("empty draft, nothing to commit");
            return;
        }

        info!(chars = text.len(), "committing utterance");
        self.emit(TurnEvent::UtteranceCommitted { text: text.clone() });

        let sink = Arc::clone(&self.sink);
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let event = match sink.submit(&text).await {
                Ok(reply) => ControllerEvent::ReplyReady { text: reply },
                Err(e) => ControllerEvent::ReplyFailed {
                    message: e.to_string(),
                },
            };
            let _ = tx.send(event).await;
        });
    }

    // ── replies and playback ─────────────────────────────────────────────

    async fn on_reply_ready(&mut self, text: String) {
        self.emit(TurnEvent::ReplyReceived { text: text.clone() });

        if !self.speak_replies {
            debug!("speak replies disabled, reply not spoken");
            return;
        }
        self.speak_reply(&text).await;
    }

    async fn speak_reply(&mut self, text: &str) {
        let chunks = chunk_utterance(text, self.config.tts_chunk_chars);
        if chunks.is_empty() {
            return;
        }

        self.reply_seq += 1;
        let last_index = chunks.len() - 1;
        debug!(chunks = chunks.len(), reply = self.reply_seq, "queueing reply for playback");

        for (index, chunk) in chunks.iter().enumerate() {
            let utterance_id = format!("reply-{}-{}", self.reply_seq, index);
            let mode = if index == 0 {
                QueueMode::Flush
            } else {
                QueueMode::Append
            };
            // Only the final chunk's completion ends the speaking turn.
            if index == last_index {
                self.playback.final_utterance_id = Some(utterance_id.clone());
            }
            self.synthesizer.speak(chunk, &utterance_id, mode).await;
        }
    }

    // ── helpers ──────────────────────────────────────────────────────────

    fn set_phase(&mut self, phase: ListeningPhase) {
        if phase != self.phase {
            info!(from = %self.phase, to = %phase, "phase transition");
            self.phase = phase;
        }
    }

    fn emit(&self, event: TurnEvent) {
        debug!(%event, "emitting turn event");
        let _ = self.event_tx.send(event);
    }

    fn publish_status(&self) {
        let status = TurnStatus {
            phase: self.phase,
            speaking: self.playback.speaking,
            speak_replies: self.speak_replies,
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::SinkError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRecognizer {
        starts: Mutex<Vec<u64>>,
        stops: AtomicUsize,
        cancels: AtomicUsize,
        recreates: AtomicUsize,
        releases: AtomicUsize,
        fail_next: Mutex<VecDeque<RecognizerFault>>,
    }

    impl FakeRecognizer {
        fn starts(&self) -> Vec<u64> {
            self.starts.lock().unwrap().clone()
        }

        fn fail_next(&self, fault: RecognizerFault) {
            self.fail_next.lock().unwrap().push_back(fault);
        }
    }

    #[async_trait]
    impl SpeechRecognizer for FakeRecognizer {
        async fn start(&self, session: SessionHandle) -> Result<(), RecognizerFault> {
            self.starts.lock().unwrap().push(session.generation);
            match self.fail_next.lock().unwrap().pop_front() {
                Some(fault) => Err(fault),
                None => Ok(()),
            }
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        async fn recreate(&self) {
            self.recreates.fetch_add(1, Ordering::SeqCst);
        }

        async fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeSynthesizer {
        spoken: Mutex<Vec<(String, String, QueueMode)>>,
        stops: AtomicUsize,
    }

    impl FakeSynthesizer {
        fn spoken(&self) -> Vec<(String, String, QueueMode)> {
            self.spoken.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn speak(&self, text: &str, utterance_id: &str, mode: QueueMode) {
            self.spoken
                .lock()
                .unwrap()
                .push((text.to_string(), utterance_id.to_string(), mode));
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeSink {
        submitted: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeSink {
        fn submitted(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConversationSink for FakeSink {
        async fn submit(&self, text: &str) -> Result<String, SinkError> {
            self.submitted.lock().unwrap().push(text.to_string());
            if self.fail {
                Err(SinkError::Transport("connection refused".to_string()))
            } else {
                Ok(format!("echo: {}", text))
            }
        }
    }

    struct Harness {
        controller: TurnController,
        cmd_rx: mpsc::Receiver<ControllerEvent>,
        event_rx: broadcast::Receiver<TurnEvent>,
        status_rx: watch::Receiver<TurnStatus>,
        recognizer: Arc<FakeRecognizer>,
        synthesizer: Arc<FakeSynthesizer>,
        sink: Arc<FakeSink>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_sink(FakeSink::default())
        }

        fn with_sink(sink: FakeSink) -> Self {
            let recognizer = Arc::new(FakeRecognizer::default());
            let synthesizer = Arc::new(FakeSynthesizer::default());
            let sink = Arc::new(sink);
            let (cmd_tx, cmd_rx) = mpsc::channel(64);
            let (event_tx, event_rx) = broadcast::channel(64);
            let (status_tx, status_rx) = watch::channel(TurnStatus::default());

            let controller = TurnController::new(
                TurnConfig::default(),
                Arc::clone(&recognizer) as Arc<dyn SpeechRecognizer>,
                Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>,
                Arc::clone(&sink) as Arc<dyn ConversationSink>,
                event_tx,
                status_tx,
                cmd_tx,
            );

            Self {
                controller,
                cmd_rx,
                event_rx,
                status_rx,
                recognizer,
                synthesizer,
                sink,
            }
        }

        async fn handle(&mut self, event: ControllerEvent) {
            self.controller.handle_event(event).await;
        }

        /// Receive the next queued event (timer fire, sink completion) and
        /// feed it back into the controller, as the run loop would.
        async fn drive(&mut self) {
            let event = self.cmd_rx.recv().await.expect("queued event");
            self.controller.handle_event(event).await;
        }

        /// Drive queued events until one matching `pred` has been handled.
        async fn drive_until(&mut self, pred: impl Fn(&ControllerEvent) -> bool) {
            loop {
                let event = self.cmd_rx.recv().await.expect("queued event");
                let matched = pred(&event);
                self.controller.handle_event(event).await;
                if matched {
                    return;
                }
            }
        }

        fn status(&self) -> TurnStatus {
            *self.status_rx.borrow()
        }

        fn drain_events(&mut self) -> Vec<TurnEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.event_rx.try_recv() {
                events.push(event);
            }
            events
        }

        /// Start listening and drive the warmup timer so the first
        /// recognizer session is live.
        async fn start_listening(&mut self) {
            self.handle(ControllerEvent::StartRequested).await;
            self.drive().await; // warmup -> first session
        }
    }

    fn result(generation: u64, text: &str) -> ControllerEvent {
        ControllerEvent::FinalResult {
            generation,
            text: text.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_gesture_opens_recognizer_session() {
        let mut h = Harness::new();

        h.handle(ControllerEvent::StartRequested).await;
        assert_eq!(h.status().phase, ListeningPhase::Listening);
        assert!(h.recognizer.starts().is_empty()); // warmup still pending

        h.drive().await;
        assert_eq!(h.recognizer.starts(), vec![1]);
        let events = h.drain_events();
        assert!(matches!(events[0], TurnEvent::ListeningStarted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_gesture_is_idempotent() {
        let mut h = Harness::new();

        h.handle(ControllerEvent::StartRequested).await;
        h.handle(ControllerEvent::StartRequested).await;
        h.drive().await;

        assert_eq!(h.recognizer.starts(), vec![1]);
        let started = h
            .drain_events()
            .iter()
            .filter(|e| matches!(e, TurnEvent::ListeningStarted))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_gesture_while_idle_is_ignored() {
        let mut h = Harness::new();

        h.handle(ControllerEvent::StopRequested).await;
        assert_eq!(h.status().phase, ListeningPhase::Idle);
        assert!(h.drain_events().is_empty());
    }

    // Scenario A + P2: fragments from one session accumulate and the stop
    // commits them as a single utterance.
    #[tokio::test(start_paused = true)]
    async fn test_results_accumulate_and_commit_on_stop() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(result(1, "hello")).await;
        h.handle(result(1, "world")).await;
        h.handle(ControllerEvent::StopRequested).await;

        // Stale restart cooldowns fire first, then the safety commit; the
        // sink reply proves the submission ran.
        h.drive_until(|e| matches!(e, ControllerEvent::SafetyCommitElapsed { .. }))
            .await;
        h.drive_until(|e| matches!(e, ControllerEvent::ReplyReady { .. }))
            .await;

        assert_eq!(h.sink.submitted(), vec!["hello world"]);
        let events = h.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::UtteranceCommitted { text } if text == "hello world")));
    }

    // Draft survives session relaunches: fragments keep accumulating
    // across generations within one listening session.
    #[tokio::test(start_paused = true)]
    async fn test_draft_spans_recognizer_sessions() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(result(1, "hello")).await;
        h.drive().await; // cooldown -> second session, generation 2
        assert_eq!(h.recognizer.starts(), vec![1, 2]);

        h.handle(result(2, "world")).await;
        h.handle(ControllerEvent::StopRequested).await;
        h.drive_until(|e| matches!(e, ControllerEvent::SafetyCommitElapsed { .. }))
            .await;
        h.drive_until(|e| matches!(e, ControllerEvent::ReplyReady { .. }))
            .await;

        assert_eq!(h.sink.submitted(), vec!["hello world"]);
    }

    // P1: whichever of {late result, safety timer} fires second must not
    // commit again.
    #[tokio::test(start_paused = true)]
    async fn test_no_double_commit_when_result_beats_safety_timer() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(result(1, "hello")).await;
        h.handle(ControllerEvent::StopRequested).await;

        // Late in-flight result observes the stop and commits immediately.
        h.handle(result(1, "world")).await;
        h.drive_until(|e| matches!(e, ControllerEvent::ReplyReady { .. }))
            .await;
        assert_eq!(h.sink.submitted(), vec!["hello world"]);

        // The stale cooldown timer and the stale safety timer still fire;
        // neither may commit again.
        h.drive().await;
        h.drive().await;
        assert_eq!(h.sink.submitted(), vec!["hello world"]);
        let commits = h
            .drain_events()
            .iter()
            .filter(|e| matches!(e, TurnEvent::UtteranceCommitted { .. }))
            .count();
        assert_eq!(commits, 1);
    }

    // Scenario C: stop confirmation never arrives; the safety timer
    // commits what the draft held at stop time.
    #[tokio::test(start_paused = true)]
    async fn test_safety_timer_commits_when_stop_confirmation_is_lost() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(result(1, "hello")).await;
        h.handle(ControllerEvent::StopRequested).await;

        h.drive().await; // stale restart cooldown
        assert!(h.sink.submitted().is_empty());
        h.drive().await; // safety commit
        h.drive_until(|e| matches!(e, ControllerEvent::ReplyReady { .. }))
            .await;
        assert_eq!(h.sink.submitted(), vec!["hello"]);
    }

    // P4: committing an empty draft forwards nothing.
    #[tokio::test(start_paused = true)]
    async fn test_empty_commit_is_a_no_op() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(ControllerEvent::StopRequested).await;
        h.drive().await; // safety commit on empty draft

        assert!(h.sink.submitted().is_empty());
        assert!(!h
            .drain_events()
            .iter()
            .any(|e| matches!(e, TurnEvent::UtteranceCommitted { .. })));
    }

    // P3: results tagged with an older generation mutate nothing.
    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_result_is_ignored() {
        let mut h = Harness::new();
        h.start_listening().await;
        h.handle(result(1, "hello")).await;
        h.drive().await; // relaunch, generation 2

        h.handle(result(1, "ghost")).await; // stale
        h.handle(ControllerEvent::StopRequested).await;
        h.drive().await;
        h.drive().await;

        assert_eq!(h.sink.submitted(), vec!["hello"]);
    }

    // Scenario B: two busy faults in the same window arm one restart, not
    // two; the session eventually relaunches once.
    #[tokio::test(start_paused = true)]
    async fn test_duplicate_faults_arm_a_single_restart() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(ControllerEvent::RecognizerFailed {
            generation: 1,
            fault: RecognizerFault::Busy,
        })
        .await;
        assert_eq!(h.status().phase, ListeningPhase::ErrorBackoff);
        h.handle(ControllerEvent::RecognizerFailed {
            generation: 1,
            fault: RecognizerFault::Busy,
        })
        .await;

        // Both sleep tasks fire; only the second-armed sequence is live.
        h.drive().await;
        h.drive().await;

        assert_eq!(h.recognizer.starts(), vec![1, 2]);
        assert_eq!(h.status().phase, ListeningPhase::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_retries_until_listening() {
        let mut h = Harness::new();
        h.recognizer.fail_next(RecognizerFault::Busy);
        h.recognizer.fail_next(RecognizerFault::Busy);
        h.start_listening().await;

        assert_eq!(h.status().phase, ListeningPhase::ErrorBackoff);
        h.drive().await; // retry 1, busy again
        assert_eq!(h.status().phase, ListeningPhase::ErrorBackoff);
        h.drive().await; // retry 2, succeeds

        assert_eq!(h.recognizer.starts(), vec![1, 2, 3]);
        assert_eq!(h.status().phase, ListeningPhase::Listening);
    }

    // Design note: a fault observed after the stop gesture is the stop
    // confirmation, even a busy one. Commit and retire.
    #[tokio::test(start_paused = true)]
    async fn test_fault_after_stop_commits_draft() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(result(1, "hello")).await;
        h.handle(ControllerEvent::StopRequested).await;
        h.handle(ControllerEvent::RecognizerFailed {
            generation: 1,
            fault: RecognizerFault::Busy,
        })
        .await;
        h.drive_until(|e| matches!(e, ControllerEvent::ReplyReady { .. }))
            .await;

        assert_eq!(h.sink.submitted(), vec!["hello"]);
        assert_eq!(h.status().phase, ListeningPhase::Idle);

        // Stale timers change nothing.
        h.drive().await; // stale cooldown
        h.drive().await; // stale safety commit
        assert_eq!(h.sink.submitted(), vec!["hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_session_recreates_engine_before_retry() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(ControllerEvent::RecognizerFailed {
            generation: 1,
            fault: RecognizerFault::AudioDevice,
        })
        .await;

        assert_eq!(h.recognizer.recreates.load(Ordering::SeqCst), 1);
        assert_eq!(h.status().phase, ListeningPhase::ErrorBackoff);

        h.drive().await;
        assert_eq!(h.recognizer.starts(), vec![1, 2]);
        assert_eq!(h.status().phase, ListeningPhase::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_engine_failure_gives_up() {
        let mut h = Harness::new();
        for _ in 0..10 {
            h.recognizer.fail_next(RecognizerFault::Client);
        }
        h.handle(ControllerEvent::StartRequested).await;
        h.drive().await; // warmup -> first failing session

        // Each retry fails again until the reset cap trips.
        let cap = TurnConfig::default().max_engine_resets as usize;
        for _ in 0..cap {
            h.drive().await;
        }

        assert_eq!(h.status().phase, ListeningPhase::Idle);
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, TurnEvent::RecognizerUnavailable { .. })));
        assert_eq!(h.recognizer.starts().len(), cap + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_surfaces_and_commits() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(result(1, "hello")).await;
        h.handle(ControllerEvent::RecognizerFailed {
            generation: 1,
            fault: RecognizerFault::PermissionDenied,
        })
        .await;
        h.drive_until(|e| matches!(e, ControllerEvent::ReplyReady { .. }))
            .await;

        assert_eq!(h.status().phase, ListeningPhase::Idle);
        assert_eq!(h.sink.submitted(), vec!["hello"]);
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, TurnEvent::RecognizerUnavailable { .. })));

        // No retry: the stale cooldown timer fires without a new session.
        h.drive().await;
        assert_eq!(h.recognizer.starts(), vec![1]);
    }

    // P5: one gesture silences the assistant, the next one listens.
    #[tokio::test(start_paused = true)]
    async fn test_start_gesture_while_speaking_only_silences() {
        let mut h = Harness::new();

        h.handle(ControllerEvent::PlaybackStarted {
            utterance_id: "reply-1-0".to_string(),
        })
        .await;
        assert!(h.status().speaking);

        h.handle(ControllerEvent::StartRequested).await;
        assert_eq!(h.synthesizer.stops.load(Ordering::SeqCst), 1);
        assert!(!h.status().speaking);
        assert_eq!(h.status().phase, ListeningPhase::Idle);
        assert!(h.recognizer.starts().is_empty());

        h.handle(ControllerEvent::StartRequested).await;
        assert_eq!(h.status().phase, ListeningPhase::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_is_spoken_and_echoed() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.handle(result(1, "hello")).await;
        h.handle(ControllerEvent::StopRequested).await;
        h.handle(result(1, "")).await; // empty stop confirmation commits
        h.drive().await; // reply from the sink

        let spoken = h.synthesizer.spoken();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].0, "echo: hello");
        assert_eq!(spoken[0].2, QueueMode::Flush);
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, TurnEvent::ReplyReceived { text } if text == "echo: hello")));
    }

    // Scenario D: a long reply splits into ordered chunks and the speaking
    // flag holds until the chunk tagged final completes.
    #[tokio::test(start_paused = true)]
    async fn test_long_reply_chunks_and_final_completion_ends_turn() {
        let mut h = Harness::new();

        let reply = "This is one moderately sized sentence for the test. ".repeat(100);
        h.handle(ControllerEvent::ReplyReady { text: reply }).await;

        let spoken = h.synthesizer.spoken();
        assert!(spoken.len() >= 3);
        assert_eq!(spoken[0].2, QueueMode::Flush);
        assert!(spoken[1..].iter().all(|s| s.2 == QueueMode::Append));
        assert_eq!(spoken[0].1, "reply-1-0");

        let final_id = spoken.last().unwrap().1.clone();

        h.handle(ControllerEvent::PlaybackStarted {
            utterance_id: spoken[0].1.clone(),
        })
        .await;
        assert!(h.status().speaking);

        h.handle(ControllerEvent::PlaybackFinished {
            utterance_id: spoken[0].1.clone(),
        })
        .await;
        assert!(h.status().speaking);

        h.handle(ControllerEvent::PlaybackFinished {
            utterance_id: final_id,
        })
        .await;
        assert!(!h.status().speaking);
        let events = h.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::SpeakingFinished { interrupted: false })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_replies_toggle_mutes_playback() {
        let mut h = Harness::new();

        h.handle(ControllerEvent::SetSpeakReplies { enabled: false })
            .await;
        h.handle(ControllerEvent::ReplyReady {
            text: "quiet reply".to_string(),
        })
        .await;

        assert!(h.synthesizer.spoken().is_empty());
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, TurnEvent::ReplyReceived { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_reaches_error_slot() {
        let mut h = Harness::with_sink(FakeSink {
            fail: true,
            ..FakeSink::default()
        });
        h.start_listening().await;

        h.handle(result(1, "hello")).await;
        h.handle(ControllerEvent::StopRequested).await;
        h.handle(result(1, "")).await;
        h.drive().await; // sink outcome

        assert!(h.synthesizer.spoken().is_empty());
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, TurnEvent::ReplyFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_engines() {
        let mut h = Harness::new();
        h.start_listening().await;

        h.controller.shutdown().await;

        assert_eq!(h.recognizer.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.recognizer.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(h.recognizer.releases.load(Ordering::SeqCst), 1);
        assert_eq!(h.synthesizer.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_timer_after_stop_is_inert() {
        let mut h = Harness::new();
        h.handle(ControllerEvent::StartRequested).await;
        h.handle(ControllerEvent::StopRequested).await;

        h.drive().await; // stale warmup timer
        h.drive().await; // safety commit, empty

        assert!(h.recognizer.starts().is_empty());
        assert_eq!(h.status().phase, ListeningPhase::Idle);
    }
}
