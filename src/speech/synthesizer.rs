//! Speech output seam and playback state tracking

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How an utterance joins the engine's playback queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Drop anything queued or playing and start this utterance.
    Flush,
    /// Play after everything already queued.
    Append,
}

/// Asynchronous text-to-speech engine seam.
///
/// Lifecycle events (started, finished, error, stopped) are delivered out
/// of band, tagged with the utterance id passed to `speak`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Queue an utterance for playback.
    async fn speak(&self, text: &str, utterance_id: &str, mode: QueueMode);

    /// Interrupt playback and flush the queue.
    async fn stop(&self);
}

/// Playback state as observed through engine lifecycle events.
///
/// Long replies are queued as several chunks; `final_utterance_id` tags the
/// last chunk, whose completion is what ends the speaking turn.
#[derive(Debug, Default)]
pub struct PlaybackState {
    pub speaking: bool,
    pub utterance_id: Option<String>,
    pub final_utterance_id: Option<String>,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record playback start of one chunk. Returns true when this begins a
    /// speaking turn (the flag transitioned).
    pub fn on_started(&mut self, utterance_id: &str) -> bool {
        let began = !self.speaking;
        self.speaking = true;
        self.utterance_id = Some(utterance_id.to_string());
        began
    }

    /// Record normal or failed completion of one chunk. Returns true when
    /// this ends the speaking turn (the chunk was the final one).
    pub fn on_completed(&mut self, utterance_id: &str) -> bool {
        if self.final_utterance_id.as_deref() != Some(utterance_id) {
            return false;
        }
        self.final_utterance_id = None;
        self.finish()
    }

    /// Record an engine stop. An interrupted stop flushes the whole queue,
    /// so it ends the turn regardless of which chunk it names.
    pub fn on_stopped(&mut self, utterance_id: &str, interrupted: bool) -> bool {
        if interrupted {
            return self.finish();
        }
        self.on_completed(utterance_id)
    }

    /// Clear the flag eagerly (silence gesture). Returns true if it was set.
    pub fn silence(&mut self) -> bool {
        self.finish()
    }

    /// End the speaking turn without touching `final_utterance_id`: a new
    /// reply may already be queued behind the chunk this event names, and
    /// its tag must survive the interruption of the old one.
    fn finish(&mut self) -> bool {
        let was_speaking = self.speaking;
        self.speaking = false;
        self.utterance_id = None;
        was_speaking
    }
}
