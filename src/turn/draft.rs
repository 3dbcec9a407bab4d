//! Accumulating draft buffer for one listening session
//!
//! Recognizer sessions end after a single utterance, so a continuous turn
//! is stitched together from several result fragments. The draft joins
//! them with single spaces and is consumed exactly once on commit.

/// In-progress, uncommitted transcription text.
#[derive(Debug, Default)]
pub struct SpeechDraft {
    text: String,
}

impl SpeechDraft {
    /// Create an empty draft.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any accumulated text.
    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Append a recognized fragment, space-joined to what came before.
    ///
    /// Blank fragments are ignored so a recognizer that reports empty
    /// results cannot pad the draft with whitespace.
    pub fn append(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(fragment);
    }

    /// Whether any text has accumulated.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Consume the draft, returning the trimmed text and leaving it empty.
    pub fn take(&mut self) -> String {
        let text = std::mem::take(&mut self.text);
        text.trim().to_string()
    }
}
