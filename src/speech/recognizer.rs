//! Transcription source seam and fault taxonomy
//!
//! The recognizer is session-oriented: one utterance per session, after
//! which it must be relaunched. It is also unreliable under load ("busy")
//! and silence ("no match"), so every fault is classified into a retry
//! policy the controller applies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies one recognizer session. Events delivered for an older
/// generation than the controller's current one are stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub generation: u64,
}

/// Faults reported by a transcription engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerFault {
    /// Engine refused a new session while tearing down the previous one.
    #[error("recognizer busy")]
    Busy,
    /// Session ended without recognizing anything.
    #[error("no speech match")]
    NoMatch,
    /// No speech input before the engine's deadline.
    #[error("speech timeout")]
    Timeout,
    /// Engine-side network failure.
    #[error("recognizer network error")]
    Network,
    /// Audio hardware fault; the session is left unusable.
    #[error("audio device fault")]
    AudioDevice,
    /// Engine-internal client fault; the session is left unusable.
    #[error("recognizer client fault")]
    Client,
    /// Microphone permission missing or revoked.
    #[error("microphone permission denied")]
    PermissionDenied,
    /// No recognition service available on this host.
    #[error("speech recognition unsupported")]
    Unsupported,
}

/// Retry policy class for a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Retry after the longer busy delay.
    Busy,
    /// Retry after the short delay.
    Transient,
    /// Tear down and recreate the engine session, then retry.
    Recreate,
    /// Surface once and stop; retrying cannot help.
    NoRetry,
}

impl RecognizerFault {
    pub fn class(self) -> FaultClass {
        match self {
            RecognizerFault::Busy => FaultClass::Busy,
            RecognizerFault::NoMatch | RecognizerFault::Timeout | RecognizerFault::Network => {
                FaultClass::Transient
            }
            RecognizerFault::AudioDevice | RecognizerFault::Client => FaultClass::Recreate,
            RecognizerFault::PermissionDenied | RecognizerFault::Unsupported => FaultClass::NoRetry,
        }
    }
}

/// Asynchronous speech-to-text engine seam.
///
/// Results and faults are delivered out of band, tagged with the generation
/// from the `SessionHandle` they belong to. `stop` is advisory: an engine
/// may still deliver one in-flight result afterwards, which the controller
/// treats as the stop confirmation.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a new recognition session.
    async fn start(&self, session: SessionHandle) -> Result<(), RecognizerFault>;

    /// Ask the engine to finish the current session and deliver what it has.
    async fn stop(&self);

    /// Abandon the current session without expecting results.
    async fn cancel(&self);

    /// Tear down and rebuild the engine session. Used after a fault that
    /// leaves the underlying session unusable. Best-effort, never fails.
    async fn recreate(&self);

    /// Release the engine for good. Called once on shutdown, after `stop`
    /// and `cancel`. Best-effort, never fails.
    async fn release(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_classified_alone() {
        assert_eq!(RecognizerFault::Busy.class(), FaultClass::Busy);
    }

    #[test]
    fn test_silence_faults_are_transient() {
        assert_eq!(RecognizerFault::NoMatch.class(), FaultClass::Transient);
        assert_eq!(RecognizerFault::Timeout.class(), FaultClass::Transient);
        assert_eq!(RecognizerFault::Network.class(), FaultClass::Transient);
    }

    #[test]
    fn test_hardware_faults_require_recreate() {
        assert_eq!(RecognizerFault::AudioDevice.class(), FaultClass::Recreate);
        assert_eq!(RecognizerFault::Client.class(), FaultClass::Recreate);
    }

    #[test]
    fn test_permission_faults_never_retry() {
        assert_eq!(RecognizerFault::PermissionDenied.class(), FaultClass::NoRetry);
        assert_eq!(RecognizerFault::Unsupported.class(), FaultClass::NoRetry);
    }

    #[test]
    fn test_fault_serialization() {
        let json = serde_json::to_string(&RecognizerFault::NoMatch).unwrap();
        assert_eq!(json, r#""no_match""#);
        let fault: RecognizerFault = serde_json::from_str(r#""busy""#).unwrap();
        assert_eq!(fault, RecognizerFault::Busy);
    }
}
