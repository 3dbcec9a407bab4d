//! IPC-bridged speech engines
//!
//! The daemon owns turn-taking; the platform speech engines live in a
//! companion process that connects over IPC. Outbound engine commands fan
//! out on a broadcast channel that the IPC server forwards to subscribed
//! clients; inbound engine events arrive as IPC requests and convert into
//! controller events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::turn::ControllerEvent;

use super::recognizer::{RecognizerFault, SessionHandle, SpeechRecognizer};
use super::synthesizer::{QueueMode, SpeechSynthesizer};

/// Commands pushed to the engine client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineCommand {
    /// Open a recognition session; deliver results tagged with `generation`.
    StartRecognizer { generation: u64 },
    /// Finish the current session and deliver what it has.
    StopRecognizer,
    /// Abandon the current session.
    CancelRecognizer,
    /// Tear down and rebuild the recognizer after an unusable-session fault.
    ResetRecognizer,
    /// Release the recognizer for good; the daemon is shutting down.
    ReleaseRecognizer,
    /// Queue an utterance for playback.
    Speak {
        utterance_id: String,
        text: String,
        mode: QueueMode,
    },
    /// Interrupt playback and flush the queue.
    StopSpeaking,
}

/// Events pushed by the engine client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PartialResult { generation: u64, text: String },
    FinalResult { generation: u64, text: String },
    RecognizerFault {
        generation: u64,
        fault: RecognizerFault,
    },
    SpeechStarted { utterance_id: String },
    SpeechFinished { utterance_id: String },
    SpeechFailed { utterance_id: String },
    SpeechStopped {
        utterance_id: String,
        interrupted: bool,
    },
}

impl From<EngineEvent> for ControllerEvent {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::PartialResult { generation, text } => {
                ControllerEvent::PartialResult { generation, text }
            }
            EngineEvent::FinalResult { generation, text } => {
                ControllerEvent::FinalResult { generation, text }
            }
            EngineEvent::RecognizerFault { generation, fault } => {
                ControllerEvent::RecognizerFailed { generation, fault }
            }
            EngineEvent::SpeechStarted { utterance_id } => {
                ControllerEvent::PlaybackStarted { utterance_id }
            }
            EngineEvent::SpeechFinished { utterance_id } => {
                ControllerEvent::PlaybackFinished { utterance_id }
            }
            EngineEvent::SpeechFailed { utterance_id } => {
                ControllerEvent::PlaybackFailed { utterance_id }
            }
            EngineEvent::SpeechStopped {
                utterance_id,
                interrupted,
            } => ControllerEvent::PlaybackStopped {
                utterance_id,
                interrupted,
            },
        }
    }
}

/// Recognizer seam realized over the IPC command channel.
pub struct IpcRecognizer {
    commands: broadcast::Sender<EngineCommand>,
}

impl IpcRecognizer {
    pub fn new(commands: broadcast::Sender<EngineCommand>) -> Self {
        Self { commands }
    }

    fn push(&self, command: EngineCommand) -> bool {
        match self.commands.send(command) {
            Ok(_) => true,
            Err(_) => {
                debug!("no engine client subscribed, command dropped");
                false
            }
        }
    }
}

#[async_trait]
impl SpeechRecognizer for IpcRecognizer {
    async fn start(&self, session: SessionHandle) -> Result<(), RecognizerFault> {
        if self.push(EngineCommand::StartRecognizer {
            generation: session.generation,
        }) {
            Ok(())
        } else {
            // No engine attached yet; reported as a client fault so the
            // controller's recreate/retry path keeps probing for one.
            warn!("recognizer start with no engine client attached");
            Err(RecognizerFault::Client)
        }
    }

    async fn stop(&self) {
        self.push(EngineCommand::StopRecognizer);
    }

    async fn cancel(&self) {
        self.push(EngineCommand::CancelRecognizer);
    }

    async fn recreate(&self) {
        self.push(EngineCommand::ResetRecognizer);
    }

    async fn release(&self) {
        self.push(EngineCommand::ReleaseRecognizer);
    }
}

/// Synthesizer seam realized over the IPC command channel.
pub struct IpcSynthesizer {
    commands: broadcast::Sender<EngineCommand>,
}

impl IpcSynthesizer {
    pub fn new(commands: broadcast::Sender<EngineCommand>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl SpeechSynthesizer for IpcSynthesizer {
    async fn speak(&self, text: &str, utterance_id: &str, mode: QueueMode) {
        let sent = self.commands.send(EngineCommand::Speak {
            utterance_id: utterance_id.to_string(),
            text: text.to_string(),
            mode,
        });
        if sent.is_err() {
            warn!("speak command dropped, no engine client attached");
        }
    }

    async fn stop(&self) {
        let _ = self.commands.send(EngineCommand::StopSpeaking);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_without_engine_is_client_fault() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let recognizer = IpcRecognizer::new(tx);
        let result = tokio_test::block_on(recognizer.start(SessionHandle { generation: 1 }));
        assert_eq!(result, Err(RecognizerFault::Client));
    }

    #[test]
    fn test_start_reaches_subscribed_engine() {
        let (tx, mut rx) = broadcast::channel(8);
        let recognizer = IpcRecognizer::new(tx);
        tokio_test::block_on(recognizer.start(SessionHandle { generation: 7 })).unwrap();
        let command = rx.try_recv().unwrap();
        assert!(matches!(command, EngineCommand::StartRecognizer { generation: 7 }));
    }

    #[test]
    fn test_speak_carries_queue_mode() {
        let (tx, mut rx) = broadcast::channel(8);
        let synthesizer = IpcSynthesizer::new(tx);
        tokio_test::block_on(synthesizer.speak("hi", "reply-1-0", QueueMode::Flush));
        match rx.try_recv().unwrap() {
            EngineCommand::Speak {
                utterance_id,
                text,
                mode,
            } => {
                assert_eq!(utterance_id, "reply-1-0");
                assert_eq!(text, "hi");
                assert_eq!(mode, QueueMode::Flush);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_engine_event_serialization() {
        let event = EngineEvent::FinalResult {
            generation: 3,
            text: "hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("final_result"));
        assert!(json.contains("hello"));

        let json = r#"{"type":"recognizer_fault","generation":2,"fault":"busy"}"#;
        let event: EngineEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            EngineEvent::RecognizerFault {
                generation: 2,
                fault: RecognizerFault::Busy
            }
        ));
    }

    #[test]
    fn test_engine_event_converts_to_controller_event() {
        let event = EngineEvent::SpeechStopped {
            utterance_id: "reply-1-2".to_string(),
            interrupted: true,
        };
        match ControllerEvent::from(event) {
            ControllerEvent::PlaybackStopped {
                utterance_id,
                interrupted,
            } => {
                assert_eq!(utterance_id, "reply-1-2");
                assert!(interrupted);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
