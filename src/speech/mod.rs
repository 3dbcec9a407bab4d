//! Speech engine seams: recognizer and synthesizer traits, the fault
//! taxonomy, reply chunking, and the IPC-bridged engine adapters.

pub mod bridge;
mod chunker;
mod recognizer;
mod synthesizer;

pub use chunker::chunk_utterance;
pub use recognizer::{FaultClass, RecognizerFault, SessionHandle, SpeechRecognizer};
pub use synthesizer::{PlaybackState, QueueMode, SpeechSynthesizer};
