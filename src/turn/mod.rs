//! Turn-taking module
//!
//! Owns the microphone-session state machine with three phases:
//! - Idle: no capture, waiting for a start gesture
//! - Listening: a recognizer session is live or about to relaunch
//! - ErrorBackoff: waiting out a retry delay after a recognizer fault

mod controller;
mod draft;
mod timers;

pub use controller::{ControllerEvent, ListeningPhase, TurnController, TurnStatus};
