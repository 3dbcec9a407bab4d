//! Configuration loading and management
//!
//! Everything is environment-driven with built-in defaults; the timing
//! knobs default to the values the turn-taking behavior was tuned with.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Chat proxy settings for the conversation sink
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Base URL of the chat proxy
    pub base_url: String,

    /// Upstream provider name forwarded to the proxy
    pub provider: String,

    /// Model identifier forwarded to the proxy
    pub model: String,
}

/// Turn-taking timing and playback knobs
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Delay between a start gesture and the first recognizer session,
    /// letting the audio path settle
    pub start_warmup: Duration,

    /// Cooldown before relaunching the recognizer after a result
    pub restart_cooldown: Duration,

    /// Retry delay after a busy fault
    pub busy_retry: Duration,

    /// Retry delay after a transient fault (no match, timeout)
    pub transient_retry: Duration,

    /// How long to wait for a stop confirmation before committing anyway
    pub safety_commit: Duration,

    /// Consecutive engine recreations tolerated before giving up
    pub max_engine_resets: u32,

    /// Character budget per speech-output chunk
    pub tts_chunk_chars: usize,

    /// Whether replies are spoken aloud by default
    pub speak_replies: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            start_warmup: Duration::from_millis(800),
            restart_cooldown: Duration::from_millis(600),
            busy_retry: Duration::from_millis(2000),
            transient_retry: Duration::from_millis(1000),
            safety_commit: Duration::from_millis(2000),
            max_engine_resets: 5,
            tts_chunk_chars: 2000,
            speak_replies: true,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Conversation sink settings
    pub proxy: ProxyConfig,

    /// Controller knobs
    pub turn: TurnConfig,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("voicechat");

        let socket_path = data_dir.join("daemon.sock");

        let proxy = ProxyConfig {
            base_url: env_or("VOICECHAT_PROXY_URL", "http://127.0.0.1:3000"),
            provider: env_or("VOICECHAT_PROVIDER", "openai"),
            model: env_or("VOICECHAT_MODEL", "gpt-4o-mini"),
        };

        let defaults = TurnConfig::default();
        let turn = TurnConfig {
            start_warmup: env_ms("VOICECHAT_START_WARMUP_MS", defaults.start_warmup),
            restart_cooldown: env_ms("VOICECHAT_RESTART_COOLDOWN_MS", defaults.restart_cooldown),
            busy_retry: env_ms("VOICECHAT_BUSY_RETRY_MS", defaults.busy_retry),
            transient_retry: env_ms("VOICECHAT_TRANSIENT_RETRY_MS", defaults.transient_retry),
            safety_commit: env_ms("VOICECHAT_SAFETY_COMMIT_MS", defaults.safety_commit),
            ..defaults
        };

        Ok(Self {
            socket_path,
            data_dir,
            proxy,
            turn,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
