//! Command-line parsing and validation helpers.

use crate::sequence::SequenceConfig;
use crate::sim::CallBehavior;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_RING_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_VOICE_WINDOW_MS: u64 = 5_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_AMPLITUDE_THRESHOLD: u32 = 1_000;

const MIN_RING_TIMEOUT_MS: u64 = 100;
const MAX_RING_TIMEOUT_MS: u64 = 120_000;
const MIN_VOICE_WINDOW_MS: u64 = 100;
const MAX_VOICE_WINDOW_MS: u64 = 60_000;
const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 5_000;
// Recorder amplitude units top out at the 16-bit sample ceiling.
const MAX_AMPLITUDE_THRESHOLD: u32 = 32_767;

/// CLI options for the dispatcher demo. Validated values keep the worker's
/// timing sane before any call is placed.
#[derive(Debug, Parser, Clone)]
#[command(about = "Sequential emergency call dispatcher", author, version)]
pub struct AppConfig {
    /// JSON contact list; a built-in demo list is used when omitted
    #[arg(long)]
    pub contacts: Option<PathBuf>,

    /// Registry index the carousel is centered on when the button is pressed
    #[arg(long = "start-index", default_value_t = 0)]
    pub start_index: usize,

    /// Maximum wait for a pickup before treating the call as unanswered (ms)
    #[arg(long = "ring-timeout-ms", default_value_t = DEFAULT_RING_TIMEOUT_MS)]
    pub ring_timeout_ms: u64,

    /// How long to listen for a voice after pickup (ms)
    #[arg(long = "voice-window-ms", default_value_t = DEFAULT_VOICE_WINDOW_MS)]
    pub voice_window_ms: u64,

    /// Microphone poll cadence during the voice check (ms)
    #[arg(long = "poll-interval-ms", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Amplitudes above this count as a human voice
    #[arg(long = "amplitude-threshold", default_value_t = DEFAULT_AMPLITUDE_THRESHOLD)]
    pub amplitude_threshold: u32,

    /// Stop after this many dial attempts (keeps redialing when omitted)
    #[arg(long = "max-attempts")]
    pub max_attempts: Option<u32>,

    /// Run without recording permission: every pickup is treated as voicemail
    #[arg(long = "assume-voicemail")]
    pub assume_voicemail: bool,

    /// Per-contact behaviors for the simulated line, comma separated
    /// (no-answer, silent, voice, ended, rejected, denied)
    #[arg(long, value_delimiter = ',')]
    pub scenario: Vec<String>,

    /// Delay before a simulated pickup (ms)
    #[arg(long = "answer-delay-ms", default_value_t = 0)]
    pub answer_delay_ms: u64,

    /// Listen on the real microphone during voice checks instead of the sim
    #[cfg(feature = "mic")]
    #[arg(long = "mic")]
    pub use_mic: bool,

    /// Preferred audio input device name
    #[cfg(feature = "mic")]
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Print the loaded contact list and exit
    #[arg(long = "list-contacts", default_value_t = false)]
    pub list_contacts: bool,

    /// Also print machine-readable notice lines
    #[arg(long = "log-events")]
    pub log_events: bool,
}

impl AppConfig {
    /// Check CLI values before the dispatcher is built.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_RING_TIMEOUT_MS..=MAX_RING_TIMEOUT_MS).contains(&self.ring_timeout_ms) {
            bail!(
                "--ring-timeout-ms must be between {MIN_RING_TIMEOUT_MS} and {MAX_RING_TIMEOUT_MS}, got {}",
                self.ring_timeout_ms
            );
        }
        if !(MIN_VOICE_WINDOW_MS..=MAX_VOICE_WINDOW_MS).contains(&self.voice_window_ms) {
            bail!(
                "--voice-window-ms must be between {MIN_VOICE_WINDOW_MS} and {MAX_VOICE_WINDOW_MS}, got {}",
                self.voice_window_ms
            );
        }
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            bail!(
                "--poll-interval-ms must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            );
        }
        if self.poll_interval_ms > self.voice_window_ms {
            bail!(
                "--poll-interval-ms ({}) must not exceed --voice-window-ms ({})",
                self.poll_interval_ms,
                self.voice_window_ms
            );
        }
        if !(1..=MAX_AMPLITUDE_THRESHOLD).contains(&self.amplitude_threshold) {
            bail!(
                "--amplitude-threshold must be between 1 and {MAX_AMPLITUDE_THRESHOLD}, got {}",
                self.amplitude_threshold
            );
        }
        if self.max_attempts == Some(0) {
            bail!("--max-attempts must be at least 1 when set");
        }
        for (index, entry) in self.scenario.iter().enumerate() {
            CallBehavior::parse(entry)
                .with_context(|| format!("--scenario entry {index} is invalid"))?;
        }
        Ok(())
    }

    /// Narrow the CLI surface down to what the dispatcher worker needs.
    pub fn sequence_config(&self) -> SequenceConfig {
        SequenceConfig {
            ring_timeout: Duration::from_millis(self.ring_timeout_ms),
            voice_window: Duration::from_millis(self.voice_window_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            amplitude_threshold: self.amplitude_threshold,
            max_attempts: self.max_attempts,
        }
    }
}
