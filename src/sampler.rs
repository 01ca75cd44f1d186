//! Microphone-amplitude polling used to tell a human pickup apart from
//! voicemail. A run polls the source at a fixed cadence inside a bounded
//! window and delivers exactly one verdict: the first loud sample, or the
//! window expiring without one.

use crate::log_debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Polled amplitude collaborator. Recording permission is a precondition of
/// constructing an implementation, not something the sampler checks.
pub trait AmplitudeSource: Send + Sync {
    /// Current amplitude in the platform's recorder units (0..=32767).
    fn current_amplitude(&self) -> u32;
}

/// Tunables for one sampling run.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Amplitudes strictly above this count as a voice.
    pub threshold: u32,
    pub poll_interval: Duration,
    /// How long to keep listening before assuming voicemail.
    pub window: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            threshold: 1_000,
            poll_interval: Duration::from_millis(100),
            window: Duration::from_millis(5_000),
        }
    }
}

/// Outcome of a sampling run. At most one verdict is produced per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleVerdict {
    Loud,
    WindowExpired,
}

impl SampleVerdict {
    pub fn label(self) -> &'static str {
        match self {
            SampleVerdict::Loud => "loud",
            SampleVerdict::WindowExpired => "window_expired",
        }
    }
}

/// Handle to a running sampler. Dropping it stops the run.
pub struct SamplerRun {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SamplerRun {
    /// Stop the run without blocking. Idempotent; a stopped run delivers no
    /// verdict once the poll loop observes the flag (within one interval).
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Wait for the poll loop to exit. Used by tests and shutdown paths.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SamplerRun {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Spawn the polling thread. `on_verdict` is `FnOnce`, so a run can never
/// report both a loud sample and an expired window.
pub fn start_sampler(
    source: Arc<dyn AmplitudeSource>,
    config: SamplerConfig,
    on_verdict: impl FnOnce(SampleVerdict) + Send + 'static,
) -> SamplerRun {
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_worker = Arc::clone(&cancel);

    let handle = thread::spawn(move || {
        let verdict = run_poll_loop(source.as_ref(), &config, &cancel_for_worker);
        match verdict {
            Some(verdict) if !cancel_for_worker.load(Ordering::SeqCst) => on_verdict(verdict),
            Some(verdict) => {
                log_debug(&format!(
                    "sampler|suppressed_after_stop|verdict={}",
                    verdict.label()
                ));
            }
            None => {}
        }
    });

    SamplerRun {
        cancel,
        handle: Some(handle),
    }
}

fn run_poll_loop(
    source: &dyn AmplitudeSource,
    config: &SamplerConfig,
    cancel: &AtomicBool,
) -> Option<SampleVerdict> {
    let deadline = Instant::now() + config.window;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return None;
        }
        let amplitude = source.current_amplitude();
        if amplitude > config.threshold {
            log_debug(&format!(
                "sampler|loud|amplitude={amplitude}|threshold={}",
                config.threshold
            ));
            return Some(SampleVerdict::Loud);
        }
        let now = Instant::now();
        if now >= deadline {
            return Some(SampleVerdict::WindowExpired);
        }
        thread::sleep(config.poll_interval.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Plays back a fixed sequence of amplitudes, then a steady fallback.
    struct ScriptedSource {
        levels: Mutex<VecDeque<u32>>,
        fallback: u32,
    }

    impl ScriptedSource {
        fn new(levels: Vec<u32>, fallback: u32) -> Self {
            Self {
                levels: Mutex::new(levels.into()),
                fallback,
            }
        }
    }

    impl AmplitudeSource for ScriptedSource {
        fn current_amplitude(&self) -> u32 {
            self.levels
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback)
        }
    }

    fn fast_config(window_ms: u64) -> SamplerConfig {
        SamplerConfig {
            threshold: 1_000,
            poll_interval: Duration::from_millis(1),
            window: Duration::from_millis(window_ms),
        }
    }

    type CountedRun = (
        Arc<AtomicUsize>,
        Arc<Mutex<Option<SampleVerdict>>>,
        SamplerRun,
    );

    fn counted_run(source: Arc<dyn AmplitudeSource>, config: SamplerConfig) -> CountedRun {
        let calls = Arc::new(AtomicUsize::new(0));
        let verdict = Arc::new(Mutex::new(None));
        let calls_cb = Arc::clone(&calls);
        let verdict_cb = Arc::clone(&verdict);
        let run = start_sampler(source, config, move |v| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
            *verdict_cb.lock().unwrap() = Some(v);
        });
        (calls, verdict, run)
    }

    #[test]
    fn first_loud_sample_wins() {
        let source = Arc::new(ScriptedSource::new(vec![10, 20, 4_000], 0));
        let (calls, verdict, run) = counted_run(source, fast_config(1_000));
        run.join();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*verdict.lock().unwrap(), Some(SampleVerdict::Loud));
    }

    #[test]
    fn quiet_window_expires() {
        let source = Arc::new(ScriptedSource::new(Vec::new(), 5));
        let (calls, verdict, run) = counted_run(source, fast_config(20));
        run.join();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*verdict.lock().unwrap(), Some(SampleVerdict::WindowExpired));
    }

    #[test]
    fn amplitude_equal_to_threshold_is_not_loud() {
        let source = Arc::new(ScriptedSource::new(Vec::new(), 1_000));
        let (_, verdict, run) = counted_run(source, fast_config(15));
        run.join();
        assert_eq!(*verdict.lock().unwrap(), Some(SampleVerdict::WindowExpired));
    }

    #[test]
    fn stop_is_idempotent_and_suppresses_verdicts() {
        let source = Arc::new(ScriptedSource::new(Vec::new(), 0));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = Arc::clone(&calls);
        let mut run = start_sampler(source, fast_config(5_000), move |_| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        });
        run.stop();
        run.stop();
        run.join();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // Randomized amplitude sequences and stop timings: no run may ever fire
    // more than one callback.
    #[test]
    fn at_most_one_verdict_per_run() {
        let mut seed: u64 = 0x5eed_cafe;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for round in 0..50 {
            let levels: Vec<u32> = (0..16).map(|_| (next() % 2_048) as u32).collect();
            let fallback = (next() % 2_048) as u32;
            let source = Arc::new(ScriptedSource::new(levels, fallback));
            let (calls, _, mut run) = counted_run(source, fast_config(1 + next() % 10));
            if next() % 2 == 0 {
                thread::sleep(Duration::from_millis(next() % 4));
                run.stop();
            }
            run.join();
            let fired = calls.load(Ordering::SeqCst);
            assert!(fired <= 1, "round {round}: callback fired {fired} times");
        }
    }
}
