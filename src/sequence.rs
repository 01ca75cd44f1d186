//! The sequential call dispatcher. One worker thread owns the state machine
//! for a run: it dials the selected contact, waits for the line to ring and
//! be picked up, listens for a human voice, and advances to the next contact
//! when nobody convincing answers. Line observers and the amplitude sampler
//! feed a single event channel, and every event carries the attempt token it
//! was produced under, so late callbacks from a previous attempt are dropped
//! instead of corrupting the current one.

use crate::contacts::{ContactRegistry, SelectionSource};
use crate::log_debug;
use crate::sampler::{self, AmplitudeSource, SampleVerdict, SamplerConfig, SamplerRun};
use crate::telephony::{CallLine, LineState, PlacementError};
use anyhow::{bail, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Identifies one dial attempt. Events stamped with an older token are stale.
pub type AttemptToken = u64;

/// Why the dispatcher moved on from a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    /// The line never got picked up (ring timeout, ended call, or a platform
    /// rejection treated the same way).
    NoAnswer,
    /// The line was picked up but no voice was heard inside the check window.
    VoicemailAssumed,
}

impl AdvanceReason {
    pub fn label(self) -> &'static str {
        match self {
            AdvanceReason::NoAnswer => "no_answer",
            AdvanceReason::VoicemailAssumed => "voicemail_assumed",
        }
    }
}

/// Observable outputs of a run, delivered in order on the run's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceNotice {
    Started { index: usize },
    Advanced {
        from: usize,
        to: usize,
        reason: AdvanceReason,
    },
    Succeeded { index: usize },
    Cancelled,
    /// Calling permission is missing; surfaced once, then the run ends.
    Failed {
        index: usize,
        error: PlacementError,
    },
    /// The configured attempt cap was reached before anyone answered.
    Exhausted { attempts: u32 },
}

/// Dispatcher tunables. Defaults: a 15 s ring wait and a 5 s voice-check
/// window polled every 100 ms.
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    pub ring_timeout: Duration,
    pub voice_window: Duration,
    pub poll_interval: Duration,
    pub amplitude_threshold: u32,
    /// Dial attempts before giving up. `None` keeps redialing until a voice
    /// answers or the run is cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_millis(15_000),
            voice_window: Duration::from_millis(5_000),
            poll_interval: Duration::from_millis(100),
            amplitude_threshold: 1_000,
            max_attempts: None,
        }
    }
}

enum WorkerEvent {
    Line { token: AttemptToken, state: LineState },
    Verdict {
        token: AttemptToken,
        verdict: SampleVerdict,
    },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Dialing,
    RingingWait,
    VoiceCheck,
}

enum AttemptOutcome {
    Answered,
    Advance(AdvanceReason),
    Cancelled,
    Failed(PlacementError),
}

struct ActiveRun {
    cancel: Arc<AtomicBool>,
    events: Sender<WorkerEvent>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Public face of the dispatcher. `start`/`cancel`/`toggle` never block; all
/// waiting happens on the worker thread.
pub struct SequenceController {
    registry: Arc<ContactRegistry>,
    line: Arc<dyn CallLine>,
    amplitude: Option<Arc<dyn AmplitudeSource>>,
    config: SequenceConfig,
    active: Option<ActiveRun>,
}

impl SequenceController {
    /// Pass `None` for `amplitude` when recording permission is unavailable;
    /// pickups are then treated as voicemail and the sequence keeps walking.
    pub fn new(
        registry: Arc<ContactRegistry>,
        line: Arc<dyn CallLine>,
        amplitude: Option<Arc<dyn AmplitudeSource>>,
        config: SequenceConfig,
    ) -> Self {
        Self {
            registry,
            line,
            amplitude,
            config,
            active: None,
        }
    }

    /// Begin a run at `start_index` (normalized modulo the registry size).
    /// Returns the notice channel; it disconnects when the run ends.
    pub fn start(&mut self, start_index: usize) -> Result<Receiver<SequenceNotice>> {
        if self.is_active() {
            bail!("a dial sequence is already active");
        }
        self.reap_finished();

        let (events_tx, events_rx) = unbounded();
        let (notice_tx, notice_rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            registry: Arc::clone(&self.registry),
            line: Arc::clone(&self.line),
            amplitude: self.amplitude.clone(),
            config: self.config.clone(),
            events: events_rx,
            events_tx: events_tx.clone(),
            notices: notice_tx,
            cancel: Arc::clone(&cancel),
            done: Arc::clone(&done),
        };
        let handle = thread::spawn(move || worker.run(start_index));

        self.active = Some(ActiveRun {
            cancel,
            events: events_tx,
            done,
            handle: Some(handle),
        });
        Ok(notice_rx)
    }

    /// Stop the active run. The cancel flag is set before this returns, so
    /// no `Advanced`/`Succeeded` notice can be sent afterwards; the worker
    /// emits a final `Cancelled`. Returns whether a run was actually live.
    pub fn cancel(&self) -> bool {
        match &self.active {
            Some(run) if !run.done.load(Ordering::SeqCst) => {
                run.cancel.store(true, Ordering::SeqCst);
                let _ = run.events.send(WorkerEvent::Cancel);
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(&self.active, Some(run) if !run.done.load(Ordering::SeqCst))
    }

    /// Primary-button semantics: start at the centered contact when idle,
    /// cancel when a run is live. The selection is read exactly once.
    pub fn toggle(
        &mut self,
        selection: &dyn SelectionSource,
    ) -> Result<Option<Receiver<SequenceNotice>>> {
        if self.is_active() {
            self.cancel();
            Ok(None)
        } else {
            self.start(selection.centered_index()).map(Some)
        }
    }

    /// Block until the current run's worker exits. Demo/test plumbing.
    pub fn join(&mut self) {
        if let Some(run) = self.active.as_mut() {
            if let Some(handle) = run.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn reap_finished(&mut self) {
        if let Some(mut run) = self.active.take() {
            if let Some(handle) = run.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SequenceController {
    fn drop(&mut self) {
        // Stop a still-running worker; it observes the flag within one
        // ring/voice wait and exits on its own.
        self.cancel();
    }
}

struct Worker {
    registry: Arc<ContactRegistry>,
    line: Arc<dyn CallLine>,
    amplitude: Option<Arc<dyn AmplitudeSource>>,
    config: SequenceConfig,
    events: Receiver<WorkerEvent>,
    events_tx: Sender<WorkerEvent>,
    notices: Sender<SequenceNotice>,
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl Worker {
    fn run(self, start_index: usize) {
        let mut position = self.registry.normalize(start_index);
        let mut attempts: u32 = 0;
        let mut token: AttemptToken = 0;

        self.send(SequenceNotice::Started { index: position });
        log_debug(&format!("sequence|started|index={position}"));

        loop {
            if self.cancelled() {
                self.send(SequenceNotice::Cancelled);
                break;
            }
            attempts += 1;
            token += 1;

            let contact = self.registry.get(position);
            log_debug(&format!(
                "sequence|dialing|token={token}|index={position}|number={}",
                contact.phone_number
            ));

            let observer_id = {
                let tx = self.events_tx.clone();
                let attempt = token;
                self.line.observe(Box::new(move |state| {
                    let _ = tx.send(WorkerEvent::Line {
                        token: attempt,
                        state,
                    });
                }))
            };

            let outcome = match self.line.place(&contact.phone_number) {
                Ok(()) => self.drive_attempt(token),
                Err(PlacementError::PermissionDenied) => {
                    AttemptOutcome::Failed(PlacementError::PermissionDenied)
                }
                Err(PlacementError::Rejected(reason)) => {
                    // Same handling as a line that went idle right away.
                    log_debug(&format!("sequence|rejected|token={token}|reason={reason}"));
                    AttemptOutcome::Advance(AdvanceReason::NoAnswer)
                }
            };
            self.line.unobserve(observer_id);

            match outcome {
                AttemptOutcome::Cancelled => {
                    self.send(SequenceNotice::Cancelled);
                    break;
                }
                AttemptOutcome::Answered => {
                    if self.cancelled() {
                        self.send(SequenceNotice::Cancelled);
                    } else {
                        log_debug(&format!("sequence|succeeded|index={position}"));
                        self.send(SequenceNotice::Succeeded { index: position });
                    }
                    break;
                }
                AttemptOutcome::Failed(error) => {
                    if self.cancelled() {
                        self.send(SequenceNotice::Cancelled);
                    } else {
                        log_debug(&format!("sequence|failed|index={position}|error={error}"));
                        self.send(SequenceNotice::Failed {
                            index: position,
                            error,
                        });
                    }
                    break;
                }
                AttemptOutcome::Advance(reason) => {
                    if self.cancelled() {
                        self.send(SequenceNotice::Cancelled);
                        break;
                    }
                    if let Some(cap) = self.config.max_attempts {
                        if attempts >= cap {
                            log_debug(&format!("sequence|exhausted|attempts={attempts}"));
                            self.send(SequenceNotice::Exhausted { attempts });
                            break;
                        }
                    }
                    match self.advance_from(position) {
                        Some(next) => {
                            log_debug(&format!(
                                "sequence|advanced|from={position}|to={next}|reason={}",
                                reason.label()
                            ));
                            self.send(SequenceNotice::Advanced {
                                from: position,
                                to: next,
                                reason,
                            });
                            position = next;
                        }
                        None => {
                            // Every other slot is a marker; nothing is
                            // auto-dialable, so the run cannot continue.
                            log_debug("sequence|no_auto_dialable_contact");
                            self.send(SequenceNotice::Cancelled);
                            break;
                        }
                    }
                }
            }
        }

        // Set before the notice channel disconnects, so a caller that
        // drained it can start the next run immediately.
        self.done.store(true, Ordering::SeqCst);
    }

    /// Run one attempt's event loop until it concludes. The ring deadline is
    /// armed at placement and re-armed when the line reports `Ringing`; the
    /// voice-check window is owned by the sampler.
    fn drive_attempt(&self, token: AttemptToken) -> AttemptOutcome {
        let mut phase = Phase::Dialing;
        let mut deadline = Some(Instant::now() + self.config.ring_timeout);
        let mut sampler_run: Option<SamplerRun> = None;

        let outcome = loop {
            if self.cancelled() {
                break AttemptOutcome::Cancelled;
            }

            let event = match deadline {
                Some(at) => match self.events.recv_deadline(at) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break AttemptOutcome::Cancelled,
                },
                None => match self.events.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break AttemptOutcome::Cancelled,
                },
            };

            let Some(event) = event else {
                log_debug(&format!("sequence|ring_timeout|token={token}"));
                break AttemptOutcome::Advance(AdvanceReason::NoAnswer);
            };

            match event {
                WorkerEvent::Cancel => break AttemptOutcome::Cancelled,
                WorkerEvent::Line { token: seen, state } if seen == token => match state {
                    LineState::Ringing => {
                        if phase != Phase::VoiceCheck {
                            phase = Phase::RingingWait;
                            deadline = Some(Instant::now() + self.config.ring_timeout);
                        }
                    }
                    LineState::Offhook => {
                        if phase == Phase::VoiceCheck {
                            continue;
                        }
                        deadline = None;
                        match &self.amplitude {
                            Some(source) => {
                                phase = Phase::VoiceCheck;
                                sampler_run = Some(self.start_voice_check(token, source));
                            }
                            None => {
                                // No recording permission: treat the pickup
                                // as voicemail and keep walking the list.
                                log_debug(&format!(
                                    "sequence|voice_check_skipped|token={token}"
                                ));
                                break AttemptOutcome::Advance(AdvanceReason::VoicemailAssumed);
                            }
                        }
                    }
                    LineState::Idle => {
                        break AttemptOutcome::Advance(AdvanceReason::NoAnswer);
                    }
                },
                WorkerEvent::Verdict {
                    token: seen,
                    verdict,
                } if seen == token => match verdict {
                    SampleVerdict::Loud => break AttemptOutcome::Answered,
                    SampleVerdict::WindowExpired => {
                        break AttemptOutcome::Advance(AdvanceReason::VoicemailAssumed)
                    }
                },
                WorkerEvent::Line { token: seen, state } => {
                    log_debug(&format!(
                        "sequence|stale_line_event|token={seen}|current={token}|state={}",
                        state.label()
                    ));
                }
                WorkerEvent::Verdict { token: seen, verdict } => {
                    log_debug(&format!(
                        "sequence|stale_verdict|token={seen}|current={token}|verdict={}",
                        verdict.label()
                    ));
                }
            }
        };

        if let Some(mut run) = sampler_run.take() {
            run.stop();
        }
        outcome
    }

    fn start_voice_check(
        &self,
        token: AttemptToken,
        source: &Arc<dyn AmplitudeSource>,
    ) -> SamplerRun {
        let config = SamplerConfig {
            threshold: self.config.amplitude_threshold,
            poll_interval: self.config.poll_interval,
            window: self.config.voice_window,
        };
        let tx = self.events_tx.clone();
        sampler::start_sampler(Arc::clone(source), config, move |verdict| {
            let _ = tx.send(WorkerEvent::Verdict { token, verdict });
        })
    }

    /// Advance one slot, then keep skipping marker contacts: a marker may be
    /// dialed when the user selects it directly, never when the walk reaches
    /// it on its own. Returns `None` when a full lap finds only markers.
    fn advance_from(&self, position: usize) -> Option<usize> {
        let len = self.registry.len();
        let mut next = (position + 1) % len;
        let mut skipped = 0;
        while self.registry.get(next).marker {
            skipped += 1;
            if skipped >= len {
                return None;
            }
            next = (next + 1) % len;
        }
        Some(next)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn send(&self, notice: SequenceNotice) {
        let _ = self.notices.send(notice);
    }
}
