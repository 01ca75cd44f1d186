//! Scripted stand-ins for the telephony and microphone collaborators, so the
//! dispatcher can run on a desk with no radio and no recording permission.
//! Each phone number is mapped to a behavior; placing a call plays that
//! behavior back through the normal observer plumbing.

use crate::sampler::AmplitudeSource;
use crate::telephony::{
    CallLine, LineObserver, LineState, ObserverId, ObserverRegistry, PlacementError,
};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Amplitude reported for scripted voiced answers.
pub const DEFAULT_VOICE_AMPLITUDE: u32 = 8_000;

/// How a simulated call to one number plays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallBehavior {
    /// Rings until the dispatcher gives up.
    NoAnswer,
    /// Picked up, then silence (a voicemail greeting is below threshold).
    AnswerSilent,
    /// Picked up by a human who speaks.
    AnswerVoice { amplitude: u32 },
    /// The line goes idle immediately (busy or instant hangup).
    Ended,
    /// The platform refuses to place the call.
    Rejected,
    /// Calling permission is missing.
    PermissionDenied,
}

impl CallBehavior {
    /// Parse a CLI scenario entry.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "no-answer" => Ok(CallBehavior::NoAnswer),
            "silent" => Ok(CallBehavior::AnswerSilent),
            "voice" => Ok(CallBehavior::AnswerVoice {
                amplitude: DEFAULT_VOICE_AMPLITUDE,
            }),
            "ended" => Ok(CallBehavior::Ended),
            "rejected" => Ok(CallBehavior::Rejected),
            "denied" => Ok(CallBehavior::PermissionDenied),
            other => bail!(
                "unknown scenario behavior `{other}` \
                 (expected no-answer, silent, voice, ended, rejected, or denied)"
            ),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CallBehavior::NoAnswer => "no-answer",
            CallBehavior::AnswerSilent => "silent",
            CallBehavior::AnswerVoice { .. } => "voice",
            CallBehavior::Ended => "ended",
            CallBehavior::Rejected => "rejected",
            CallBehavior::PermissionDenied => "denied",
        }
    }
}

/// Shared amplitude level the scripted line raises when a voiced answer is
/// played back.
pub struct SimAmplitudeSource {
    level: AtomicU32,
}

impl SimAmplitudeSource {
    pub fn new() -> Self {
        Self {
            level: AtomicU32::new(0),
        }
    }

    pub fn set_level(&self, level: u32) {
        self.level.store(level, Ordering::SeqCst);
    }

    pub fn quiet(&self) {
        self.set_level(0);
    }
}

impl Default for SimAmplitudeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AmplitudeSource for SimAmplitudeSource {
    fn current_amplitude(&self) -> u32 {
        self.level.load(Ordering::SeqCst)
    }
}

/// Scripted `CallLine`. Placement is recorded, the number's behavior is
/// played back to every registered observer, and pickups can be delayed to
/// exercise ring timeouts and stale-event handling.
pub struct SimLine {
    observers: Arc<ObserverRegistry>,
    plan: Mutex<HashMap<String, CallBehavior>>,
    default_behavior: Mutex<CallBehavior>,
    answer_delay: Duration,
    amplitude: Arc<SimAmplitudeSource>,
    placed: Mutex<Vec<String>>,
}

impl SimLine {
    pub fn new(amplitude: Arc<SimAmplitudeSource>) -> Self {
        Self::with_answer_delay(amplitude, Duration::ZERO)
    }

    pub fn with_answer_delay(amplitude: Arc<SimAmplitudeSource>, answer_delay: Duration) -> Self {
        Self {
            observers: Arc::new(ObserverRegistry::new()),
            plan: Mutex::new(HashMap::new()),
            default_behavior: Mutex::new(CallBehavior::NoAnswer),
            answer_delay,
            amplitude,
            placed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, number: &str, behavior: CallBehavior) {
        self.plan
            .lock()
            .unwrap()
            .insert(number.to_string(), behavior);
    }

    pub fn set_default_behavior(&self, behavior: CallBehavior) {
        *self.default_behavior.lock().unwrap() = behavior;
    }

    /// Numbers dialed so far, in order.
    pub fn placed_numbers(&self) -> Vec<String> {
        self.placed.lock().unwrap().clone()
    }

    fn behavior_for(&self, number: &str) -> CallBehavior {
        self.plan
            .lock()
            .unwrap()
            .get(number)
            .copied()
            .unwrap_or(*self.default_behavior.lock().unwrap())
    }

    fn deliver_pickup(&self, voice_level: Option<u32>) {
        if self.answer_delay.is_zero() {
            if let Some(level) = voice_level {
                self.amplitude.set_level(level);
            }
            self.observers.broadcast(LineState::Offhook);
            return;
        }
        let observers = Arc::clone(&self.observers);
        let amplitude = Arc::clone(&self.amplitude);
        let delay = self.answer_delay;
        thread::spawn(move || {
            thread::sleep(delay);
            if let Some(level) = voice_level {
                amplitude.set_level(level);
            }
            observers.broadcast(LineState::Offhook);
        });
    }
}

impl CallLine for SimLine {
    fn place(&self, number: &str) -> Result<(), PlacementError> {
        self.placed.lock().unwrap().push(number.to_string());
        self.amplitude.quiet();

        match self.behavior_for(number) {
            CallBehavior::Rejected => {
                return Err(PlacementError::Rejected("simulated rejection".into()))
            }
            CallBehavior::PermissionDenied => return Err(PlacementError::PermissionDenied),
            CallBehavior::Ended => self.observers.broadcast(LineState::Idle),
            CallBehavior::NoAnswer => self.observers.broadcast(LineState::Ringing),
            CallBehavior::AnswerSilent => {
                self.observers.broadcast(LineState::Ringing);
                self.deliver_pickup(None);
            }
            CallBehavior::AnswerVoice { amplitude } => {
                self.observers.broadcast(LineState::Ringing);
                self.deliver_pickup(Some(amplitude));
            }
        }
        Ok(())
    }

    fn observe(&self, observer: LineObserver) -> ObserverId {
        self.observers.add(observer)
    }

    fn unobserve(&self, id: ObserverId) {
        self.observers.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn parse_accepts_every_documented_behavior() {
        assert_eq!(CallBehavior::parse("no-answer").unwrap(), CallBehavior::NoAnswer);
        assert_eq!(CallBehavior::parse("silent").unwrap(), CallBehavior::AnswerSilent);
        assert_eq!(
            CallBehavior::parse("voice").unwrap(),
            CallBehavior::AnswerVoice {
                amplitude: DEFAULT_VOICE_AMPLITUDE
            }
        );
        assert_eq!(CallBehavior::parse("ended").unwrap(), CallBehavior::Ended);
        assert_eq!(CallBehavior::parse("rejected").unwrap(), CallBehavior::Rejected);
        assert_eq!(CallBehavior::parse("denied").unwrap(), CallBehavior::PermissionDenied);
    }

    #[test]
    fn parse_rejects_unknown_behaviors() {
        let err = CallBehavior::parse("shouting").unwrap_err();
        assert!(err.to_string().contains("shouting"));
    }

    #[test]
    fn voiced_answer_raises_the_amplitude_before_pickup() {
        let amplitude = Arc::new(SimAmplitudeSource::new());
        let line = SimLine::new(Arc::clone(&amplitude));
        line.set_behavior("5550101", CallBehavior::AnswerVoice { amplitude: 4_000 });

        let (tx, rx) = mpsc::channel();
        let amplitude_in_observer = Arc::clone(&amplitude);
        let id = line.observe(Box::new(move |state| {
            let level = amplitude_in_observer.current_amplitude();
            let _ = tx.send((state, level));
        }));

        line.place("5550101").unwrap();
        assert_eq!(rx.recv().unwrap(), (LineState::Ringing, 0));
        assert_eq!(rx.recv().unwrap(), (LineState::Offhook, 4_000));
        line.unobserve(id);
    }

    #[test]
    fn placement_resets_the_amplitude() {
        let amplitude = Arc::new(SimAmplitudeSource::new());
        amplitude.set_level(9_999);
        let line = SimLine::new(Arc::clone(&amplitude));
        line.place("5550101").unwrap();
        assert_eq!(amplitude.current_amplitude(), 0);
    }

    #[test]
    fn rejected_and_denied_surface_placement_errors() {
        let amplitude = Arc::new(SimAmplitudeSource::new());
        let line = SimLine::new(amplitude);
        line.set_behavior("1", CallBehavior::Rejected);
        line.set_behavior("2", CallBehavior::PermissionDenied);

        assert!(matches!(
            line.place("1"),
            Err(PlacementError::Rejected(_))
        ));
        assert_eq!(line.place("2"), Err(PlacementError::PermissionDenied));
        assert_eq!(line.placed_numbers(), vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn delayed_pickup_arrives_after_the_ring() {
        let amplitude = Arc::new(SimAmplitudeSource::new());
        let line = SimLine::with_answer_delay(Arc::clone(&amplitude), Duration::from_millis(10));
        line.set_behavior("5550101", CallBehavior::AnswerSilent);

        let (tx, rx) = mpsc::channel();
        line.observe(Box::new(move |state| {
            let _ = tx.send(state);
        }));

        line.place("5550101").unwrap();
        assert_eq!(rx.recv().unwrap(), LineState::Ringing);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            LineState::Offhook
        );
    }
}
