//! Thin seam over the platform telephony collaborator: place a call, watch
//! the line change state. Implementations report `LineState` transitions to
//! every registered observer; the dispatcher registers one observer per dial
//! attempt and unregisters it the moment the attempt stops mattering.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Line states reported by the telephony layer for the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Ringing,
    Offhook,
    Idle,
}

impl LineState {
    pub fn label(self) -> &'static str {
        match self {
            LineState::Ringing => "ringing",
            LineState::Offhook => "offhook",
            LineState::Idle => "idle",
        }
    }
}

/// Errors surfaced synchronously when a call cannot be placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// Calling permission is missing; the sequence cannot proceed.
    PermissionDenied,
    /// The platform refused to initiate the call; treated like an
    /// immediately ended line.
    Rejected(String),
}

impl fmt::Display for PlacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementError::PermissionDenied => write!(f, "calling permission denied"),
            PlacementError::Rejected(reason) => write!(f, "call rejected by platform: {reason}"),
        }
    }
}

impl std::error::Error for PlacementError {}

pub type ObserverId = u64;
pub type LineObserver = Box<dyn Fn(LineState) + Send + Sync>;

/// Contract over "place a call and watch what the line does".
pub trait CallLine: Send + Sync {
    /// Ask the platform to dial `number`. Returns as soon as the request is
    /// handed off; progress arrives through registered observers.
    fn place(&self, number: &str) -> Result<(), PlacementError>;

    /// Register an observer for line state transitions.
    fn observe(&self, observer: LineObserver) -> ObserverId;

    /// Remove a previously registered observer. Unknown ids are a no-op.
    fn unobserve(&self, id: ObserverId);
}

/// Observer bookkeeping shared by `CallLine` implementations. Observers are
/// invoked under the registry lock, so they must not call back into the
/// registry; the dispatcher's observer only forwards into a channel.
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<HashMap<ObserverId, LineObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            observers: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, observer: LineObserver) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut observers = self.observers.lock().unwrap();
        observers.insert(id, observer);
        id
    }

    pub fn remove(&self, id: ObserverId) {
        let mut observers = self.observers.lock().unwrap();
        observers.remove(&id);
    }

    pub fn broadcast(&self, state: LineState) {
        let observers = self.observers.lock().unwrap();
        for observer in observers.values() {
            observer(state);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
