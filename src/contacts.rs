//! Contact registry plus the selection sources that pick where a dial
//! sequence begins.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One entry in the emergency contact list. `marker` flags the synthetic
/// generic-emergency slot that auto-advance must never dial on its own.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub marker: bool,
}

impl Contact {
    pub fn new(name: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone_number: phone_number.into(),
            marker: false,
        }
    }

    pub fn marker(name: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone_number: phone_number.into(),
            marker: true,
        }
    }
}

/// Immutable ordered contact list for one session. The index space is
/// modular: any raw position is reduced with `normalize` before use.
#[derive(Debug)]
pub struct ContactRegistry {
    contacts: Vec<Contact>,
}

impl ContactRegistry {
    pub fn new(contacts: Vec<Contact>) -> Result<Self> {
        if contacts.is_empty() {
            bail!("contact registry must hold at least one contact");
        }
        Ok(Self { contacts })
    }

    /// Load a registry from a JSON array of contacts.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read contact list {}", path.display()))?;
        let contacts: Vec<Contact> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse contact list {}", path.display()))?;
        Self::new(contacts)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Reduce a raw position into the registry's index space.
    pub fn normalize(&self, raw: usize) -> usize {
        raw % self.contacts.len()
    }

    pub fn get(&self, position: usize) -> &Contact {
        &self.contacts[self.normalize(position)]
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }
}

/// Supplies the registry index currently centered on screen. Read exactly
/// once when a sequence starts; never re-polled mid-sequence.
pub trait SelectionSource {
    fn centered_index(&self) -> usize;
}

/// Selection pinned to a single index, used by the CLI.
pub struct FixedSelection(pub usize);

impl SelectionSource for FixedSelection {
    fn centered_index(&self) -> usize {
        self.0
    }
}

/// Adapter over a scrolling carousel. The raw center position grows without
/// bound so the list can scroll forever; it is reduced modulo the registry
/// size on read.
pub struct CarouselSelection {
    raw_center: AtomicUsize,
    registry_len: usize,
}

impl CarouselSelection {
    pub fn new(registry_len: usize) -> Self {
        // Start mid-range so the carousel can scroll both ways indefinitely.
        Self {
            raw_center: AtomicUsize::new(usize::MAX / 2),
            registry_len,
        }
    }

    pub fn scroll_to(&self, raw_position: usize) {
        self.raw_center.store(raw_position, Ordering::SeqCst);
    }
}

impl SelectionSource for CarouselSelection {
    fn centered_index(&self) -> usize {
        self.raw_center.load(Ordering::SeqCst) % self.registry_len
    }
}
