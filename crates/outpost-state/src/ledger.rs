//! Deduplicated artifact detections and their reporting state.

use std::collections::BTreeMap;

use crate::wire::{Detection, Position};
use crate::Timestamp;

/// Identity key of a detection: its position components rendered verbatim
/// and concatenated.
///
/// Floats use shortest round-trip formatting that always keeps a decimal
/// point, so `(1.0, 2.0, 3.0)` keys as `"1.02.03.0"`. Very large or small
/// magnitudes switch to exponent form without a sign, e.g. `1e20` and `1e-7`.
/// Keys are only compared between nodes built from this crate. Only exact
/// matches collapse; there is no spatial tolerance.
pub fn detection_key(position: &Position) -> String {
    format!("{:?}{:?}{:?}", position.x, position.y, position.z)
}

/// One deduplicated detection.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub id: String,
    pub payload: Detection,
    pub reported: bool,
    pub first_seen: Timestamp,
}

/// Every detection ever seen by this node, keyed by [`detection_key`].
///
/// Records are never removed; the only mutation is flipping `reported`.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLedger {
    records: BTreeMap<String, DetectionRecord>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting. Returns the key if this is the first sighting.
    pub fn observe(&mut self, detection: &Detection, now: Timestamp) -> Option<String> {
        let key = detection_key(&detection.position);
        if self.records.contains_key(&key) {
            return None;
        }
        self.records.insert(
            key.clone(),
            DetectionRecord {
                id: key.clone(),
                payload: detection.clone(),
                reported: false,
                first_seen: now,
            },
        );
        Some(key)
    }

    /// Flag a detection as reported. Returns false for unknown keys.
    pub fn mark_reported(&mut self, key: &str) -> bool {
        match self.records.get_mut(key) {
            Some(record) => {
                record.reported = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&DetectionRecord> {
        self.records.get(key)
    }

    /// Detections not yet reported, oldest first.
    pub fn unreported(&self) -> Vec<&DetectionRecord> {
        let mut pending: Vec<_> = self.records.values().filter(|r| !r.reported).collect();
        pending.sort_by_key(|r| r.first_seen);
        pending
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
