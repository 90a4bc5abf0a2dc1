//! Sequence numbering
//!
//! The producer numbers packets per kind; viewers use the numbers to spot
//! drops and stale arrivals. There is no retransmission.

use std::sync::atomic::{AtomicU32, Ordering};

use super::packet::PacketKind;

/// Per-kind sequence counters owned by one broadcast server
///
/// The first number handed out for each kind is 1. Counters wrap at `u32::MAX`.
#[derive(Debug, Default)]
pub struct SequenceCounters {
    counters: [AtomicU32; 3],
}

impl SequenceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number for `kind`
    pub fn next(&self, kind: PacketKind) -> u32 {
        self.counters[kind.index()]
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    /// Last number assigned for `kind` (0 if none yet)
    pub fn last(&self, kind: PacketKind) -> u32 {
        self.counters[kind.index()].load(Ordering::Relaxed)
    }
}

/// Result of observing a sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// First packet of this kind
    First,
    /// Exactly one after the previous packet
    InOrder,
    /// Packets were skipped
    Gap { missing: u32 },
    /// Duplicate or older than the last packet seen
    Stale,
}

/// Viewer-side tracker of the last sequence number per kind
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: [Option<u32>; 3],
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `sequence` against the last one seen for `kind`.
    ///
    /// Stale numbers do not move the tracker.
    pub fn observe(&mut self, kind: PacketKind, sequence: u32) -> SequenceCheck {
        let slot = &mut self.last[kind.index()];

        let check = match *slot {
            None => SequenceCheck::First,
            Some(last) => {
                let distance = sequence.wrapping_sub(last);
                if distance == 1 {
                    SequenceCheck::InOrder
                } else if distance == 0 || distance > u32::MAX / 2 {
                    SequenceCheck::Stale
                } else {
                    SequenceCheck::Gap {
                        missing: distance - 1,
                    }
                }
            }
        };

        if check != SequenceCheck::Stale {
            *slot = Some(sequence);
        }

        check
    }

    /// Forget all history (used on reconnect)
    pub fn reset(&mut self) {
        self.last = [None; 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_kind() {
        let counters = SequenceCounters::new();

        assert_eq!(counters.next(PacketKind::Video), 1);
        assert_eq!(counters.next(PacketKind::Video), 2);
        assert_eq!(counters.next(PacketKind::Audio), 1);
        assert_eq!(counters.last(PacketKind::Video), 2);
        assert_eq!(counters.last(PacketKind::Control), 0);
    }

    #[test]
    fn test_tracker_in_order_and_gap() {
        let mut tracker = SequenceTracker::new();

        assert_eq!(tracker.observe(PacketKind::Video, 1), SequenceCheck::First);
        assert_eq!(tracker.observe(PacketKind::Video, 2), SequenceCheck::InOrder);
        assert_eq!(
            tracker.observe(PacketKind::Video, 5),
            SequenceCheck::Gap { missing: 2 }
        );
        assert_eq!(tracker.observe(PacketKind::Video, 6), SequenceCheck::InOrder);
    }

    #[test]
    fn test_tracker_stale_does_not_move() {
        let mut tracker = SequenceTracker::new();

        tracker.observe(PacketKind::Audio, 10);
        assert_eq!(tracker.observe(PacketKind::Audio, 10), SequenceCheck::Stale);
        assert_eq!(tracker.observe(PacketKind::Audio, 4), SequenceCheck::Stale);
        assert_eq!(tracker.observe(PacketKind::Audio, 11), SequenceCheck::InOrder);
    }

    #[test]
    fn test_tracker_kinds_are_independent() {
        let mut tracker = SequenceTracker::new();

        tracker.observe(PacketKind::Video, 100);
        assert_eq!(tracker.observe(PacketKind::Audio, 1), SequenceCheck::First);
    }

    #[test]
    fn test_tracker_wraps() {
        let mut tracker = SequenceTracker::new();

        tracker.observe(PacketKind::Video, u32::MAX);
        assert_eq!(tracker.observe(PacketKind::Video, 0), SequenceCheck::InOrder);
    }
}
