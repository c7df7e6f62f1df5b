//! Append-only trace of what a single hedge execution actually did, backing
//! event-ordering tests ("no leg-B before leg-A fills").
//!
//! Ordering is recorded as a monotonic sequence number rather than a wall
//! clock reading: two events recorded back-to-back on a paused test runtime
//! can land on the same millisecond, which would make a timestamp-based
//! ordering assertion flaky. `seq` has no such resolution problem.

use crate::venue::VenueTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PlaceLegA,
    FillLegA,
    PlaceLegB,
    FillLegB,
    RollbackLegA,
    RollbackFilled,
    RollbackFailed,
    SliceSucceeded,
    SliceFailed,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionEvent {
    pub seq: u64,
    pub kind: EventKind,
    pub slice_index: u32,
    pub venue: Option<VenueTag>,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Owned by the caller of the orchestrator for the lifetime of one execution;
/// the slice executor borrows it mutably per slice.
#[derive(Debug, Default)]
pub struct EventTrace {
    events: Vec<ExecutionEvent>,
    next_seq: u64,
}

impl EventTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: EventKind, slice_index: u32, venue: Option<VenueTag>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(ExecutionEvent {
            seq,
            kind,
            slice_index,
            venue,
            at: chrono::Utc::now(),
        });
        seq
    }

    pub fn events(&self) -> &[ExecutionEvent] {
        &self.events
    }

    /// Sequence number of the first event of `kind` within `slice_index`, if any.
    pub fn first_seq(&self, slice_index: u32, kind: EventKind) -> Option<u64> {
        self.events
            .iter()
            .find(|e| e.slice_index == slice_index && e.kind == kind)
            .map(|e| e.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic_across_slices() {
        let mut trace = EventTrace::new();
        let a = trace.record(EventKind::PlaceLegA, 0, Some(VenueTag::Flaky));
        let b = trace.record(EventKind::FillLegA, 0, Some(VenueTag::Flaky));
        let c = trace.record(EventKind::PlaceLegB, 0, Some(VenueTag::Reliable));
        assert!(a < b);
        assert!(b < c);
        assert_eq!(trace.events().len(), 3);
    }

    #[test]
    fn first_seq_finds_the_right_slice() {
        let mut trace = EventTrace::new();
        trace.record(EventKind::PlaceLegA, 0, None);
        trace.record(EventKind::PlaceLegA, 1, None);
        assert!(trace.first_seq(1, EventKind::PlaceLegA).unwrap() > trace.first_seq(0, EventKind::PlaceLegA).unwrap());
    }
}
