//! Virtual-time event queue.
//!
//! The whole machine runs on a single-threaded virtual clock measured in
//! nanoseconds. Components schedule named events with a delay; the owner of
//! the simulation loop drains them in timestamp order and dispatches each to
//! the disk controller. The controller is purely a client: it inserts and
//! removes entries but never owns the loop.

use log::trace;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Identifies a scheduled event so it can be cancelled.
pub type TimerHandle = u64;

/// The monostable ("one-shot") pulse kinds the controller uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonostableKind {
    /// Settling pulse started by a clear-status command; gates the write
    /// circuitry until it expires.
    Ready,
    /// Fires if the sector task has not cleared status soon enough after a
    /// sector mark; also releases the bit counter.
    SectorLate,
}

/// Every kind of timed callback the disk subsystem schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskEvent {
    /// One strobe pulse of a repeating seek train.
    SeekPulse {
        unit: usize,
        cylinder: u16,
        restore: bool,
    },
    /// Expiry of a one-shot.
    Monostable(MonostableKind),
    /// One bit-time of the serial stream.
    BitSample,
    /// The selected drive reached a sector boundary.
    SectorStart,
}

#[derive(Debug)]
struct Entry {
    due: u64,
    handle: TimerHandle,
    label: &'static str,
    event: DiskEvent,
}

// BinaryHeap is a max-heap; order entries so that the earliest due time
// (then lowest handle) is the maximum.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.handle.cmp(&self.handle))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Entry {}

/// The time-ordered queue of scheduled events plus the virtual clock.
#[derive(Debug, Default)]
pub struct Timer {
    now: u64,
    next_handle: TimerHandle,
    queue: BinaryHeap<Entry>,
}

impl Timer {
    pub fn new() -> Self {
        Timer::default()
    }

    /// The current virtual time in nanoseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule `event` to fire `delay_ns` from now. Returns a handle for
    /// cancellation.
    pub fn insert(&mut self, delay_ns: u64, event: DiskEvent, label: &'static str) -> TimerHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        let due = self.now + delay_ns;
        trace!("timer: insert {} at {}ns (handle {})", label, due, handle);
        self.queue.push(Entry {
            due,
            handle,
            label,
            event,
        });
        handle
    }

    /// Cancel a scheduled event. Cancelling an already-fired handle is a
    /// no-op.
    pub fn remove(&mut self, handle: TimerHandle) {
        let before = self.queue.len();
        self.queue = self
            .queue
            .drain()
            .filter(|entry| entry.handle != handle)
            .collect();
        if self.queue.len() != before {
            trace!("timer: removed handle {}", handle);
        }
    }

    /// The due time of the earliest pending event, if any.
    pub fn next_due(&self) -> Option<u64> {
        self.queue.peek().map(|entry| entry.due)
    }

    /// Number of pending events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pop the earliest pending event, advancing the clock to its due time.
    pub fn fire_due(&mut self) -> Option<DiskEvent> {
        let entry = self.queue.pop()?;
        debug_assert!(entry.due >= self.now);
        self.now = entry.due;
        trace!("timer: fire {} at {}ns", entry.label, entry.due);
        Some(entry.event)
    }
}
