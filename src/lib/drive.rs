//! Model of one Diablo 31 spindle.
//!
//! A unit tracks its mechanical position (cylinder, head, sector), the seek
//! state machine driven by strobe pulses from the controller, and the
//! rotation timing used to derive the live sector number. Bit-serial access
//! to the raw sector under the head is indexed by the controller's bit
//! counter.

use log::{debug, info, trace};

use crate::sector::{RawSector, CYLINDERS, HEADS, SECTORS_PER_TRACK};

/// Number of drive units in a pair.
pub const NUM_UNITS: usize = 2;

/// Highest valid cylinder number.
pub const MAX_CYLINDER: u16 = (CYLINDERS - 1) as u16;

/// One full revolution of the pack (1500rpm).
pub const ROTATION_NS: u64 = 40_000_000;

/// Time for one sector to pass under the head.
pub const SECTOR_TIME_NS: u64 = ROTATION_NS / SECTORS_PER_TRACK as u64;

/// The seek state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekState {
    /// No seek in progress.
    Idle,
    /// A strobe pulse is moving the heads one cylinder.
    Stepping,
    /// A new strobe arrived while the previous step was still settling.
    Interlocked,
    /// The addressed cylinder has been reached.
    Acknowledged,
    /// Travelling towards an unreachable cylinder.
    Incomplete,
}

/// Which edge of the strobe pulse is being presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrobeEdge {
    Falling,
    Rising,
}

/// Result of presenting one strobe edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The seek has not finished; keep pulsing.
    Moving,
    /// The addressed cylinder was reached and acknowledged.
    Acknowledged,
    /// The seek terminated at a boundary without acknowledge.
    Failed,
}

/// One physical drive unit.
#[derive(Debug)]
pub struct DriveUnit {
    unit_id: usize,
    cylinder: u16,
    head: usize,
    sector: usize,
    seek_state: SeekState,
    // Persistent seek-incomplete error; cleared by the next acknowledged
    // seek.
    seek_failed: bool,
    selected: bool,
    sector_mark: bool,
    rotation_anchor_ns: u64,
    media: Option<Vec<RawSector>>,
}

impl DriveUnit {
    /// Create a unit with no pack mounted.
    pub fn new(unit_id: usize) -> Self {
        assert!(unit_id < NUM_UNITS, "drive unit {unit_id} out of range");
        DriveUnit {
            unit_id,
            cylinder: 0,
            head: 0,
            sector: 0,
            seek_state: SeekState::Idle,
            seek_failed: false,
            selected: false,
            sector_mark: false,
            rotation_anchor_ns: 0,
            media: None,
        }
    }

    pub fn unit_id(&self) -> usize {
        self.unit_id
    }

    pub fn cylinder(&self) -> u16 {
        self.cylinder
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn seek_state(&self) -> SeekState {
        self.seek_state
    }

    /// Transient incomplete signal: asserted while travelling towards an
    /// unreachable cylinder, deasserted once clamped at the boundary.
    pub fn seek_incomplete(&self) -> bool {
        self.seek_state == SeekState::Incomplete
    }

    /// Persistent seek-fail status bit.
    pub fn seek_failed(&self) -> bool {
        self.seek_failed
    }

    pub fn acknowledged(&self) -> bool {
        self.seek_state == SeekState::Acknowledged
    }

    /// Attach a pack. Replaces any previous media.
    pub fn attach_media(&mut self, media: Vec<RawSector>) {
        info!("Drive {}: pack mounted ({} sectors).", self.unit_id, media.len());
        self.media = Some(media);
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Read access to the mounted pack, e.g. for writing an image back out.
    pub fn media(&self) -> Option<&[RawSector]> {
        self.media.as_deref()
    }

    /// Make this the addressed unit and switch the active head.
    ///
    /// Only one unit of a pair may be addressed at a time; the controller
    /// deselects the sibling.
    pub fn select(&mut self, head: usize) {
        assert!(head < HEADS, "head {head} out of range");
        trace!("Drive {}: selected, head {}.", self.unit_id, head);
        self.selected = true;
        self.head = head;
    }

    pub fn deselect(&mut self) {
        self.selected = false;
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// A drive is ready only when addressed and loaded with a pack.
    pub fn ready(&self) -> bool {
        self.selected && self.media.is_some()
    }

    /// Present one edge of a seek strobe pulse.
    ///
    /// Seeking moves exactly one cylinder per pulse. A pulse arriving with
    /// the heads already at the addressed cylinder acknowledges. A target
    /// beyond the last cylinder steps to the boundary, asserting the
    /// incomplete signal en route, then clamps and completes without ever
    /// acknowledging.
    pub fn strobe(&mut self, target_cylinder: u16, restore: bool, edge: StrobeEdge) -> SeekOutcome {
        let target = if restore { 0 } else { target_cylinder };
        let reachable = target <= MAX_CYLINDER;
        let destination = target.min(MAX_CYLINDER);

        match edge {
            StrobeEdge::Falling => {
                if self.seek_state == SeekState::Stepping {
                    // Previous step still settling.
                    debug!("Drive {}: address interlock.", self.unit_id);
                    self.seek_state = SeekState::Interlocked;
                    return SeekOutcome::Moving;
                }
                if self.cylinder == destination {
                    return self.finish_seek(reachable);
                }
                if self.cylinder < destination {
                    self.cylinder += 1;
                } else {
                    self.cylinder -= 1;
                }
                trace!(
                    "Drive {}: stepped to cylinder {} (target {}).",
                    self.unit_id,
                    self.cylinder,
                    target
                );
                self.seek_state = if reachable {
                    SeekState::Stepping
                } else {
                    SeekState::Incomplete
                };
                SeekOutcome::Moving
            }
            StrobeEdge::Rising => match self.seek_state {
                SeekState::Stepping | SeekState::Interlocked => {
                    if self.cylinder == destination {
                        self.finish_seek(reachable)
                    } else {
                        // Step settled; wait for the next pulse.
                        self.seek_state = SeekState::Idle;
                        SeekOutcome::Moving
                    }
                }
                SeekState::Incomplete => {
                    if self.cylinder == destination {
                        self.finish_seek(reachable)
                    } else {
                        SeekOutcome::Moving
                    }
                }
                _ => SeekOutcome::Moving,
            },
        }
    }

    fn finish_seek(&mut self, reachable: bool) -> SeekOutcome {
        if reachable {
            info!(
                "Drive {}: seek acknowledged at cylinder {}.",
                self.unit_id, self.cylinder
            );
            self.seek_state = SeekState::Acknowledged;
            self.seek_failed = false;
            SeekOutcome::Acknowledged
        } else {
            // Clamped at the boundary: the incomplete signal drops but
            // acknowledge is never given.
            info!(
                "Drive {}: seek clamped at cylinder {} without acknowledge.",
                self.unit_id, self.cylinder
            );
            self.seek_state = SeekState::Idle;
            self.seek_failed = true;
            SeekOutcome::Failed
        }
    }

    /// Record the passing of a sector boundary at virtual time `now`.
    pub fn advance_sector(&mut self, now: u64) {
        self.sector = (self.sector + 1) % SECTORS_PER_TRACK;
        self.rotation_anchor_ns = now;
        self.sector_mark = true;
        trace!("Drive {}: sector mark, sector {}.", self.unit_id, self.sector);
    }

    /// Read and clear the sector-mark flag.
    pub fn take_sector_mark(&mut self) -> bool {
        let mark = self.sector_mark;
        self.sector_mark = false;
        mark
    }

    /// The sector currently under the head, derived from elapsed rotation
    /// time since the last recorded sector mark.
    pub fn current_sector(&self, now: u64) -> usize {
        let elapsed = now.saturating_sub(self.rotation_anchor_ns);
        (self.sector + (elapsed / SECTOR_TIME_NS) as usize) % SECTORS_PER_TRACK
    }

    /// Linear index of the sector under the head.
    fn media_index(&self) -> usize {
        (self.cylinder as usize * HEADS + self.head) * SECTORS_PER_TRACK + self.sector
    }

    /// Read one bit of the sector under the head. An empty drive has no
    /// flux transitions.
    pub fn read_bit(&self, index: usize) -> bool {
        match &self.media {
            Some(media) => media[self.media_index()].bit(index),
            None => false,
        }
    }

    /// Write one bit of the sector under the head. Dropped when no pack is
    /// mounted.
    pub fn write_bit(&mut self, index: usize, bit: bool) {
        let media_index = self.media_index();
        if let Some(media) = &mut self.media {
            media[media_index].set_bit(index, bit);
        }
    }
}
