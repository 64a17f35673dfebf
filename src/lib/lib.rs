mod controller;
mod drive;
mod flipflop;
mod network;
mod registers;
mod scheduler;
mod sector;
mod timer;

pub use crate::controller::{DiskController, DiskError, BIT_TIME_NS, TASK_SECTOR, TASK_WORD};
pub use crate::drive::{
    DriveUnit, SeekOutcome, SeekState, StrobeEdge, MAX_CYLINDER, NUM_UNITS, ROTATION_NS,
    SECTOR_TIME_NS,
};
pub use crate::flipflop::{FfInputs, FlipFlop};
pub use crate::registers::{
    ClockSource, CommandRegister, DiskAddress, RecordCursor, RecordDescriptor, RwMode,
};
pub use crate::scheduler::TaskScheduler;
pub use crate::sector::{
    FieldKind, LogicalSector, RawSector, SectorCodec, BITS_PER_SECTOR, CYLINDERS, HEADS,
    LOGICAL_SECTOR_BYTES, SECTORS_PER_TRACK, TOTAL_SECTORS,
};
pub use crate::timer::{DiskEvent, MonostableKind, Timer, TimerHandle};

#[cfg(test)]
pub use crate::scheduler::MockScheduler;

/// Initialise logging for tests.
#[cfg(test)]
pub fn init_test_logging() {
    // The logger can only be initialised once, but we don't know the order of
    // tests. Therefore we ignore the result.
    let _ = simplelog::TestLogger::init(
        log::LevelFilter::Trace,
        simplelog::Config::default(),
    );
}
