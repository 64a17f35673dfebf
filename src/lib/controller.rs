#[cfg(test)] // Unit tests moved to separate file due to length.
mod tests;

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::drive::{DriveUnit, SeekOutcome, StrobeEdge, NUM_UNITS, SECTOR_TIME_NS};
use crate::network::{FlipFlopNetwork, NetworkInputs};
use crate::registers::{
    ClockSource, CommandRegister, DiskAddress, RecordCursor, RecordDescriptor, RegisterFile,
    RwMode, StatusInputs,
};
use crate::scheduler::TaskScheduler;
use crate::sector::{
    FieldKind, LogicalSector, SectorCodec, BITS_PER_SECTOR, LOGICAL_SECTOR_BYTES, TOTAL_SECTORS,
};
use crate::timer::{DiskEvent, MonostableKind, Timer, TimerHandle};

/// Microcode task number of the sector task.
pub const TASK_SECTOR: usize = 4;
/// Microcode task number of the word task.
pub const TASK_WORD: usize = 14;

/// One bit cell of the serial stream.
pub const BIT_TIME_NS: u64 = 600;
/// Interval between the strobe pulses of a seek train.
const SEEK_PULSE_INTERVAL_NS: u64 = 885_000;
/// Window after a sector mark within which the sector task must clear
/// status; the one-shot fires when it expires.
const SECTOR_LATE_NS: u64 = 86_000;
/// Settling time of the ready one-shot started by clear-status.
const READY_PULSE_NS: u64 = 35_000;

/// Errors surfaced at the host API boundary. Everything the emulated
/// machine can observe is a status bit instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiskError {
    #[error("disk image is {actual} bytes, expected {expected}")]
    BadImageSize { expected: usize, actual: usize },
    #[error("drive unit {0} out of range")]
    BadUnit(usize),
}

/// Per-sector bit timing state.
#[derive(Debug, Default)]
struct BitTimingState {
    /// Serial bit index within the current sector.
    index: usize,
    /// The four-bit word counter.
    counter: u8,
    carry: bool,
    prev_carry: bool,
    /// Whether the counter is counting; armed either by the command
    /// register or by a sync bit arriving through the read chain.
    armed: bool,
    shift_in: u16,
    shift_out: u16,
    /// A bit chain is in flight for this sector.
    running: bool,
}

/// At most one outstanding timer entry per pulse kind.
#[derive(Debug, Default)]
struct Pending {
    seek: Option<TimerHandle>,
    ready: Option<TimerHandle>,
    sector_late: Option<TimerHandle>,
    bit: Option<TimerHandle>,
    sector: Option<TimerHandle>,
}

/// Gate outputs to the head circuitry of the selected drive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Gates {
    read: bool,
    write: bool,
    erase: bool,
}

/// The disk controller: registers, latch network, bit timing, and the
/// drive pair.
#[derive(Debug)]
pub struct DiskController {
    regs: RegisterFile,
    net: FlipFlopNetwork,
    bit: BitTimingState,
    codec: SectorCodec,
    drives: [DriveUnit; NUM_UNITS],
    selected: usize,
    pending: Pending,
    gates: Gates,
    // True once the sector-late one-shot has expired (or clear-status
    // served the window); until then the bit counter is held clear.
    sector_late: bool,
    // Data-late status bit: the one-shot expired without a clear-status.
    data_late: bool,
    seek_busy: bool,
    // Wake request latches, set by hardware events and dropped when the
    // task blocks.
    word_request: bool,
    sector_request: bool,
    // Block signals from the scheduler, sampled once per tick.
    word_blocked: bool,
    sector_blocked: bool,
    // Word task is in its initialization window: set when it blocks,
    // cleared when its enable chain next activates.
    word_init: bool,
    // Pulse into the sequence-error latch, consumed by the next tick.
    sequence_error_pulse: bool,
    // Last wakeup levels given to the scheduler.
    word_awake: bool,
    sector_awake: bool,
    // Last raw field touched by the bit chain, for transition logging.
    last_field: Option<FieldKind>,
    words_latched: u64,
}

impl Default for DiskController {
    fn default() -> Self {
        DiskController::new()
    }
}

impl DiskController {
    /// Create a controller with two empty drives, unit 0 selected.
    pub fn new() -> Self {
        let mut drives = [DriveUnit::new(0), DriveUnit::new(1)];
        drives[0].select(0);
        DiskController {
            regs: RegisterFile::new(),
            net: FlipFlopNetwork::new(),
            bit: BitTimingState::default(),
            codec: SectorCodec::default(),
            drives,
            selected: 0,
            pending: Pending::default(),
            gates: Gates::default(),
            sector_late: false,
            data_late: false,
            seek_busy: false,
            word_request: false,
            sector_request: false,
            word_blocked: false,
            sector_blocked: false,
            word_init: false,
            sequence_error_pulse: false,
            word_awake: false,
            sector_awake: false,
            last_field: None,
            words_latched: 0,
        }
    }

    /// Mount a disk image on a unit. The buffer must be the exact image
    /// size; anything else is rejected before any state changes.
    pub fn mount(&mut self, unit: usize, image: &[u8]) -> Result<(), DiskError> {
        if unit >= NUM_UNITS {
            return Err(DiskError::BadUnit(unit));
        }
        let expected = TOTAL_SECTORS * LOGICAL_SECTOR_BYTES;
        if image.len() != expected {
            return Err(DiskError::BadImageSize {
                expected,
                actual: image.len(),
            });
        }
        let media = image
            .chunks_exact(LOGICAL_SECTOR_BYTES)
            .map(|chunk| self.codec.cook(&LogicalSector::from_bytes(chunk)))
            .collect();
        self.drives[unit].attach_media(media);
        Ok(())
    }

    /// Begin rotation: schedule the first sector mark.
    pub fn start(&mut self, timer: &mut Timer) {
        info!("Disk controller starting.");
        if let Some(handle) = self.pending.sector.take() {
            timer.remove(handle);
        }
        self.pending.sector = Some(timer.insert(
            SECTOR_TIME_NS,
            DiskEvent::SectorStart,
            "sector mark",
        ));
    }

    /// Handle one timer event.
    pub fn dispatch(
        &mut self,
        event: DiskEvent,
        timer: &mut Timer,
        sched: &mut dyn TaskScheduler,
    ) {
        match event {
            DiskEvent::SeekPulse {
                unit,
                cylinder,
                restore,
            } => self.on_seek_pulse(unit, cylinder, restore, timer),
            DiskEvent::Monostable(MonostableKind::Ready) => {
                trace!("Ready one-shot expired.");
                self.pending.ready = None;
            }
            DiskEvent::Monostable(MonostableKind::SectorLate) => {
                debug!("Sector-late one-shot expired without clear-status.");
                self.pending.sector_late = None;
                self.sector_late = true;
                self.data_late = true;
            }
            DiskEvent::BitSample => self.on_bit_sample(timer, sched),
            DiskEvent::SectorStart => self.on_sector_start(timer),
        }
    }

    // ----- microcode-visible register operations -----

    /// Compose the status word from the live latch and rotation state.
    pub fn read_status(&self, timer: &Timer) -> u16 {
        let drive = &self.drives[self.selected];
        let status = self.regs.read_status(StatusInputs {
            sector: drive.current_sector(timer.now()),
            seek_fail: drive.seek_failed(),
            seek_busy: self.seek_busy,
            not_ready: !self.net.ready(),
            data_late: self.data_late,
        });
        trace!("Read status: {:#06x}.", status);
        status
    }

    /// The most recently latched input word.
    pub fn read_data_in(&self) -> u16 {
        self.regs.data_in
    }

    /// Load the writable status bits from the bus.
    pub fn load_status(&mut self, bus: u16) {
        self.regs.load_status(bus);
    }

    /// Capture the bus into data-out and the output shift register; with
    /// send-address set, also decode and apply a disk address.
    pub fn load_data_out(&mut self, bus: u16) {
        trace!("Load data out: {:#06x}.", bus);
        self.regs.data_out = bus;
        self.bit.shift_out = bus;
        if self.regs.command.send_address {
            let address = DiskAddress::from_word(bus);
            debug!(
                "Disk address: unit {} cylinder {} head {} sector {}{}.",
                address.drive,
                address.cylinder,
                address.head,
                address.sector,
                if address.restore { " (restore)" } else { "" }
            );
            self.regs.disk_address = address;
            self.select_unit(address.drive, address.head);
        }
    }

    /// Load the command register.
    pub fn load_command(&mut self, bus: u16) {
        self.regs.command = CommandRegister::from_word(bus);
        trace!("Load command: {:?}.", self.regs.command);
    }

    /// Load the record descriptor and reset the record cursor.
    pub fn load_address_descriptor(&mut self, bus: u16) {
        let descriptor = RecordDescriptor::from_word(bus);
        debug!("Load record descriptor: {:?}.", descriptor);
        self.regs.descriptor = descriptor;
        self.regs.record = RecordCursor::Header;
        if descriptor.drive != self.selected {
            let head = self.drives[self.selected].head();
            self.select_unit(descriptor.drive, head);
        }
    }

    /// Move the record cursor to the next record of the sector.
    pub fn advance_record(&mut self) {
        self.regs.record = self.regs.record.advance();
        debug!(
            "Record cursor: {:?} ({:?}).",
            self.regs.record,
            self.regs.descriptor.mode_for(self.regs.record)
        );
    }

    /// Reset the checksum/ready/sequence-error latches and start the ready
    /// one-shot.
    pub fn clear_status(&mut self, timer: &mut Timer) {
        debug!("Clear status.");
        if let Some(handle) = self.pending.ready.take() {
            timer.remove(handle);
        }
        if let Some(handle) = self.pending.sector_late.take() {
            timer.remove(handle);
        }
        // The window was served in time: release the bit counter and clear
        // the late error.
        self.sector_late = true;
        self.data_late = false;
        self.regs.checksum_error = false;
        self.net.clear_status(self.drives[self.selected].ready());
        self.pending.ready = Some(timer.insert(
            READY_PULSE_NS,
            DiskEvent::Monostable(MonostableKind::Ready),
            "ready one-shot",
        ));
    }

    /// Begin a seek strobe train towards the addressed cylinder.
    ///
    /// Without the send-address command bit the hardware's behavior was
    /// left undefined; this implementation conservatively does nothing.
    pub fn strobe_seek(&mut self, timer: &mut Timer) {
        if !self.regs.command.send_address {
            warn!("Seek strobe without send-address; treated as a no-op.");
            return;
        }
        let address = self.regs.disk_address;
        info!(
            "Seek: unit {} to cylinder {}{}.",
            address.drive,
            address.cylinder,
            if address.restore { " (restore)" } else { "" }
        );
        // A new strobe cancels the pulse train and one-shots of the
        // previous one.
        for handle in [
            self.pending.seek.take(),
            self.pending.ready.take(),
            self.pending.sector_late.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.remove(handle);
        }
        self.net.clear_seek_ack();
        self.seek_busy = true;
        self.pending.seek = Some(timer.insert(
            0,
            DiskEvent::SeekPulse {
                unit: address.drive,
                cylinder: address.cylinder,
                restore: address.restore,
            },
            "seek strobe",
        ));
    }

    /// The scheduler reports the given task yielding.
    pub fn block_task(&mut self, task: usize) {
        match task {
            TASK_WORD => {
                trace!("Word task blocked.");
                self.word_blocked = true;
                self.word_request = false;
                self.word_init = true;
            }
            TASK_SECTOR => {
                trace!("Sector task blocked.");
                self.sector_blocked = true;
                self.sector_request = false;
            }
            _ => warn!("Block for unrelated task {}.", task),
        }
    }

    // ----- branch predicates -----

    /// The task-initialization override OR-ed into every branch.
    fn init_bit(&self, sched: &dyn TaskScheduler) -> bool {
        sched.current_task() == TASK_WORD && self.word_init
    }

    /// Word task is active and still initializing.
    pub fn branch_init(&self, sched: &dyn TaskScheduler) -> bool {
        self.init_bit(sched)
    }

    /// Two-bit action of the current record (read 0, check 1, write 2).
    pub fn branch_record_mode(&self, sched: &dyn TaskScheduler) -> u16 {
        let mode = match self.regs.descriptor.mode_for(self.regs.record) {
            RwMode::Read => 0,
            RwMode::Check => 1,
            RwMode::Write => 2,
        };
        mode | self.init_bit(sched) as u16
    }

    /// Two-bit number of the current record.
    pub fn branch_record_number(&self, sched: &dyn TaskScheduler) -> u16 {
        self.regs.record.number() | self.init_bit(sched) as u16
    }

    /// A data transfer is wanted.
    pub fn branch_transfer_wanted(&self, sched: &dyn TaskScheduler) -> bool {
        self.transfer_wanted() || self.init_bit(sched)
    }

    /// The addressed drive cannot accept a seek/read/write right now.
    pub fn branch_not_ready(&self, sched: &dyn TaskScheduler) -> bool {
        !self.drives[self.selected].ready() || self.seek_busy || self.init_bit(sched)
    }

    /// The combined fatal error is latched.
    pub fn branch_fatal_error(&self, sched: &dyn TaskScheduler) -> bool {
        self.net.fatal_error() || self.init_bit(sched)
    }

    /// A seek strobe train is still pending.
    pub fn branch_seek_pending(&self, sched: &dyn TaskScheduler) -> bool {
        self.pending.seek.is_some() || self.init_bit(sched)
    }

    // ----- inspection -----

    pub fn drive(&self, unit: usize) -> &DriveUnit {
        &self.drives[unit]
    }

    pub fn selected_unit(&self) -> usize {
        self.selected
    }

    pub fn fatal_error(&self) -> bool {
        self.net.fatal_error()
    }

    pub fn sequence_error(&self) -> bool {
        self.net.sequence_error()
    }

    pub fn seek_busy(&self) -> bool {
        self.seek_busy
    }

    /// The last seek completed with an acknowledgement.
    pub fn seek_acknowledged(&self) -> bool {
        self.net.seek_acknowledged()
    }

    /// Total data-latch events since power-on.
    pub fn words_latched(&self) -> u64 {
        self.words_latched
    }

    // ----- event handlers -----

    fn select_unit(&mut self, unit: usize, head: usize) {
        self.drives[unit].select(head);
        self.drives[1 - unit].deselect();
        self.selected = unit;
    }

    fn on_seek_pulse(&mut self, unit: usize, cylinder: u16, restore: bool, timer: &mut Timer) {
        self.pending.seek = None;
        let drive = &mut self.drives[unit];
        let mut outcome = drive.strobe(cylinder, restore, StrobeEdge::Falling);
        if outcome == SeekOutcome::Moving {
            outcome = drive.strobe(cylinder, restore, StrobeEdge::Rising);
        }
        match outcome {
            SeekOutcome::Moving => {
                self.pending.seek = Some(timer.insert(
                    SEEK_PULSE_INTERVAL_NS,
                    DiskEvent::SeekPulse {
                        unit,
                        cylinder,
                        restore,
                    },
                    "seek strobe",
                ));
            }
            SeekOutcome::Acknowledged => {
                self.seek_busy = false;
                self.net.set_seek_ack();
            }
            SeekOutcome::Failed => {
                self.seek_busy = false;
            }
        }
    }

    fn on_sector_start(&mut self, timer: &mut Timer) {
        let now = timer.now();
        let drive = &mut self.drives[self.selected];
        drive.advance_sector(now);
        let mark = drive.take_sector_mark();

        // A sector mark arriving while a wanted transfer is still mid-
        // record (or with a bit chain still in flight) means the expected
        // completion never came.
        self.sequence_error_pulse = self.transfer_wanted()
            && (self.bit.running
                || matches!(self.regs.record, RecordCursor::Label | RecordCursor::Data));
        if self.sequence_error_pulse {
            debug!(
                "Sector mark with record cursor at {:?}: sequence error.",
                self.regs.record
            );
        }

        // The sector task wants service at every mark of a ready drive.
        self.sector_request = mark && self.drives[self.selected].ready();

        // Restart the bit chain for the new sector.
        self.bit = BitTimingState {
            armed: self.regs.command.arm_bit_counter,
            running: true,
            ..BitTimingState::default()
        };
        self.last_field = None;
        self.sector_late = false;
        for handle in [self.pending.sector_late.take(), self.pending.bit.take()]
            .into_iter()
            .flatten()
        {
            timer.remove(handle);
        }
        self.pending.sector_late = Some(timer.insert(
            SECTOR_LATE_NS,
            DiskEvent::Monostable(MonostableKind::SectorLate),
            "sector-late one-shot",
        ));
        self.pending.bit = Some(timer.insert(BIT_TIME_NS, DiskEvent::BitSample, "bit sample"));
        self.pending.sector = Some(timer.insert(
            SECTOR_TIME_NS,
            DiskEvent::SectorStart,
            "sector mark",
        ));
    }

    /// One bit tick: sample the serial stream and advance the whole
    /// controller by one step. The sub-step order is fixed; later steps
    /// read the already-updated outputs of earlier ones.
    fn on_bit_sample(&mut self, timer: &mut Timer, sched: &mut dyn TaskScheduler) {
        self.pending.bit = None;
        let index = self.bit.index;

        // The raw field under the head, probed every bit.
        let (field, _) = self.codec.field_at(index / 16);
        if self.last_field != Some(field) {
            trace!("Bit {}: entering {:?} field.", index, field);
            self.last_field = Some(field);
        }

        // Source-select the data bit (write from the shift register, read
        // from the medium, idle line otherwise).
        let data_bit = if self.gates.write {
            let bit = self.bit.shift_out & 0x8000 != 0;
            self.drives[self.selected].write_bit(index, bit);
            bit
        } else if self.gates.read && !self.regs.command.transfer_inhibit {
            self.drives[self.selected].read_bit(index)
        } else {
            true
        };

        // Bit-clock generation: the crystal free-runs, while the clock
        // recovered from the medium only produces edges while the selected
        // drive supplies flux.
        let clock_running = match self.regs.command.clock_source {
            ClockSource::Crystal => true,
            ClockSource::Medium => self.drives[self.selected].ready(),
        };

        // 1. Bit counter, on the falling edge. Held clear until the
        // sector-late window resolves; armed by a sync bit seen through
        // the read chain; unarmed operation pins the counter at 15 with
        // the carry forced.
        if !self.sector_late {
            self.bit.counter = 0;
            self.bit.carry = false;
        } else if clock_running {
            if !self.bit.armed && self.gates.read && data_bit {
                debug!("Bit counter armed by sync at bit {}.", index);
                // The sync cell itself is not counted; the counter starts
                // from its loaded value on the next cell, so the first
                // carry lands on the last bit of the first record word.
                self.bit.armed = true;
            } else if self.bit.armed {
                self.bit.counter = (self.bit.counter + 1) & 0xF;
                self.bit.carry = self.bit.counter == 15;
            } else {
                self.bit.counter = 15;
                self.bit.carry = true;
            }
        }

        // 2. Shift registers, on the rising edge.
        if clock_running {
            self.bit.shift_in = (self.bit.shift_in << 1) | data_bit as u16;
            self.bit.shift_out <<= 1;
        }

        // 3. Data-in latch and output reload, once per carry pulse.
        if self.bit.carry && !self.bit.prev_carry {
            self.regs.data_in = self.bit.shift_in;
            self.bit.shift_out = self.regs.data_out;
            self.words_latched += 1;
            trace!("Word latched: {:#06x}.", self.regs.data_in);
            if self.transfer_wanted() && !self.regs.command.word_task_inhibit {
                self.word_request = true;
            }
        }
        self.bit.prev_carry = self.bit.carry;

        // 4-6. Latch network: enable chains, status latches, fatal flag.
        let drive = &self.drives[self.selected];
        let inputs = NetworkInputs {
            word_request: self.word_request,
            sector_request: self.sector_request,
            word_blocked: std::mem::take(&mut self.word_blocked),
            sector_blocked: std::mem::take(&mut self.sector_blocked),
            ok_to_run: self.ok_to_run(),
            drive_ready: drive.ready(),
            sequence_error: std::mem::take(&mut self.sequence_error_pulse),
            seek_ok: !drive.seek_failed() && !drive.seek_incomplete(),
        };
        self.net.advance(&inputs);

        // 7. Head gates.
        let mode = self.regs.descriptor.mode_for(self.regs.record);
        let safe = self.net.sector_task_active()
            || self.regs.command.transfer_inhibit
            || self.net.fatal_error();
        let gates = if safe {
            Gates::default()
        } else {
            match mode {
                RwMode::Write => Gates {
                    read: false,
                    write: self.ok_to_run(),
                    erase: self.ok_to_run(),
                },
                RwMode::Read | RwMode::Check => Gates {
                    read: true,
                    write: false,
                    erase: false,
                },
            }
        };
        if gates != self.gates {
            debug!("Gates: {:?} -> {:?} at bit {}.", self.gates, gates, index);
            self.gates = gates;
        }

        // 8. Wakeup edges towards the scheduler.
        let word_awake = self.net.word_task_active();
        if word_awake != self.word_awake {
            if word_awake {
                sched.set_wakeup(TASK_WORD);
                self.word_init = false;
            } else {
                sched.clear_wakeup(TASK_WORD);
            }
            self.word_awake = word_awake;
        }
        let sector_awake = self.net.sector_task_active();
        if sector_awake != self.sector_awake {
            if sector_awake {
                sched.set_wakeup(TASK_SECTOR);
            } else {
                sched.clear_wakeup(TASK_SECTOR);
            }
            self.sector_awake = sector_awake;
        }

        // Chain to the next bit, or stop at the end of the sector.
        self.bit.index += 1;
        if self.bit.index < BITS_PER_SECTOR {
            self.pending.bit =
                Some(timer.insert(BIT_TIME_NS, DiskEvent::BitSample, "bit sample"));
        } else {
            trace!("Bit chain complete; waiting for the next sector mark.");
            self.bit.running = false;
        }
    }

    /// The ready one-shot has expired; timing-critical circuits may run.
    fn ok_to_run(&self) -> bool {
        self.pending.ready.is_none()
    }

    /// A data transfer is configured and the controller is not idle.
    fn transfer_wanted(&self) -> bool {
        !self.regs.descriptor.no_transfer && !self.regs.idle
    }
}
