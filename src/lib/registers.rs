//! The programmer-visible registers of the disk controller.
//!
//! All register traffic travels over the 16-bit shared bus. Bit positions
//! below use the hardware numbering, where bit 0 is the most significant
//! bit of the bus word.

use log::trace;

/// The disk address word, loaded over the bus together with a data-out
/// capture when the send-address command bit is set.
///
/// Layout (hardware numbering): sector 0-3, cylinder 4-12, head 13,
/// drive 14, restore 15.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskAddress {
    pub sector: usize,
    pub cylinder: u16,
    pub head: usize,
    pub drive: usize,
    pub restore: bool,
}

impl DiskAddress {
    pub fn from_word(word: u16) -> Self {
        DiskAddress {
            sector: (word >> 12) as usize & 0xF,
            cylinder: (word >> 3) & 0x1FF,
            head: (word >> 2) as usize & 1,
            drive: (word >> 1) as usize & 1,
            restore: word & 1 != 0,
        }
    }

    pub fn to_word(self) -> u16 {
        ((self.sector as u16 & 0xF) << 12)
            | ((self.cylinder & 0x1FF) << 3)
            | ((self.head as u16 & 1) << 2)
            | ((self.drive as u16 & 1) << 1)
            | self.restore as u16
    }
}

/// Where the bit clock comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClockSource {
    /// Clock recovered from the flux transitions on the medium.
    #[default]
    Medium,
    /// Free-running crystal oscillator, used while writing.
    Crystal,
}

/// The command register.
///
/// Layout (hardware numbering): transfer inhibit 1, word task inhibit 2,
/// bit clock source 3, arm bit counter 4, send address 5.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandRegister {
    /// Suppress the data transfer; read bits are forced to the idle line
    /// level.
    pub transfer_inhibit: bool,
    /// Hold off word-task wakeups.
    pub word_task_inhibit: bool,
    pub clock_source: ClockSource,
    /// Start each sector with the bit counter armed instead of waiting for
    /// a sync bit (set by microcode for writes, where there is no incoming
    /// sync to wait for).
    pub arm_bit_counter: bool,
    /// The next data-out load also carries a disk address.
    pub send_address: bool,
}

impl CommandRegister {
    pub fn from_word(word: u16) -> Self {
        CommandRegister {
            transfer_inhibit: word & 0x4000 != 0,
            word_task_inhibit: word & 0x2000 != 0,
            clock_source: if word & 0x1000 != 0 {
                ClockSource::Crystal
            } else {
                ClockSource::Medium
            },
            arm_bit_counter: word & 0x0800 != 0,
            send_address: word & 0x0400 != 0,
        }
    }
}

/// Read/check/write action for one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RwMode {
    #[default]
    Read,
    Check,
    Write,
}

impl RwMode {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => RwMode::Read,
            1 => RwMode::Check,
            _ => RwMode::Write,
        }
    }
}

/// The record descriptor register: what to do with each record of the
/// current sector.
///
/// Layout (hardware numbering): header action 8-9, label action 10-11,
/// data action 12-13, no-transfer 14, drive select 15.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub header: RwMode,
    pub label: RwMode,
    pub data: RwMode,
    /// Run the timing chain without transferring any data.
    pub no_transfer: bool,
    pub drive: usize,
}

impl RecordDescriptor {
    pub fn from_word(word: u16) -> Self {
        RecordDescriptor {
            header: RwMode::from_bits(word >> 6),
            label: RwMode::from_bits(word >> 4),
            data: RwMode::from_bits(word >> 2),
            no_transfer: word & 2 != 0,
            drive: (word & 1) as usize,
        }
    }

    /// The action configured for the given record.
    pub fn mode_for(&self, record: RecordCursor) -> RwMode {
        match record {
            RecordCursor::Header => self.header,
            RecordCursor::Label => self.label,
            RecordCursor::Data => self.data,
            // The page number is image bookkeeping; no record on the medium
            // corresponds to it, so nothing is transferred.
            RecordCursor::PageNumber => RwMode::Read,
        }
    }
}

/// The cursor over the records of a sector.
///
/// The hardware cycles header, label, data, then wraps back to header
/// through an intermediate page-number state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordCursor {
    #[default]
    Header,
    Label,
    Data,
    PageNumber,
}

impl RecordCursor {
    pub fn advance(self) -> Self {
        match self {
            RecordCursor::Header => RecordCursor::Label,
            RecordCursor::Label => RecordCursor::Data,
            RecordCursor::Data => RecordCursor::PageNumber,
            RecordCursor::PageNumber => RecordCursor::Header,
        }
    }

    /// The two-bit record number visible to microcode branches.
    pub fn number(self) -> u16 {
        match self {
            RecordCursor::Header => 0,
            RecordCursor::Label => 1,
            RecordCursor::Data => 2,
            RecordCursor::PageNumber => 3,
        }
    }
}

// Status word masks (hardware bit numbering in the comments).
const STATUS_DONE_NIBBLE: u16 = 0x0F00; // bits 4-7 always read 1111
const STATUS_SEEK_FAIL: u16 = 0x0080; // bit 8
const STATUS_SEEK_BUSY: u16 = 0x0040; // bit 9
const STATUS_NOT_READY: u16 = 0x0020; // bit 10
const STATUS_DATA_LATE: u16 = 0x0010; // bit 11
const STATUS_IDLE: u16 = 0x0008; // bit 12
const STATUS_CHECKSUM_ERROR: u16 = 0x0004; // bit 13
const STATUS_COMPLETION: u16 = 0x0003; // bits 14-15

/// The live inputs composed into a status word read.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusInputs {
    pub sector: usize,
    pub seek_fail: bool,
    pub seek_busy: bool,
    pub not_ready: bool,
    pub data_late: bool,
}

/// The full register file owned by the controller.
#[derive(Debug, Default)]
pub struct RegisterFile {
    pub disk_address: DiskAddress,
    pub command: CommandRegister,
    pub descriptor: RecordDescriptor,
    pub record: RecordCursor,
    pub data_in: u16,
    pub data_out: u16,
    // Status bits held in the register file itself; the rest of the status
    // word is composed from live latch outputs at read time.
    pub idle: bool,
    pub checksum_error: bool,
    pub completion: u16,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            idle: true,
            ..RegisterFile::default()
        }
    }

    /// Compose the status word from the held bits and the live inputs.
    pub fn read_status(&self, live: StatusInputs) -> u16 {
        let mut word = ((live.sector as u16 & 0xF) << 12) | STATUS_DONE_NIBBLE;
        if live.seek_fail {
            word |= STATUS_SEEK_FAIL;
        }
        if live.seek_busy {
            word |= STATUS_SEEK_BUSY;
        }
        if live.not_ready {
            word |= STATUS_NOT_READY;
        }
        if live.data_late {
            word |= STATUS_DATA_LATE;
        }
        if self.idle {
            word |= STATUS_IDLE;
        }
        if self.checksum_error {
            word |= STATUS_CHECKSUM_ERROR;
        }
        word | (self.completion & STATUS_COMPLETION)
    }

    /// Load the writable status bits from the bus: the idle bit and the
    /// completion code are copied verbatim, the checksum-error bit is
    /// OR-ed in and stays set until the next clear-status.
    pub fn load_status(&mut self, bus: u16) {
        self.idle = bus & STATUS_IDLE != 0;
        self.completion = bus & STATUS_COMPLETION;
        if bus & STATUS_CHECKSUM_ERROR != 0 {
            trace!("Checksum error latched from status load.");
            self.checksum_error = true;
        }
    }
}
