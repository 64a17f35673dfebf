//! The physical, bit-serial layout of one disk sector.
//!
//! The medium records each sector as a fixed sequence of word fields:
//! preamble, header, header checksum, gap, label, label checksum, gap,
//! data, data checksum, postamble. The checksummed fields are stored in
//! reverse word order because the hardware transfers memory blocks from the
//! top address downwards. The codec converts between this raw layout and the
//! "cooked" logical sector stored in image files (page number + header +
//! label + data).

use log::trace;
use std::cell::Cell;

// Drive geometry (Diablo model 31).
pub const CYLINDERS: usize = 203;
pub const HEADS: usize = 2;
pub const SECTORS_PER_TRACK: usize = 12;
pub const TOTAL_SECTORS: usize = CYLINDERS * HEADS * SECTORS_PER_TRACK;

// Logical sector shape, as stored in image files.
pub const HEADER_WORDS: usize = 2;
pub const LABEL_WORDS: usize = 8;
pub const DATA_WORDS: usize = 256;
pub const LOGICAL_SECTOR_WORDS: usize = 1 + HEADER_WORDS + LABEL_WORDS + DATA_WORDS;
pub const LOGICAL_SECTOR_BYTES: usize = LOGICAL_SECTOR_WORDS * 2;

// Raw sector shape, as serialised on the medium.
pub const PREAMBLE_WORDS: usize = 34;
pub const GAP_WORDS: usize = 5;
pub const POSTAMBLE_WORDS: usize = 34;
pub const RAW_SECTOR_WORDS: usize = PREAMBLE_WORDS
    + HEADER_WORDS
    + 1
    + GAP_WORDS
    + LABEL_WORDS
    + 1
    + GAP_WORDS
    + DATA_WORDS
    + 1
    + POSTAMBLE_WORDS;
pub const BITS_PER_SECTOR: usize = RAW_SECTOR_WORDS * 16;

/// Seed for the XOR checksum of each record.
pub const CHECKSUM_SEED: u16 = 0o521;

/// A zero word with the sync bit in the final bit position. The serial
/// stream is sent MSB-first, so the sync bit is the last bit of the word
/// and immediately precedes the record it introduces.
const SYNC_WORD: u16 = 0x0001;

/// The named fields of the raw layout, in serial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Preamble,
    Header,
    HeaderChecksum,
    /// Gap between the header checksum and the label record.
    Gap1,
    Label,
    LabelChecksum,
    /// Gap between the label checksum and the data record.
    Gap2,
    Data,
    DataChecksum,
    Postamble,
    /// Anything probed beyond the nominal sector size.
    Slack,
}

/// Field sizes in serial order, used by the running-subtraction lookup.
const FIELD_TABLE: [(FieldKind, usize); 10] = [
    (FieldKind::Preamble, PREAMBLE_WORDS),
    (FieldKind::Header, HEADER_WORDS),
    (FieldKind::HeaderChecksum, 1),
    (FieldKind::Gap1, GAP_WORDS),
    (FieldKind::Label, LABEL_WORDS),
    (FieldKind::LabelChecksum, 1),
    (FieldKind::Gap2, GAP_WORDS),
    (FieldKind::Data, DATA_WORDS),
    (FieldKind::DataChecksum, 1),
    (FieldKind::Postamble, POSTAMBLE_WORDS),
];

/// XOR checksum of a record, in forward logical order.
pub fn checksum(words: &[u16]) -> u16 {
    words.iter().fold(CHECKSUM_SEED, |acc, w| acc ^ w)
}

/// One "cooked" sector as stored in an image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalSector {
    pub page: u16,
    pub header: [u16; HEADER_WORDS],
    pub label: [u16; LABEL_WORDS],
    pub data: [u16; DATA_WORDS],
}

impl LogicalSector {
    /// An all-zero sector.
    pub fn zeroed() -> Self {
        LogicalSector {
            page: 0,
            header: [0; HEADER_WORDS],
            label: [0; LABEL_WORDS],
            data: [0; DATA_WORDS],
        }
    }

    /// Parse one sector from exactly `LOGICAL_SECTOR_BYTES` little-endian
    /// bytes. Panics on a wrong-sized slice; callers validate buffer sizes
    /// at the API boundary.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), LOGICAL_SECTOR_BYTES);
        let word = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
        let mut sector = LogicalSector::zeroed();
        sector.page = word(0);
        for i in 0..HEADER_WORDS {
            sector.header[i] = word(1 + i);
        }
        for i in 0..LABEL_WORDS {
            sector.label[i] = word(1 + HEADER_WORDS + i);
        }
        for i in 0..DATA_WORDS {
            sector.data[i] = word(1 + HEADER_WORDS + LABEL_WORDS + i);
        }
        sector
    }
}

/// One sector in the raw bit-serial layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSector {
    /// Image bookkeeping word; not part of the serial stream.
    pub page: u16,
    /// The serial stream, `RAW_SECTOR_WORDS` long.
    pub words: Vec<u16>,
}

impl RawSector {
    /// Read one bit of the serial stream (MSB of word 0 is bit 0).
    pub fn bit(&self, index: usize) -> bool {
        let word = index / 16;
        if word >= self.words.len() {
            // Past the postamble the line idles low.
            return false;
        }
        self.words[word] >> (15 - index % 16) & 1 != 0
    }

    /// Write one bit of the serial stream. Writes past the postamble are
    /// dropped; the slack region holds no flux transitions.
    pub fn set_bit(&mut self, index: usize, bit: bool) {
        let word = index / 16;
        if word >= self.words.len() {
            return;
        }
        let mask = 1 << (15 - index % 16);
        if bit {
            self.words[word] |= mask;
        } else {
            self.words[word] &= !mask;
        }
    }
}

/// Cached result of the last field lookup.
#[derive(Debug, Clone, Copy)]
struct FieldCache {
    start: usize,
    len: usize,
    kind: FieldKind,
}

/// Converter between logical sectors and the raw serial layout.
#[derive(Debug)]
pub struct SectorCodec {
    /// Number of sync bits at the start of the postamble.
    postamble_sync_bits: usize,
    // field_at is probed once per bit, so remember the last field hit.
    cache: Cell<Option<FieldCache>>,
}

impl Default for SectorCodec {
    fn default() -> Self {
        SectorCodec::new(1)
    }
}

impl SectorCodec {
    /// Create a codec writing the given number of leading sync bits into
    /// each postamble.
    pub fn new(postamble_sync_bits: usize) -> Self {
        SectorCodec {
            postamble_sync_bits,
            cache: Cell::new(None),
        }
    }

    /// Serialise a logical sector into the raw layout.
    pub fn cook(&self, logical: &LogicalSector) -> RawSector {
        let mut words = vec![0u16; RAW_SECTOR_WORDS];
        let mut pos = 0;

        // Preamble: zeros with a sync bit in the last word.
        pos += PREAMBLE_WORDS;
        words[pos - 1] = SYNC_WORD;

        pos = Self::cook_record(&mut words, pos, &logical.header);
        pos += GAP_WORDS;
        words[pos - 1] = SYNC_WORD;

        pos = Self::cook_record(&mut words, pos, &logical.label);
        pos += GAP_WORDS;
        words[pos - 1] = SYNC_WORD;

        pos = Self::cook_record(&mut words, pos, &logical.data);

        // Postamble: zeros with the configured leading sync bits.
        let mut raw = RawSector {
            page: logical.page,
            words,
        };
        for bit in 0..self.postamble_sync_bits {
            raw.set_bit(pos * 16 + bit, true);
        }
        raw
    }

    /// Copy one record into the raw layout in reverse word order, followed
    /// by its checksum word. Returns the position after the checksum.
    fn cook_record(words: &mut [u16], pos: usize, record: &[u16]) -> usize {
        for (i, w) in record.iter().rev().enumerate() {
            words[pos + i] = *w;
        }
        words[pos + record.len()] = checksum(record);
        pos + record.len() + 1
    }

    /// Recover the logical sector from the raw layout.
    pub fn extract(&self, raw: &RawSector) -> LogicalSector {
        let mut logical = LogicalSector::zeroed();
        logical.page = raw.page;
        for i in 0..RAW_SECTOR_WORDS {
            match self.field_at(i) {
                (FieldKind::Header, off) => {
                    logical.header[HEADER_WORDS - 1 - off] = raw.words[i];
                }
                (FieldKind::Label, off) => {
                    logical.label[LABEL_WORDS - 1 - off] = raw.words[i];
                }
                (FieldKind::Data, off) => {
                    logical.data[DATA_WORDS - 1 - off] = raw.words[i];
                }
                _ => {}
            }
        }
        logical
    }

    /// Locate the named field containing the given word offset, returning
    /// the field and the offset within it.
    ///
    /// Amortized O(1): the last hit is cached, and serial access probes the
    /// same field for many consecutive bits.
    pub fn field_at(&self, word_offset: usize) -> (FieldKind, usize) {
        if let Some(cache) = self.cache.get() {
            if word_offset >= cache.start && word_offset < cache.start + cache.len {
                return (cache.kind, word_offset - cache.start);
            }
        }
        let mut remaining = word_offset;
        let mut start = 0;
        for (kind, len) in FIELD_TABLE {
            if remaining < len {
                self.cache.set(Some(FieldCache { start, len, kind }));
                trace!("field_at({}) -> {:?}+{}", word_offset, kind, remaining);
                return (kind, remaining);
            }
            remaining -= len;
            start += len;
        }
        // Probing beyond the nominal sector size falls through to slack.
        (FieldKind::Slack, remaining)
    }
}
