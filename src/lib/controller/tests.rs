use super::*;

use ntest::timeout;

use crate::init_test_logging;
use crate::scheduler::MockScheduler;
use crate::sector::{checksum, LogicalSector, SectorCodec};

// Status word masks used by the assertions (hardware bit numbering).
const STATUS_SEEK_FAIL: u16 = 0x0080;
const STATUS_SEEK_BUSY: u16 = 0x0040;
const STATUS_NOT_READY: u16 = 0x0020;
const STATUS_DATA_LATE: u16 = 0x0010;

/// A controller wired to a timer and a mock scheduler.
struct Fixture {
    ctl: DiskController,
    timer: Timer,
    sched: MockScheduler,
}

impl Fixture {
    fn new() -> Self {
        init_test_logging();
        let mut ctl = DiskController::new();
        let mut timer = Timer::new();
        ctl.start(&mut timer);
        Fixture {
            ctl,
            timer,
            sched: MockScheduler::new(),
        }
    }

    /// A fixture with a zero-filled pack mounted on unit 0.
    fn with_blank_pack() -> Self {
        let mut fixture = Fixture::new();
        let image = vec![0u8; TOTAL_SECTORS * LOGICAL_SECTOR_BYTES];
        fixture.ctl.mount(0, &image).unwrap();
        fixture
    }

    /// Drain events up to and including virtual time `until_ns`. With
    /// `auto_block` the fixture acts as microcode that immediately yields
    /// any task the controller wakes.
    fn run_until(&mut self, until_ns: u64, auto_block: bool) {
        while self.timer.next_due().map_or(false, |due| due <= until_ns) {
            let event = self.timer.fire_due().unwrap();
            self.ctl.dispatch(event, &mut self.timer, &mut self.sched);
            if auto_block {
                for task in [TASK_SECTOR, TASK_WORD] {
                    if self.sched.get_wakeup(task) {
                        self.ctl.block_task(task);
                    }
                }
            }
        }
    }

    fn status(&self) -> u16 {
        self.ctl.read_status(&self.timer)
    }
}

#[test]
fn test_mount_validates_image() {
    init_test_logging();
    let mut ctl = DiskController::new();
    let expected = TOTAL_SECTORS * LOGICAL_SECTOR_BYTES;
    assert_eq!(
        ctl.mount(0, &[0u8; 100]),
        Err(DiskError::BadImageSize {
            expected,
            actual: 100
        })
    );
    assert_eq!(ctl.mount(2, &[]), Err(DiskError::BadUnit(2)));
    assert!(ctl.mount(1, &vec![0u8; expected]).is_ok());
    assert!(ctl.drive(1).has_media());
    assert!(!ctl.drive(0).has_media());
}

#[test]
fn test_power_on_is_fatal_and_not_ready() {
    init_test_logging();
    let ctl = DiskController::new();
    let timer = Timer::new();
    // No tick has run yet; the combined error must already hold.
    assert!(ctl.fatal_error());
    assert_ne!(ctl.read_status(&timer) & STATUS_NOT_READY, 0);
}

#[test]
#[timeout(20_000)]
fn test_bit_counter_held_inside_late_window() {
    let mut fixture = Fixture::with_blank_pack();
    // Samples inside the sector-late window latch nothing: the counter
    // and carry are forced clear on every step.
    fixture.run_until(SECTOR_TIME_NS + 50_000, false);
    assert_eq!(fixture.ctl.words_latched(), 0);
    // The window expiring releases the counter and the forced carry
    // latches exactly once.
    fixture.run_until(SECTOR_TIME_NS + 100_000, false);
    assert_eq!(fixture.ctl.words_latched(), 1);
}

#[test]
#[timeout(20_000)]
fn test_medium_clock_stops_without_flux() {
    let mut fixture = Fixture::new();
    // No pack mounted: the clock recovered from the medium never ticks,
    // so nothing is ever latched.
    fixture.run_until(2 * SECTOR_TIME_NS, false);
    assert_eq!(fixture.ctl.words_latched(), 0);
    // The crystal free-runs regardless of the medium.
    fixture.ctl.load_command(0x1000);
    fixture.run_until(3 * SECTOR_TIME_NS, false);
    assert_eq!(fixture.ctl.words_latched(), 1);
}

#[test]
#[timeout(20_000)]
fn test_read_path_recovers_header_words() {
    init_test_logging();
    let mut ctl = DiskController::new();
    let mut timer = Timer::new();
    let mut sched = MockScheduler::new();

    // Every sector carries a recognizable header record.
    let header = [0x1234u16, 0x5678];
    let mut sector_bytes = vec![0u8; LOGICAL_SECTOR_BYTES];
    sector_bytes[2..4].copy_from_slice(&header[0].to_le_bytes());
    sector_bytes[4..6].copy_from_slice(&header[1].to_le_bytes());
    let mut image = Vec::with_capacity(TOTAL_SECTORS * LOGICAL_SECTOR_BYTES);
    for _ in 0..TOTAL_SECTORS {
        image.extend_from_slice(&sector_bytes);
    }
    ctl.mount(0, &image).unwrap();
    ctl.start(&mut timer);
    ctl.clear_status(&mut timer);
    ctl.load_status(0);
    ctl.load_address_descriptor(0);

    // Act as microcode: collect data-in at every word wakeup, yielding
    // both tasks as soon as they run.
    let mut latched = Vec::new();
    let mut word_was_awake = false;
    while timer.now() < 2 * SECTOR_TIME_NS {
        let event = timer.fire_due().unwrap();
        ctl.dispatch(event, &mut timer, &mut sched);
        if sched.get_wakeup(TASK_SECTOR) {
            ctl.block_task(TASK_SECTOR);
        }
        let word_awake = sched.get_wakeup(TASK_WORD);
        if word_awake && !word_was_awake {
            latched.push(ctl.read_data_in());
            ctl.block_task(TASK_WORD);
        }
        word_was_awake = word_awake;
    }

    // The header record arrives in reverse word order, followed by its
    // checksum.
    let expected = [header[1], header[0], checksum(&header)];
    assert!(
        latched.windows(3).any(|w| w == &expected[..]),
        "header words not recovered: {latched:04x?}"
    );
}

#[test]
#[timeout(20_000)]
fn test_sector_rotation_and_single_latch_when_unserviced() {
    let mut fixture = Fixture::with_blank_pack();
    // Header-read descriptor; the controller stays idle so no transfer
    // runs and no clear-status ever arrives.
    fixture.ctl.load_address_descriptor(0);

    // After the first full sector the forced carry has latched exactly
    // one word.
    fixture.run_until(2 * SECTOR_TIME_NS, false);
    assert_eq!(fixture.ctl.words_latched(), 1);
    assert_eq!(fixture.status() >> 12, 2);

    // One more latch per sector, with the live sector counting mod 12.
    for mark in 3..=14u64 {
        fixture.run_until(mark * SECTOR_TIME_NS, false);
        assert_eq!(fixture.ctl.words_latched(), mark - 1);
        assert_eq!((fixture.status() >> 12) as u64, mark % 12);
    }
}

#[test]
#[timeout(20_000)]
fn test_seek_issues_one_pulse_per_cylinder() {
    let mut fixture = Fixture::with_blank_pack();
    // Send-address, then the address word for cylinder 5.
    fixture.ctl.load_command(0x0400);
    let address = DiskAddress {
        cylinder: 5,
        ..DiskAddress::default()
    };
    fixture.ctl.load_data_out(address.to_word());
    fixture.ctl.strobe_seek(&mut fixture.timer);
    assert!(fixture.ctl.seek_busy());
    assert_ne!(fixture.status() & STATUS_SEEK_BUSY, 0);

    let mut pulses = 0;
    while fixture.ctl.seek_busy() {
        let event = fixture.timer.fire_due().unwrap();
        if matches!(event, DiskEvent::SeekPulse { .. }) {
            pulses += 1;
        }
        fixture
            .ctl
            .dispatch(event, &mut fixture.timer, &mut fixture.sched);
    }
    assert_eq!(pulses, 5);
    assert_eq!(fixture.ctl.drive(0).cylinder(), 5);
    assert!(fixture.ctl.seek_acknowledged());
    assert_eq!(fixture.status() & STATUS_SEEK_BUSY, 0);
    assert_eq!(fixture.status() & STATUS_SEEK_FAIL, 0);
}

#[test]
fn test_strobe_without_send_address_is_ignored() {
    let mut fixture = Fixture::with_blank_pack();
    fixture.ctl.load_command(0);
    fixture.ctl.strobe_seek(&mut fixture.timer);
    assert!(!fixture.ctl.seek_busy());
    assert!(!fixture.ctl.branch_seek_pending(&fixture.sched));
}

#[test]
#[timeout(20_000)]
fn test_no_media_reports_not_ready_until_mounted_and_cleared() {
    let mut fixture = Fixture::new();
    fixture.ctl.clear_status(&mut fixture.timer);
    fixture.run_until(2 * SECTOR_TIME_NS, false);
    assert_ne!(fixture.status() & STATUS_NOT_READY, 0);
    assert!(fixture.ctl.fatal_error());

    // Mounting alone is not enough; a clear-status must resample ready.
    let image = vec![0u8; TOTAL_SECTORS * LOGICAL_SECTOR_BYTES];
    fixture.ctl.mount(0, &image).unwrap();
    fixture.run_until(3 * SECTOR_TIME_NS, false);
    assert_ne!(fixture.status() & STATUS_NOT_READY, 0);
    assert!(fixture.ctl.fatal_error());

    fixture.ctl.clear_status(&mut fixture.timer);
    assert_eq!(fixture.status() & STATUS_NOT_READY, 0);
    assert!(!fixture.ctl.fatal_error());
    // And the latch holds through subsequent bit ticks.
    fixture.run_until(4 * SECTOR_TIME_NS, true);
    assert_eq!(fixture.status() & STATUS_NOT_READY, 0);
}

#[test]
#[timeout(20_000)]
fn test_sequence_error_on_abandoned_transfer() {
    let mut fixture = Fixture::with_blank_pack();
    fixture.ctl.clear_status(&mut fixture.timer);
    // Leave idle: a transfer is configured and under way.
    fixture.ctl.load_status(0);
    fixture.ctl.load_address_descriptor(0);
    // The cursor advances into the sector but never reaches completion.
    fixture.ctl.advance_record();
    assert_eq!(fixture.ctl.branch_record_number(&fixture.sched), 1);

    let next_mark = 2 * SECTOR_TIME_NS;
    fixture.run_until(next_mark + 2 * BIT_TIME_NS, true);
    assert!(fixture.ctl.sequence_error());
    assert!(fixture.ctl.fatal_error());

    fixture.ctl.clear_status(&mut fixture.timer);
    assert!(!fixture.ctl.sequence_error());
    assert!(!fixture.ctl.fatal_error());
}

#[test]
#[timeout(20_000)]
fn test_data_late_when_sector_unserviced() {
    let mut fixture = Fixture::with_blank_pack();
    fixture.ctl.clear_status(&mut fixture.timer);
    // Run past a sector mark and its late window without servicing.
    fixture.run_until(SECTOR_TIME_NS + 100_000, true);
    assert_ne!(fixture.status() & STATUS_DATA_LATE, 0);
    fixture.ctl.clear_status(&mut fixture.timer);
    assert_eq!(fixture.status() & STATUS_DATA_LATE, 0);
}

#[test]
#[timeout(60_000)]
fn test_write_transfer_reaches_the_medium() {
    let mut fixture = Fixture::with_blank_pack();
    fixture.ctl.clear_status(&mut fixture.timer);
    // Crystal clock with the bit counter armed from the sector start, as
    // microcode sets up for writes.
    fixture.ctl.load_command(0x1000 | 0x0800);
    // Write the header record.
    fixture.ctl.load_address_descriptor(0b10 << 6);
    assert_eq!(fixture.ctl.branch_record_mode(&fixture.sched), 2);
    fixture.ctl.load_status(0);
    fixture.ctl.load_data_out(0xABCD);

    fixture.run_until(3 * SECTOR_TIME_NS, true);

    // The armed counter latches a word every sixteen bits, and the write
    // gate has replaced the recorded flux of at least one sector.
    assert!(fixture.ctl.words_latched() > 100);
    let blank = SectorCodec::default().cook(&LogicalSector::zeroed());
    let media = fixture.ctl.drive(0).media().unwrap();
    assert!(media.iter().any(|sector| sector.words != blank.words));
}

#[test]
#[timeout(20_000)]
fn test_word_task_wakes_during_transfer() {
    let mut fixture = Fixture::with_blank_pack();
    fixture.ctl.clear_status(&mut fixture.timer);
    fixture.ctl.load_command(0x0800);
    fixture.ctl.load_address_descriptor(0);
    fixture.ctl.load_status(0);

    fixture.run_until(3 * SECTOR_TIME_NS, true);
    assert!(fixture.sched.count_transitions(TASK_WORD, true) > 10);
    assert!(fixture.sched.count_transitions(TASK_SECTOR, true) >= 2);
}

#[test]
fn test_send_address_selects_unit_and_head() {
    let mut fixture = Fixture::with_blank_pack();
    let image = vec![0u8; TOTAL_SECTORS * LOGICAL_SECTOR_BYTES];
    fixture.ctl.mount(1, &image).unwrap();
    assert_eq!(fixture.ctl.selected_unit(), 0);

    fixture.ctl.load_command(0x0400);
    let address = DiskAddress {
        drive: 1,
        head: 1,
        ..DiskAddress::default()
    };
    fixture.ctl.load_data_out(address.to_word());
    assert_eq!(fixture.ctl.selected_unit(), 1);
    assert_eq!(fixture.ctl.drive(1).head(), 1);
    assert!(fixture.ctl.drive(1).is_selected());
    assert!(!fixture.ctl.drive(0).is_selected());

    // Without send-address a data-out load leaves selection alone.
    fixture.ctl.load_command(0);
    fixture.ctl.load_data_out(0);
    assert_eq!(fixture.ctl.selected_unit(), 1);
}

#[test]
fn test_record_cursor_branches() {
    let mut fixture = Fixture::with_blank_pack();
    // header=read, label=check, data=write.
    fixture
        .ctl
        .load_address_descriptor((0b01 << 4) | (0b10 << 2));
    assert_eq!(fixture.ctl.branch_record_number(&fixture.sched), 0);
    assert_eq!(fixture.ctl.branch_record_mode(&fixture.sched), 0);
    fixture.ctl.advance_record();
    assert_eq!(fixture.ctl.branch_record_number(&fixture.sched), 1);
    assert_eq!(fixture.ctl.branch_record_mode(&fixture.sched), 1);
    fixture.ctl.advance_record();
    assert_eq!(fixture.ctl.branch_record_number(&fixture.sched), 2);
    assert_eq!(fixture.ctl.branch_record_mode(&fixture.sched), 2);
    // Loading a descriptor resets the cursor.
    fixture.ctl.load_address_descriptor(0);
    assert_eq!(fixture.ctl.branch_record_number(&fixture.sched), 0);
}

#[test]
fn test_init_override_sets_branch_bits() {
    let mut fixture = Fixture::with_blank_pack();
    fixture.sched.set_current_task(TASK_WORD);
    assert!(!fixture.ctl.branch_init(&fixture.sched));
    // Blocking the word task opens its initialization window.
    fixture.ctl.block_task(TASK_WORD);
    assert!(fixture.ctl.branch_init(&fixture.sched));
    assert_eq!(fixture.ctl.branch_record_number(&fixture.sched), 1);
    // Other tasks never see the override.
    fixture.sched.set_current_task(TASK_SECTOR);
    assert!(!fixture.ctl.branch_init(&fixture.sched));
}
