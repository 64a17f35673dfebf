//! The latch fabric at the heart of the controller.
//!
//! Task wake arbitration and the persistent status conditions are held in
//! JK flip-flops clocked by two alternating system-clock phases. The
//! controller advances the whole network once per bit tick; within a tick
//! the update order is fixed, because later latches read the already
//! updated outputs of earlier ones.

use log::trace;

use crate::flipflop::{FfInputs, FlipFlop};

/// Signals sampled by the network on one bit tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkInputs {
    /// A word boundary arrived and the transfer wants servicing.
    pub word_request: bool,
    /// A sector boundary arrived and the sector task wants servicing.
    pub sector_request: bool,
    /// The scheduler reported the word task yielding.
    pub word_blocked: bool,
    /// The scheduler reported the sector task yielding.
    pub sector_blocked: bool,
    /// The ready one-shot has expired; timing-critical circuits may run.
    pub ok_to_run: bool,
    /// The addressed drive is selected and loaded.
    pub drive_ready: bool,
    /// The expected record completion failed to arrive this tick.
    pub sequence_error: bool,
    /// The addressed drive's seek logic reports no failure.
    pub seek_ok: bool,
}

/// One three-stage task enable chain.
///
/// The first stage arms on the wake request, the second synchronises it to
/// the opposite clock phase under the ok-to-run gate, and the third drives
/// the actual wakeup line. A block signal from the scheduler drains all
/// three stages.
#[derive(Debug, Default)]
struct EnableChain {
    armed: FlipFlop,
    synced: FlipFlop,
    active: FlipFlop,
}

impl EnableChain {
    /// Advance the chain through one tick's four sub-phases.
    fn advance(&mut self, request: bool, blocked: bool, ok_to_run: bool) {
        // Phase A.
        self.armed.step(FfInputs::follow(false, request && !blocked));
        self.armed.step(FfInputs::follow(true, request && !blocked));
        let armed = self.armed.q();
        self.active
            .step(FfInputs::follow(false, self.synced.q() && !blocked));
        self.active
            .step(FfInputs::follow(true, self.synced.q() && !blocked));
        // Phase B.
        self.synced
            .step(FfInputs::follow(false, armed && ok_to_run && !blocked));
        self.synced
            .step(FfInputs::follow(true, armed && ok_to_run && !blocked));
    }

    fn active(&self) -> bool {
        self.active.q()
    }
}

/// The controller's latch network.
#[derive(Debug)]
pub struct FlipFlopNetwork {
    word_chain: EnableChain,
    sector_chain: EnableChain,
    ready: FlipFlop,
    seq_error: FlipFlop,
    seek_ack: FlipFlop,
    fatal: bool,
}

impl Default for FlipFlopNetwork {
    fn default() -> Self {
        FlipFlopNetwork {
            word_chain: EnableChain::default(),
            sector_chain: EnableChain::default(),
            ready: FlipFlop::new(),
            seq_error: FlipFlop::new(),
            seek_ack: FlipFlop::new(),
            // The ready latch powers on low, so the combined error holds
            // from the start until a clear-status raises it.
            fatal: true,
        }
    }
}

impl FlipFlopNetwork {
    pub fn new() -> Self {
        FlipFlopNetwork::default()
    }

    /// Advance every latch one bit tick, in dependency order: word-task
    /// chain, then sector-task chain, then the status latches, then the
    /// combined fatal flag.
    pub fn advance(&mut self, inputs: &NetworkInputs) {
        self.word_chain
            .advance(inputs.word_request, inputs.word_blocked, inputs.ok_to_run);
        self.sector_chain.advance(
            inputs.sector_request,
            inputs.sector_blocked,
            inputs.ok_to_run,
        );

        // Ready and sequence-error are clocked on the same phase (B). The
        // ready latch is sticky-down: it drops as soon as the drive stops
        // being ready and is only raised again by a clear-status command.
        let ready_next = self.ready.q() && inputs.drive_ready;
        self.ready.step(FfInputs::follow(false, ready_next));
        self.ready.step(FfInputs::follow(true, ready_next));
        let seq_next = self.seq_error.q() || inputs.sequence_error;
        self.seq_error.step(FfInputs::follow(false, seq_next));
        self.seq_error.step(FfInputs::follow(true, seq_next));

        // Combined fatal condition; clears only when none of the inputs
        // hold.
        self.fatal = self.ready.q_bar() || self.seq_error.q() || !inputs.seek_ok;
    }

    /// Apply a clear-status command: resample ready from the drive and
    /// drop the sequence-error latch.
    pub fn clear_status(&mut self, drive_ready: bool) {
        trace!("Network: clear status (drive ready: {}).", drive_ready);
        self.ready.step(FfInputs {
            clock: false,
            j: false,
            k: false,
            set: drive_ready,
            reset: !drive_ready,
        });
        self.seq_error.step(FfInputs {
            clock: false,
            j: false,
            k: false,
            set: false,
            reset: true,
        });
        self.fatal = self.ready.q_bar() || self.seq_error.q();
    }

    /// Latch a seek acknowledgement from the drive.
    pub fn set_seek_ack(&mut self) {
        self.seek_ack.step(FfInputs {
            clock: false,
            j: false,
            k: false,
            set: true,
            reset: false,
        });
    }

    /// Drop the acknowledgement latch when a new seek begins.
    pub fn clear_seek_ack(&mut self) {
        self.seek_ack.step(FfInputs {
            clock: false,
            j: false,
            k: false,
            set: false,
            reset: true,
        });
    }

    pub fn word_task_active(&self) -> bool {
        self.word_chain.active()
    }

    pub fn sector_task_active(&self) -> bool {
        self.sector_chain.active()
    }

    pub fn ready(&self) -> bool {
        self.ready.q()
    }

    pub fn sequence_error(&self) -> bool {
        self.seq_error.q()
    }

    pub fn seek_acknowledged(&self) -> bool {
        self.seek_ack.q()
    }

    /// The combined fatal-error flag recomputed on the last tick.
    pub fn fatal_error(&self) -> bool {
        self.fatal
    }
}
