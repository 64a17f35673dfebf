//! Interface to the host CPU's cooperative task scheduler.
//!
//! The controller raises and clears wakeup requests for the microcode tasks
//! that service it, and reads the currently running task to evaluate branch
//! predicates. The scheduler itself lives with the CPU emulation; the disk
//! subsystem only consumes this trait.

/// Wake/sleep signalling towards the microcode task scheduler.
pub trait TaskScheduler {
    /// Request that the given task runs.
    fn set_wakeup(&mut self, task: usize);

    /// Withdraw a wakeup request.
    fn clear_wakeup(&mut self, task: usize);

    /// Is a wakeup currently requested for the given task?
    fn get_wakeup(&self, task: usize) -> bool;

    /// The task currently executing microcode.
    fn current_task(&self) -> usize;
}

// Mock implementation for testing.
#[cfg(test)]
pub use mock::MockScheduler;
