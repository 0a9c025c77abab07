//! Backpressure state machine.
//!
//! A consumer group is either receiving from the broker or paused. Admitting
//! any message pauses it; only a fully drained queue resumes it. The machine is
//! pure: it returns the action to apply and leaves the I/O to the caller.

/// Delivery state of a consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Receiving,
    Paused,
    /// The group was closed and will not receive again.
    Closed,
}

/// What the caller must tell the broker handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    Pause,
    Resume,
}

/// Pause/resume bookkeeping for one consumer group.
#[derive(Debug, Default)]
pub struct FlowControl {
    state: FlowState,
    pauses: u64,
    resumes: u64,
}

impl FlowControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> FlowState {
        self.state
    }

    /// A message entered the queue.
    ///
    /// Always asks for a pause, even when already paused, so a handle that
    /// resumed on its own is brought back in line.
    pub fn on_enqueue(&mut self) -> Option<FlowAction> {
        if self.state == FlowState::Closed {
            return None;
        }
        self.state = FlowState::Paused;
        self.pauses += 1;
        Some(FlowAction::Pause)
    }

    /// The queue has no running and no pending work.
    ///
    /// Resumes only out of [`FlowState::Paused`], so one drain yields at most
    /// one resume.
    pub fn on_drain(&mut self) -> Option<FlowAction> {
        if self.state != FlowState::Paused {
            return None;
        }
        self.state = FlowState::Receiving;
        self.resumes += 1;
        Some(FlowAction::Resume)
    }

    /// The group is shutting down; no further transitions happen.
    pub fn on_close(&mut self) {
        self.state = FlowState::Closed;
    }

    /// Number of pause actions issued so far.
    #[must_use]
    pub const fn pauses(&self) -> u64 {
        self.pauses
    }

    /// Number of resume actions issued so far.
    #[must_use]
    pub const fn resumes(&self) -> u64 {
        self.resumes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_receiving() {
        let flow = FlowControl::new();
        assert_eq!(flow.state(), FlowState::Receiving);
    }

    #[test]
    fn test_enqueue_pauses_every_time() {
        let mut flow = FlowControl::new();
        assert_eq!(flow.on_enqueue(), Some(FlowAction::Pause));
        assert_eq!(flow.on_enqueue(), Some(FlowAction::Pause));
        assert_eq!(flow.state(), FlowState::Paused);
        assert_eq!(flow.pauses(), 2);
    }

    #[test]
    fn test_drain_resumes_exactly_once() {
        let mut flow = FlowControl::new();
        flow.on_enqueue();
        flow.on_enqueue();

        assert_eq!(flow.on_drain(), Some(FlowAction::Resume));
        assert_eq!(flow.on_drain(), None, "second drain signal must not resume again");
        assert_eq!(flow.state(), FlowState::Receiving);
        assert_eq!(flow.resumes(), 1);
    }

    #[test]
    fn test_drain_without_pause_is_ignored() {
        let mut flow = FlowControl::new();
        assert_eq!(flow.on_drain(), None);
        assert_eq!(flow.resumes(), 0);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut flow = FlowControl::new();
        flow.on_enqueue();
        flow.on_close();

        assert_eq!(flow.on_drain(), None);
        assert_eq!(flow.on_enqueue(), None);
        assert_eq!(flow.state(), FlowState::Closed);
    }
}
