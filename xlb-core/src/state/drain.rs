//! Operator-initiated target drain (§4.4, §9). Draining zeroes a target's
//! effective weight without touching its configured weight or health
//! status, so undraining restores exactly the weight it had before.
//!
//! There is deliberately no automatic undrain: a drain that times out is
//! left in [`DrainStatus::Timeout`] until an operator acts, rather than
//! silently putting a possibly-still-unready target back into rotation.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    Draining,
    Completed,
    Cancelled,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct DrainState {
    started_at: Instant,
    timeout: Duration,
    initial_connection_count: u64,
    status: DrainStatus,
}

impl DrainState {
    pub fn start(timeout: Duration, initial_connection_count: u64) -> Self {
        Self { started_at: Instant::now(), timeout, initial_connection_count, status: DrainStatus::Draining }
    }

    pub fn status(&self) -> DrainStatus {
        self.status
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.status, DrainStatus::Draining)
    }

    pub fn initial_connection_count(&self) -> u64 {
        self.initial_connection_count
    }

    /// Call on every orchestrator tick with the target's current
    /// connection count; transitions `Draining -> Completed` once
    /// connections reach zero, or `Draining -> Timeout` once the deadline
    /// passes, whichever happens first.
    pub fn tick(&mut self, current_connection_count: u64) {
        if !self.is_draining() {
            return;
        }
        if current_connection_count == 0 {
            self.status = DrainStatus::Completed;
        } else if self.started_at.elapsed() >= self.timeout {
            self.status = DrainStatus::Timeout;
        }
    }

    /// Operator-initiated cancellation, restoring the target to normal
    /// rotation immediately.
    pub fn cancel(&mut self) {
        if self.is_draining() {
            self.status = DrainStatus::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_when_connections_reach_zero() {
        let mut drain = DrainState::start(Duration::from_secs(30), 5);
        drain.tick(3);
        assert_eq!(drain.status(), DrainStatus::Draining);
        drain.tick(0);
        assert_eq!(drain.status(), DrainStatus::Completed);
    }

    #[test]
    fn cancel_is_terminal() {
        let mut drain = DrainState::start(Duration::from_secs(30), 1);
        drain.cancel();
        assert_eq!(drain.status(), DrainStatus::Cancelled);
        drain.tick(0);
        assert_eq!(drain.status(), DrainStatus::Cancelled);
    }

    #[test]
    fn times_out_past_deadline_with_connections_remaining() {
        let mut drain = DrainState::start(Duration::from_millis(0), 5);
        std::thread::sleep(Duration::from_millis(5));
        drain.tick(2);
        assert_eq!(drain.status(), DrainStatus::Timeout);
    }
}
