//! Optional delivery tracking and retry backoff.
//!
//! Kept in-process (not persisted through the Model Store Gateway): a
//! delivery row only matters for the lifetime of the attempt, and nothing
//! downstream queries it after the fact, so there's no case for carrying
//! it across a restart.

use std::time::Duration;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub event_id: Uuid,
    pub connection_id: Uuid,
    pub state: DeliveryState,
    pub attempts: u32,
    pub max_retries: u32,
}

impl DeliveryRecord {
    pub fn new(event_id: Uuid, connection_id: Uuid, max_retries: u32) -> Self {
        Self {
            event_id,
            connection_id,
            state: DeliveryState::Pending,
            attempts: 0,
            max_retries,
        }
    }

    /// Whether another attempt should be made after a failure.
    pub fn should_retry(&self) -> bool {
        self.state == DeliveryState::Failed && self.attempts <= self.max_retries
    }
}

/// Exponential backoff delay for retry `attempt` (1-indexed), the same
/// doubling formula the teacher uses for reconnect backoff.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
    base * multiplier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_each_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    }

    #[test]
    fn test_should_retry_stops_after_max() {
        let mut record = DeliveryRecord::new(Uuid::new_v4(), Uuid::new_v4(), 2);
        record.state = DeliveryState::Failed;
        record.attempts = 2;
        assert!(record.should_retry());
        record.attempts = 3;
        assert!(!record.should_retry());
    }
}
