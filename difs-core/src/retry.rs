//! Bounded retry for one logical operation.
//!
//! A fetch, a delete and an insert registration each own exactly one
//! `RetryPolicy`. Failures from every request the operation issues count
//! against the same budget, and the budget is never reset mid-operation.

use crate::transport::{Interest, RequestOutcome};
use crate::{Data, DifsError, MAX_RETRY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Number of failures absorbed so far.
    Active(u32),
    Aborted,
}

/// What the owner of a request should do with one outcome.
#[derive(Debug)]
pub enum AttemptResult {
    Delivered(Data),
    /// Send the identical request again.
    Reissue(Interest),
    Exhausted(DifsError),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retry: u32,
    failures: u32,
    state: RetryState,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRY)
    }
}

impl RetryPolicy {
    pub fn new(max_retry: u32) -> Self {
        Self {
            max_retry,
            failures: 0,
            state: RetryState::Active(0),
        }
    }

    /// Policy for commands whose loss must not be papered over by a resend.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// Total failures observed, including the one that aborted the policy.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_aborted(&self) -> bool {
        self.state == RetryState::Aborted
    }

    /// Record a timeout or nack. Returns true when the failed request may be
    /// reissued.
    pub fn on_failure(&mut self) -> bool {
        match self.state {
            RetryState::Active(n) if n < self.max_retry => {
                self.failures += 1;
                self.state = RetryState::Active(n + 1);
                true
            }
            RetryState::Active(_) => {
                self.failures += 1;
                self.state = RetryState::Aborted;
                false
            }
            RetryState::Aborted => false,
        }
    }

    /// Apply one request outcome to the policy.
    pub fn handle_outcome(&mut self, interest: Interest, outcome: RequestOutcome) -> AttemptResult {
        let reason = match outcome {
            RequestOutcome::Data(data) => return AttemptResult::Delivered(data),
            RequestOutcome::Nack(reason) => format!("nack ({})", reason),
            RequestOutcome::Timeout => "timeout".to_string(),
        };

        if self.on_failure() {
            tracing::warn!(
                "Request failed, reissuing. name={} reason={} retry={}/{}",
                interest.name,
                reason,
                self.failures,
                self.max_retry
            );
            return AttemptResult::Reissue(interest);
        }

        tracing::warn!(
            "Request failed, giving up. name={} reason={} attempts={}",
            interest.name,
            reason,
            self.failures
        );
        AttemptResult::Exhausted(DifsError::RetryExhausted {
            request: interest.name.to_uri(),
            attempts: self.failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NackReason;
    use crate::Name;

    fn interest() -> Interest {
        Interest::new(Name::from_uri("/repo/data/f/3").unwrap())
    }

    #[test]
    fn test_state_transitions_up_to_ceiling() {
        let mut policy = RetryPolicy::default();
        assert_eq!(policy.state(), RetryState::Active(0));

        for expected in 1..=MAX_RETRY {
            assert!(policy.on_failure());
            assert_eq!(policy.state(), RetryState::Active(expected));
        }

        assert!(!policy.on_failure());
        assert_eq!(policy.state(), RetryState::Aborted);
        assert_eq!(policy.failures(), MAX_RETRY + 1);

        assert!(!policy.on_failure());
        assert_eq!(policy.failures(), MAX_RETRY + 1);
    }

    #[test]
    fn test_no_retry_aborts_on_first_failure() {
        let mut policy = RetryPolicy::no_retry();
        assert!(!policy.on_failure());
        assert!(policy.is_aborted());
    }

    #[test]
    fn test_handle_outcome_reports_offending_request() {
        let mut policy = RetryPolicy::new(1);

        match policy.handle_outcome(interest(), RequestOutcome::Nack(NackReason::Congestion)) {
            AttemptResult::Reissue(again) => assert_eq!(again.name, interest().name),
            other => panic!("unexpected {:?}", other),
        }

        match policy.handle_outcome(interest(), RequestOutcome::Timeout) {
            AttemptResult::Exhausted(DifsError::RetryExhausted { request, attempts }) => {
                assert_eq!(request, "/repo/data/f/3");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_delivered_data_does_not_touch_budget() {
        let mut policy = RetryPolicy::default();
        let data = Data::new(interest().name, "x");
        assert!(matches!(
            policy.handle_outcome(interest(), RequestOutcome::Data(data)),
            AttemptResult::Delivered(_)
        ));
        assert_eq!(policy.state(), RetryState::Active(0));
    }
}
