//! Waiting for a cluster to leave a transitional status

use crate::error::{BackendError, PollError};
use crate::types::{ClusterDescription, ClusterStatus};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default delay between describe calls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// How often and for how long to poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between describe calls
    pub interval: Duration,
    /// Give up after this long (`None` waits forever)
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl PollPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What a failing describe call means to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeErrorPolicy {
    /// Stop waiting and report [`ClusterStatus::Error`]
    EnterErrorState,
    /// The cluster is gone; stop waiting and report [`ClusterStatus::Absent`]
    TreatAsAbsent,
}

/// Result of a finished wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Status that ended the wait
    pub status: ClusterStatus,
    /// Last successful description, possibly stale
    pub last_seen: Option<ClusterDescription>,
    pub describe_calls: u32,
}

/// Settings shared by both workflows
#[derive(Debug, Clone, Default)]
pub struct WorkflowOptions {
    pub poll: PollPolicy,
    /// Aborts any wait in progress
    pub cancel: CancellationToken,
}

/// Describe the cluster until its status differs from `in_progress`.
///
/// Every call to `describe` counts, including the one that observes the
/// settled status. Timeouts and cancellation are errors; a failing describe
/// call is resolved through `on_error` and ends the wait normally.
pub async fn poll_until_status_leaves<F, Fut>(
    identifier: &str,
    mut describe: F,
    in_progress: &ClusterStatus,
    on_error: DescribeErrorPolicy,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<PollOutcome, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ClusterDescription, BackendError>>,
{
    let started = Instant::now();
    let mut last_seen: Option<ClusterDescription> = None;
    let mut describe_calls = 0u32;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(identifier)),
            result = describe() => result,
        };
        describe_calls += 1;

        let status = match result {
            Ok(description) => {
                let status = description.status.clone();
                last_seen = Some(description);
                status
            }
            Err(e) => {
                let status = match on_error {
                    DescribeErrorPolicy::EnterErrorState => {
                        warn!(cluster = %identifier, error = %e, "describe failed while waiting");
                        ClusterStatus::Error
                    }
                    DescribeErrorPolicy::TreatAsAbsent => {
                        info!(cluster = %identifier, reason = %e, "cluster is gone");
                        ClusterStatus::Absent
                    }
                };
                return Ok(PollOutcome {
                    status,
                    last_seen,
                    describe_calls,
                });
            }
        };

        debug!(cluster = %identifier, status = %status, attempt = describe_calls, "polled cluster status");

        if status != *in_progress {
            return Ok(PollOutcome {
                status,
                last_seen,
                describe_calls,
            });
        }

        if let Some(timeout) = policy.timeout {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(PollError::TimedOut {
                    identifier: identifier.to_string(),
                    waited,
                    last_status: status,
                });
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(identifier)),
            _ = sleep(policy.interval) => {}
        }
    }
}

fn cancelled(identifier: &str) -> PollError {
    PollError::Cancelled {
        identifier: identifier.to_string(),
    }
}
