//! Progress notifications emitted by the workflows

use crate::types::ClusterStatus;

/// Observer for workflow progress.
/// Rendering is left to the implementation; polling never waits on it.
pub trait Progress: Send + Sync {
    /// A numbered workflow step is starting
    fn step(&self, _number: &str, _description: &str) {}

    /// A wait on the cluster status has begun
    fn waiting(&self, _identifier: &str, _status: &ClusterStatus) {}

    /// The wait ended, successfully or not
    fn settled(&self, _identifier: &str, _status: Option<&ClusterStatus>) {}
}

/// Discards all notifications
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {}
