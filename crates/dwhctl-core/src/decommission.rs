//! Decommissioning workflow: delete the cluster, then its role

use crate::backend::ControlPlane;
use crate::error::WorkflowError;
use crate::poll::{poll_until_status_leaves, DescribeErrorPolicy, WorkflowOptions};
use crate::progress::Progress;
use crate::types::{ClusterConfig, ClusterStatus, S3_READ_ONLY_POLICY_ARN};
use tracing::info;

/// Result of a decommissioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecommissionOutcome {
    /// Status that ended the wait; `Absent` once the cluster is gone
    pub final_status: ClusterStatus,
    pub describe_calls: u32,
}

/// Delete the cluster named in `config`, wait for it to go away, then remove
/// the role. Every backend failure aborts, except describe errors while
/// waiting, which mean the cluster no longer exists.
pub async fn decommission<B>(
    backend: &mut B,
    config: &ClusterConfig,
    options: &WorkflowOptions,
    progress: &dyn Progress,
) -> Result<DecommissionOutcome, WorkflowError>
where
    B: ControlPlane + ?Sized,
{
    let role_name = config.cluster.role_name.as_str();
    let identifier = config.cluster.identifier.as_str();

    progress.step("2.1", "Deleting the cluster");
    info!(step = "2.1", cluster = %identifier, "deleting cluster");
    backend
        .delete_cluster(identifier, true)
        .await
        .map_err(|source| WorkflowError::DeleteCluster {
            identifier: identifier.to_string(),
            source,
        })?;

    progress.step("2.2", "Waiting for the cluster to disappear");
    info!(step = "2.2", cluster = %identifier, "waiting for cluster deletion");
    progress.waiting(identifier, &ClusterStatus::Deleting);
    let waited = poll_until_status_leaves(
        identifier,
        || backend.describe_cluster(identifier),
        &ClusterStatus::Deleting,
        DescribeErrorPolicy::TreatAsAbsent,
        &options.poll,
        &options.cancel,
    )
    .await;
    progress.settled(identifier, waited.as_ref().ok().map(|o| &o.status));
    let waited = waited?;
    info!(cluster = %identifier, status = %waited.status, "cluster deleted");

    progress.step("2.3", "Removing the IAM role");
    info!(step = "2.3", role = %role_name, "detaching policy and deleting role");
    backend
        .detach_role_policy(role_name, S3_READ_ONLY_POLICY_ARN)
        .await
        .map_err(|source| WorkflowError::DetachPolicy {
            role_name: role_name.to_string(),
            policy_arn: S3_READ_ONLY_POLICY_ARN.to_string(),
            source,
        })?;
    backend
        .delete_role(role_name)
        .await
        .map_err(|source| WorkflowError::DeleteRole {
            role_name: role_name.to_string(),
            source,
        })?;

    Ok(DecommissionOutcome {
        final_status: waited.status,
        describe_calls: waited.describe_calls,
    })
}
