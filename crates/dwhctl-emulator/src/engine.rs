//! Cluster lifecycle engine for the emulator

use crate::{EmulatedCluster, EmulatorState};
use dwhctl_core::*;

/// Default port of an emulated cluster endpoint
pub const DEFAULT_CLUSTER_PORT: u16 = 5439;

/// Advances transitional cluster states as they are observed
#[derive(Debug, Clone)]
pub struct LifecycleEngine {
    /// Describe calls a transitional state survives
    settle_after: u32,
}

impl LifecycleEngine {
    pub fn new(settle_after: u32) -> Self {
        Self { settle_after }
    }

    pub fn settle_after(&self) -> u32 {
        self.settle_after
    }

    /// Describe a cluster, moving it along its lifecycle.
    ///
    /// `creating` turns `available` and `deleting` clusters vanish once they
    /// have been observed `settle_after` times.
    pub fn observe(
        &self,
        state: &mut EmulatorState,
        identifier: &str,
    ) -> Result<ClusterDescription, BackendError> {
        let key = cluster_key(identifier);
        let not_found = || BackendError::NotFound {
            kind: "cluster",
            name: identifier.to_string(),
        };

        let cluster = state.clusters.get_mut(&key).ok_or_else(not_found)?;
        let transitional = matches!(cluster.status, ClusterStatus::Creating | ClusterStatus::Deleting);

        if transitional && cluster.pending_polls > 0 {
            cluster.pending_polls -= 1;
        } else if cluster.status == ClusterStatus::Creating {
            cluster.status = ClusterStatus::Available;
        } else if cluster.status == ClusterStatus::Deleting {
            state.clusters.remove(&key);
            return Err(not_found());
        }

        let cluster = state.clusters.get(&key).ok_or_else(not_found)?;
        Ok(describe(cluster, &state.region))
    }

    /// Put a new cluster into `creating`
    pub fn launch(&self, cluster: &mut EmulatedCluster) {
        cluster.status = ClusterStatus::Creating;
        cluster.pending_polls = self.settle_after;
    }

    /// Put a cluster into `deleting`
    pub fn retire(&self, cluster: &mut EmulatedCluster) {
        cluster.status = ClusterStatus::Deleting;
        cluster.pending_polls = self.settle_after;
    }
}

impl Default for LifecycleEngine {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Clusters are keyed by lower-cased identifier, like the real service
pub fn cluster_key(identifier: &str) -> String {
    identifier.to_ascii_lowercase()
}

/// Snapshot of a cluster as the provider would report it
pub fn describe(cluster: &EmulatedCluster, region: &str) -> ClusterDescription {
    let endpoint = (cluster.status == ClusterStatus::Available).then(|| Endpoint {
        address: format!(
            "{}.emulated.{}.redshift.amazonaws.com",
            cluster.identifier, region
        ),
        port: Some(DEFAULT_CLUSTER_PORT),
    });

    ClusterDescription {
        identifier: cluster.identifier.clone(),
        status: cluster.status.clone(),
        endpoint,
        vpc_id: Some(cluster.vpc_id.clone()),
        iam_role_arns: cluster.iam_role_arns.clone(),
    }
}
