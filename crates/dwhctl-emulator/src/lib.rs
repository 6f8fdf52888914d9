//! # Cluster Emulator
//!
//! In-memory implementation of the IAM, Redshift and EC2 calls the
//! workflows make. Lets the whole provisioning cycle run locally, with the
//! state optionally persisted to a JSON file between runs.

use async_trait::async_trait;
use dwhctl_core::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub mod engine;
pub mod storage;

pub use engine::{LifecycleEngine, DEFAULT_CLUSTER_PORT};
pub use storage::{FileStorage, StateExporter};

/// Account every emulated ARN lives in
pub const EMULATED_ACCOUNT_ID: &str = "123456789012";
/// VPC new clusters are placed in
pub const DEFAULT_VPC_ID: &str = "vpc-0emulated";
/// Security group every emulated VPC starts with
pub const DEFAULT_SECURITY_GROUP_ID: &str = "sg-0emulated";

/// An IAM role known to the emulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatedRole {
    pub name: String,
    pub arn: String,
    pub path: String,
    pub description: String,
    pub trust_policy: serde_json::Value,
    pub attached_policies: BTreeSet<String>,
}

/// A cluster and where it is in its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatedCluster {
    pub identifier: String,
    pub cluster_type: String,
    pub node_type: String,
    pub node_count: u32,
    pub db_name: String,
    pub master_username: String,
    pub iam_role_arns: Vec<String>,
    pub vpc_id: String,
    pub status: ClusterStatus,
    /// Describe calls left before the current transition completes
    pub pending_polls: u32,
}

/// A security group and the inbound rules opened on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatedSecurityGroup {
    pub group: SecurityGroup,
    pub ingress: Vec<IngressRule>,
}

/// Complete state of the emulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorState {
    pub region: String,
    /// role name -> role
    pub roles: BTreeMap<String, EmulatedRole>,
    /// lower-cased identifier -> cluster
    pub clusters: BTreeMap<String, EmulatedCluster>,
    pub security_groups: Vec<EmulatedSecurityGroup>,
}

impl EmulatorState {
    /// Fresh state with the default VPC and its security group
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            roles: BTreeMap::new(),
            clusters: BTreeMap::new(),
            security_groups: vec![EmulatedSecurityGroup {
                group: SecurityGroup {
                    group_id: DEFAULT_SECURITY_GROUP_ID.to_string(),
                    group_name: "default".to_string(),
                    vpc_id: DEFAULT_VPC_ID.to_string(),
                },
                ingress: Vec::new(),
            }],
        }
    }

    fn role_by_arn(&self, arn: &str) -> Option<&EmulatedRole> {
        self.roles.values().find(|role| role.arn == arn)
    }
}

/// Emulated control plane
pub struct EmulatorBackend {
    state: Mutex<EmulatorState>,
    storage: Option<FileStorage>,
    engine: LifecycleEngine,
}

impl EmulatorBackend {
    /// Create a new emulator backend, resuming from `state_file` if it exists
    pub async fn new(state_file: Option<String>, region: &str) -> anyhow::Result<Self> {
        let storage = state_file.map(FileStorage::new);

        let state = match &storage {
            Some(storage) => match storage.load().await? {
                Some(state) => {
                    info!(path = %storage.path(), clusters = state.clusters.len(), "resumed emulator state");
                    state
                }
                None => EmulatorState::new(region),
            },
            None => EmulatorState::new(region),
        };

        Ok(Self {
            state: Mutex::new(state),
            storage,
            engine: LifecycleEngine::default(),
        })
    }

    /// Number of describe calls a cluster stays `creating` or `deleting`
    pub fn with_settle_after(mut self, polls: u32) -> Self {
        self.engine = LifecycleEngine::new(polls);
        self
    }

    /// Snapshot of the current state (for inspection and tests)
    pub fn state(&self) -> EmulatorState {
        self.lock().clone()
    }

    /// Human-readable summary of the current state
    pub fn summary(&self) -> String {
        StateExporter::to_summary(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn persist(&self) -> Result<(), BackendError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let snapshot = self.state();
        storage
            .save(&snapshot)
            .await
            .map_err(|e| BackendError::Service {
                operation: "SaveEmulatorState",
                message: format!("{:#}", e),
            })?;
        debug!(path = %storage.path(), "saved emulator state");
        Ok(())
    }

    fn role_arn(name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", EMULATED_ACCOUNT_ID, name)
    }
}

fn role_not_found(name: &str) -> BackendError {
    BackendError::NotFound {
        kind: "role",
        name: name.to_string(),
    }
}

fn validate_cluster_spec(state: &EmulatorState, spec: &ClusterSpec) -> Result<(), BackendError> {
    let invalid = |reason: String| BackendError::InvalidRequest {
        operation: "CreateCluster",
        reason,
    };

    match spec.cluster_type.as_str() {
        "single-node" => {}
        "multi-node" if spec.node_count >= 2 => {}
        "multi-node" => {
            return Err(invalid(format!(
                "multi-node clusters need at least 2 nodes, got {}",
                spec.node_count
            )))
        }
        other => return Err(invalid(format!("unknown cluster type '{}'", other))),
    }

    if let Some(arn) = spec
        .iam_role_arns
        .iter()
        .find(|arn| state.role_by_arn(arn).is_none())
    {
        return Err(invalid(format!("role {} does not exist", arn)));
    }

    Ok(())
}

#[async_trait]
impl ControlPlane for EmulatorBackend {
    async fn create_role(
        &mut self,
        name: &str,
        trust_policy: &str,
        description: &str,
    ) -> Result<Role, BackendError> {
        let trust_policy: serde_json::Value =
            serde_json::from_str(trust_policy).map_err(|e| BackendError::InvalidRequest {
                operation: "CreateRole",
                reason: format!("malformed trust policy: {}", e),
            })?;

        let role = {
            let mut state = self.lock();
            if state.roles.contains_key(name) {
                return Err(BackendError::AlreadyExists {
                    kind: "role",
                    name: name.to_string(),
                });
            }

            let role = EmulatedRole {
                name: name.to_string(),
                arn: Self::role_arn(name),
                path: ROLE_PATH.to_string(),
                description: description.to_string(),
                trust_policy,
                attached_policies: BTreeSet::new(),
            };
            state.roles.insert(name.to_string(), role.clone());
            role
        };

        self.persist().await?;
        info!(role = %role.name, arn = %role.arn, "created role");
        Ok(Role {
            name: role.name,
            arn: role.arn,
        })
    }

    async fn attach_role_policy(&mut self, role_name: &str, policy_arn: &str) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            let role = state
                .roles
                .get_mut(role_name)
                .ok_or_else(|| role_not_found(role_name))?;
            role.attached_policies.insert(policy_arn.to_string());
        }

        self.persist().await?;
        debug!(role = role_name, policy = policy_arn, "attached policy");
        Ok(())
    }

    async fn get_role(&self, name: &str) -> Result<Role, BackendError> {
        let state = self.lock();
        state
            .roles
            .get(name)
            .map(|role| Role {
                name: role.name.clone(),
                arn: role.arn.clone(),
            })
            .ok_or_else(|| role_not_found(name))
    }

    async fn create_cluster(&mut self, spec: &ClusterSpec) -> Result<ClusterDescription, BackendError> {
        let description = {
            let mut state = self.lock();
            let key = engine::cluster_key(&spec.identifier);
            if state.clusters.contains_key(&key) {
                return Err(BackendError::AlreadyExists {
                    kind: "cluster",
                    name: spec.identifier.clone(),
                });
            }
            validate_cluster_spec(&state, spec)?;

            let mut cluster = EmulatedCluster {
                identifier: key.clone(),
                cluster_type: spec.cluster_type.clone(),
                node_type: spec.node_type.clone(),
                node_count: spec.node_count,
                db_name: spec.db_name.clone(),
                master_username: spec.master_username.clone(),
                iam_role_arns: spec.iam_role_arns.clone(),
                vpc_id: DEFAULT_VPC_ID.to_string(),
                status: ClusterStatus::Creating,
                pending_polls: 0,
            };
            self.engine.launch(&mut cluster);
            let description = engine::describe(&cluster, &state.region);
            state.clusters.insert(key, cluster);
            description
        };

        self.persist().await?;
        info!(cluster = %description.identifier, "cluster creation requested");
        Ok(description)
    }

    async fn describe_cluster(&self, identifier: &str) -> Result<ClusterDescription, BackendError> {
        let observed = {
            let mut state = self.lock();
            self.engine.observe(&mut state, identifier)
        };

        // Observation may advance or remove the cluster
        self.persist().await?;
        observed
    }

    async fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<SecurityGroup>, BackendError> {
        let state = self.lock();
        Ok(state
            .security_groups
            .iter()
            .filter(|sg| sg.group.vpc_id == vpc_id)
            .map(|sg| sg.group.clone())
            .collect())
    }

    async fn authorize_ingress(
        &mut self,
        group: &SecurityGroup,
        rule: &IngressRule,
    ) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            let target = state
                .security_groups
                .iter_mut()
                .find(|sg| sg.group.group_id == group.group_id)
                .ok_or_else(|| BackendError::NotFound {
                    kind: "security group",
                    name: group.group_id.clone(),
                })?;

            if target.ingress.contains(rule) {
                return Err(BackendError::AlreadyExists {
                    kind: "ingress rule",
                    name: format!(
                        "{} {}:{}-{} from {}",
                        group.group_id, rule.protocol, rule.from_port, rule.to_port, rule.cidr
                    ),
                });
            }
            target.ingress.push(rule.clone());
        }

        self.persist().await?;
        info!(group = %group.group_id, port = rule.from_port, cidr = %rule.cidr, "opened ingress");
        Ok(())
    }

    async fn delete_cluster(&mut self, identifier: &str, skip_final_snapshot: bool) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            let cluster = state
                .clusters
                .get_mut(&engine::cluster_key(identifier))
                .ok_or_else(|| BackendError::NotFound {
                    kind: "cluster",
                    name: identifier.to_string(),
                })?;

            if cluster.status == ClusterStatus::Deleting {
                return Err(BackendError::Conflict {
                    kind: "cluster",
                    name: identifier.to_string(),
                    reason: "deletion already in progress".to_string(),
                });
            }
            self.engine.retire(cluster);
        }

        self.persist().await?;
        info!(cluster = identifier, skip_final_snapshot, "cluster deletion requested");
        Ok(())
    }

    async fn detach_role_policy(&mut self, role_name: &str, policy_arn: &str) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            let role = state
                .roles
                .get_mut(role_name)
                .ok_or_else(|| role_not_found(role_name))?;

            if !role.attached_policies.remove(policy_arn) {
                return Err(BackendError::NotFound {
                    kind: "attached policy",
                    name: policy_arn.to_string(),
                });
            }
        }

        self.persist().await?;
        debug!(role = role_name, policy = policy_arn, "detached policy");
        Ok(())
    }

    async fn delete_role(&mut self, name: &str) -> Result<(), BackendError> {
        {
            let mut state = self.lock();
            let role = state.roles.get(name).ok_or_else(|| role_not_found(name))?;

            if !role.attached_policies.is_empty() {
                return Err(BackendError::Conflict {
                    kind: "role",
                    name: name.to_string(),
                    reason: format!("{} policies still attached", role.attached_policies.len()),
                });
            }
            state.roles.remove(name);
        }

        self.persist().await?;
        info!(role = name, "deleted role");
        Ok(())
    }
}
