//! Error types shared by the control plane and the workflows

use crate::types::ClusterStatus;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a control plane backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} '{name}' cannot be changed: {reason}")]
    Conflict {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid {operation} request: {reason}")]
    InvalidRequest {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BackendError::AlreadyExists { .. })
    }
}

/// Reasons a status wait stopped without the status settling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("cluster '{identifier}' still '{last_status}' after {waited:?}")]
    TimedOut {
        identifier: String,
        waited: Duration,
        last_status: ClusterStatus,
    },

    #[error("wait for cluster '{identifier}' was cancelled")]
    Cancelled { identifier: String },
}

/// Fatal workflow failures
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to attach policy {policy_arn} to role '{role_name}'")]
    AttachPolicy {
        role_name: String,
        policy_arn: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to resolve ARN of role '{role_name}'")]
    GetRole {
        role_name: String,
        #[source]
        source: BackendError,
    },

    #[error("cluster '{identifier}' has no {property} (last status: {status})")]
    MissingClusterProperty {
        identifier: String,
        property: &'static str,
        status: ClusterStatus,
    },

    #[error("failed to delete cluster '{identifier}'")]
    DeleteCluster {
        identifier: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to detach policy {policy_arn} from role '{role_name}'")]
    DetachPolicy {
        role_name: String,
        policy_arn: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to delete role '{role_name}'")]
    DeleteRole {
        role_name: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Poll(#[from] PollError),
}
