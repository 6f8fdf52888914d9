//! Control plane trait for the cloud provider

use crate::error::BackendError;
use crate::types::*;
use async_trait::async_trait;

/// Operations the workflows need from the cloud provider.
/// This allows us to swap between the local emulator and real AWS.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create a role trusted by the given assume-role policy document
    async fn create_role(
        &mut self,
        name: &str,
        trust_policy: &str,
        description: &str,
    ) -> Result<Role, BackendError>;

    /// Attach a managed policy to a role
    async fn attach_role_policy(&mut self, role_name: &str, policy_arn: &str) -> Result<(), BackendError>;

    /// Look up a role by name
    async fn get_role(&self, name: &str) -> Result<Role, BackendError>;

    /// Request a new cluster
    async fn create_cluster(&mut self, spec: &ClusterSpec) -> Result<ClusterDescription, BackendError>;

    /// Describe a cluster; errors once the cluster no longer exists
    async fn describe_cluster(&self, identifier: &str) -> Result<ClusterDescription, BackendError>;

    /// List the security groups of a VPC
    async fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<SecurityGroup>, BackendError>;

    /// Open an inbound rule on a security group
    async fn authorize_ingress(
        &mut self,
        group: &SecurityGroup,
        rule: &IngressRule,
    ) -> Result<(), BackendError>;

    /// Request cluster deletion
    async fn delete_cluster(&mut self, identifier: &str, skip_final_snapshot: bool) -> Result<(), BackendError>;

    /// Detach a managed policy from a role
    async fn detach_role_policy(&mut self, role_name: &str, policy_arn: &str) -> Result<(), BackendError>;

    /// Delete a role; fails while policies are still attached
    async fn delete_role(&mut self, name: &str) -> Result<(), BackendError>;
}

/// Configuration for backend implementations
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Local emulator (no AWS required)
    Emulator {
        /// Optional file to persist state between runs
        state_file: Option<String>,
        region: String,
    },
    /// Real AWS
    Aws {
        region: String,
        /// Static credentials; the default provider chain is used when absent
        key: Option<String>,
        secret: Option<String>,
        /// Custom endpoint (for LocalStack testing)
        endpoint: Option<String>,
    },
}

impl BackendConfig {
    /// AWS backend using the credentials from the cluster config
    pub fn aws(credentials: &AwsCredentials, endpoint: Option<String>) -> Self {
        BackendConfig::Aws {
            region: credentials.region.clone(),
            key: credentials.key.clone(),
            secret: credentials.secret.clone(),
            endpoint,
        }
    }
}
