//! Core data types for cluster provisioning

use serde::{Deserialize, Serialize};
use std::fmt;

/// Managed policy granting read-only access to S3
pub const S3_READ_ONLY_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AmazonS3ReadOnlyAccess";

/// Path under which the cluster role is created
pub const ROLE_PATH: &str = "/";

/// Description attached to the cluster role
pub const ROLE_DESCRIPTION: &str = "Allows Redshift clusters to call AWS services on your behalf.";

/// Service principal trusted to assume the cluster role
pub const CLUSTER_SERVICE_PRINCIPAL: &str = "redshift.amazonaws.com";

/// Source range opened by the ingress rule
pub const ANYWHERE_CIDR: &str = "0.0.0.0/0";

/// Build the assume-role policy document for the cluster service
pub fn cluster_trust_policy() -> String {
    serde_json::json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": CLUSTER_SERVICE_PRINCIPAL }
        }],
        "Version": "2012-10-17"
    })
    .to_string()
}

/// Credentials and region used to reach the provider
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key id; `None` means the default provider chain
    pub key: Option<String>,
    /// Secret access key
    pub secret: Option<String>,
    pub region: String,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("key", &self.key)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

/// Database created inside the cluster
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub name: String,
    pub user: String,
    pub password: String,
    /// TCP port opened on the cluster security group
    pub port: u16,
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Cluster sizing and identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSettings {
    pub role_name: String,
    pub cluster_type: String,
    pub node_count: u32,
    pub node_type: String,
    pub identifier: String,
}

/// Everything a workflow needs, read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub credentials: AwsCredentials,
    pub database: DatabaseSettings,
    pub cluster: ClusterSettings,
}

impl ClusterConfig {
    /// Build the cluster creation request, attaching the given role
    pub fn cluster_spec(&self, role_arn: &str) -> ClusterSpec {
        ClusterSpec {
            identifier: self.cluster.identifier.clone(),
            cluster_type: self.cluster.cluster_type.clone(),
            node_type: self.cluster.node_type.clone(),
            node_count: self.cluster.node_count,
            db_name: self.database.name.clone(),
            master_username: self.database.user.clone(),
            master_password: self.database.password.clone(),
            iam_role_arns: vec![role_arn.to_string()],
        }
    }
}

/// Values derived by provisioning that downstream consumers need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatch {
    /// Address of the cluster endpoint
    pub endpoint: String,
    /// ARN of the role attached to the cluster
    pub role_arn: String,
}

/// Cluster status as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClusterStatus {
    Creating,
    Available,
    Deleting,
    /// A describe call failed while waiting for creation
    Error,
    /// The cluster no longer exists
    Absent,
    /// Any other provider state (`modifying`, `rebooting`, ...)
    Other(String),
}

impl ClusterStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ClusterStatus::Creating => "creating",
            ClusterStatus::Available => "available",
            ClusterStatus::Deleting => "deleting",
            ClusterStatus::Error => "error",
            ClusterStatus::Absent => "absent",
            ClusterStatus::Other(raw) => raw,
        }
    }
}

impl From<&str> for ClusterStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "creating" => ClusterStatus::Creating,
            "available" => ClusterStatus::Available,
            "deleting" => ClusterStatus::Deleting,
            "error" => ClusterStatus::Error,
            "absent" => ClusterStatus::Absent,
            _ => ClusterStatus::Other(raw.to_string()),
        }
    }
}

impl From<String> for ClusterStatus {
    fn from(raw: String) -> Self {
        ClusterStatus::from(raw.as_str())
    }
}

impl From<ClusterStatus> for String {
    fn from(status: ClusterStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network endpoint of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: Option<u16>,
}

/// Snapshot of a cluster returned by a describe call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescription {
    pub identifier: String,
    pub status: ClusterStatus,
    /// Only present once the cluster is reachable
    pub endpoint: Option<Endpoint>,
    pub vpc_id: Option<String>,
    pub iam_role_arns: Vec<String>,
}

/// Request to launch a cluster
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub identifier: String,
    pub cluster_type: String,
    pub node_type: String,
    pub node_count: u32,
    pub db_name: String,
    pub master_username: String,
    pub master_password: String,
    pub iam_role_arns: Vec<String>,
}

impl fmt::Debug for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSpec")
            .field("identifier", &self.identifier)
            .field("cluster_type", &self.cluster_type)
            .field("node_type", &self.node_type)
            .field("node_count", &self.node_count)
            .field("db_name", &self.db_name)
            .field("master_username", &self.master_username)
            .field("master_password", &"<redacted>")
            .field("iam_role_arns", &self.iam_role_arns)
            .finish()
    }
}

/// IAM role as seen by the workflows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub arn: String,
}

/// Security group inside a VPC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: String,
    pub vpc_id: String,
}

/// Inbound rule opened on a security group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: String,
}

impl IngressRule {
    /// TCP access to a single port from any address
    pub fn tcp_from_anywhere(port: u16) -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port: port,
            to_port: port,
            cidr: ANYWHERE_CIDR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(ClusterStatus::from("creating"), ClusterStatus::Creating);
        assert_eq!(ClusterStatus::from("Available"), ClusterStatus::Available);
        assert_eq!(
            ClusterStatus::from("modifying"),
            ClusterStatus::Other("modifying".to_string())
        );
        assert_eq!(ClusterStatus::Other("modifying".to_string()).to_string(), "modifying");
    }

    #[test]
    fn test_trust_policy_names_cluster_service() {
        let policy: serde_json::Value = serde_json::from_str(&cluster_trust_policy()).unwrap();
        assert_eq!(policy["Version"], "2012-10-17");
        assert_eq!(policy["Statement"][0]["Action"], "sts:AssumeRole");
        assert_eq!(policy["Statement"][0]["Principal"]["Service"], "redshift.amazonaws.com");
    }

    #[test]
    fn test_secrets_are_redacted() {
        let credentials = AwsCredentials {
            key: Some("AKIA".to_string()),
            secret: Some("hunter2".to_string()),
            region: "us-west-2".to_string(),
        };
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("us-west-2"));
    }
}
