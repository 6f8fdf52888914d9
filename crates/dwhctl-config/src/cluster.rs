//! Typed view of the cluster configuration

use crate::{ConfigDocument, ConfigError};
use dwhctl_core::{AwsCredentials, ClusterConfig, ClusterSettings, ConfigPatch, DatabaseSettings};
use std::str::FromStr;

pub const AWS_SECTION: &str = "AWS";
pub const DWH_SECTION: &str = "DWH";
pub const CLUSTER_SECTION: &str = "CLUSTER";

/// Written back by provisioning
pub const ENDPOINT_KEY: &str = "DWH_ENDPOINT";
/// Written back by provisioning
pub const ROLE_ARN_KEY: &str = "DWH_ROLE_ARN";

/// Read every setting the workflows need
pub fn cluster_config(doc: &ConfigDocument) -> Result<ClusterConfig, ConfigError> {
    Ok(ClusterConfig {
        credentials: AwsCredentials {
            key: optional(doc, AWS_SECTION, "KEY"),
            secret: optional(doc, AWS_SECTION, "SECRET"),
            region: required(doc, AWS_SECTION, "REGION")?,
        },
        database: DatabaseSettings {
            name: required(doc, DWH_SECTION, "DWH_DB")?,
            user: required(doc, DWH_SECTION, "DWH_DB_USER")?,
            password: required(doc, DWH_SECTION, "DWH_DB_PASSWORD")?,
            port: number(doc, DWH_SECTION, "DWH_PORT")?,
        },
        cluster: ClusterSettings {
            role_name: required(doc, CLUSTER_SECTION, "DWH_IAM_ROLE_NAME")?,
            cluster_type: required(doc, CLUSTER_SECTION, "DWH_CLUSTER_TYPE")?,
            node_count: number(doc, CLUSTER_SECTION, "DWH_NUM_NODES")?,
            node_type: required(doc, CLUSTER_SECTION, "DWH_NODE_TYPE")?,
            identifier: required(doc, CLUSTER_SECTION, "DWH_CLUSTER_IDENTIFIER")?,
        },
    })
}

/// Record the endpoint and role ARN derived by provisioning
pub fn apply_patch(doc: &mut ConfigDocument, patch: &ConfigPatch) {
    doc.set(CLUSTER_SECTION, ROLE_ARN_KEY, &patch.role_arn);
    doc.set(DWH_SECTION, ENDPOINT_KEY, &patch.endpoint);
}

fn required(doc: &ConfigDocument, section: &str, key: &str) -> Result<String, ConfigError> {
    doc.get(section, key)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
}

/// Absent and blank values both read as `None`
fn optional(doc: &ConfigDocument, section: &str, key: &str) -> Option<String> {
    doc.get(section, key)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn number<T: FromStr>(doc: &ConfigDocument, section: &str, key: &str) -> Result<T, ConfigError> {
    let raw = required(doc, section, key)?;
    raw.parse().map_err(|_| ConfigError::InvalidNumber {
        section: section.to_string(),
        key: key.to_string(),
        value: raw.clone(),
    })
}
