//! # AWS Backend
//!
//! Real IAM, Redshift and EC2 implementation of the control plane.

use anyhow::{bail, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::Filter;
use aws_sdk_iam::config::Credentials;
use aws_sdk_iam::error::{DisplayErrorContext, SdkError};
use dwhctl_core::*;
use tracing::debug;

/// Source name reported for credentials read from the cluster config
const CONFIG_CREDENTIALS_SOURCE: &str = "dwhctl-config";

/// AWS backend implementation
pub struct AwsBackend {
    iam: aws_sdk_iam::Client,
    redshift: aws_sdk_redshift::Client,
    ec2: aws_sdk_ec2::Client,
    region: String,
}

impl AwsBackend {
    /// Create AWS clients for `region`.
    ///
    /// Static credentials are used when both `key` and `secret` are given,
    /// the default provider chain otherwise.
    pub async fn with_config(
        region: String,
        key: Option<String>,
        secret: Option<String>,
        endpoint: Option<String>,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));

        match (key, secret) {
            (Some(key), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(
                    key,
                    secret,
                    None,
                    None,
                    CONFIG_CREDENTIALS_SOURCE,
                ));
            }
            (None, None) => debug!("using default AWS credential chain"),
            _ => bail!("KEY and SECRET must be set together"),
        }

        // Custom endpoint (for LocalStack testing)
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;

        Ok(Self {
            iam: aws_sdk_iam::Client::new(&shared),
            redshift: aws_sdk_redshift::Client::new(&shared),
            ec2: aws_sdk_ec2::Client::new(&shared),
            region,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl ControlPlane for AwsBackend {
    async fn create_role(
        &mut self,
        name: &str,
        trust_policy: &str,
        description: &str,
    ) -> Result<Role, BackendError> {
        let output = self
            .iam
            .create_role()
            .role_name(name)
            .path(ROLE_PATH)
            .description(description)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_entity_already_exists_exception() => BackendError::AlreadyExists {
                    kind: "role",
                    name: name.to_string(),
                },
                Some(e) if e.is_malformed_policy_document_exception() => BackendError::InvalidRequest {
                    operation: "CreateRole",
                    reason: error_message(&err),
                },
                _ => service_error("CreateRole", &err),
            })?;

        output.role().map(convert_role).ok_or_else(|| BackendError::Service {
            operation: "CreateRole",
            message: "response did not include the role".to_string(),
        })
    }

    async fn attach_role_policy(&mut self, role_name: &str, policy_arn: &str) -> Result<(), BackendError> {
        self.iam
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_no_such_entity_exception() => BackendError::NotFound {
                    kind: "role or policy",
                    name: format!("{} / {}", role_name, policy_arn),
                },
                _ => service_error("AttachRolePolicy", &err),
            })?;
        Ok(())
    }

    async fn get_role(&self, name: &str) -> Result<Role, BackendError> {
        let output = self
            .iam
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_no_such_entity_exception() => BackendError::NotFound {
                    kind: "role",
                    name: name.to_string(),
                },
                _ => service_error("GetRole", &err),
            })?;

        output.role().map(convert_role).ok_or_else(|| BackendError::NotFound {
            kind: "role",
            name: name.to_string(),
        })
    }

    async fn create_cluster(&mut self, spec: &ClusterSpec) -> Result<ClusterDescription, BackendError> {
        let node_count = i32::try_from(spec.node_count).map_err(|_| BackendError::InvalidRequest {
            operation: "CreateCluster",
            reason: format!("node count {} out of range", spec.node_count),
        })?;

        let output = self
            .redshift
            .create_cluster()
            .cluster_identifier(&spec.identifier)
            .cluster_type(&spec.cluster_type)
            .node_type(&spec.node_type)
            .number_of_nodes(node_count)
            .db_name(&spec.db_name)
            .master_username(&spec.master_username)
            .master_user_password(&spec.master_password)
            .set_iam_roles(Some(spec.iam_role_arns.clone()))
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_cluster_already_exists_fault() => BackendError::AlreadyExists {
                    kind: "cluster",
                    name: spec.identifier.clone(),
                },
                Some(e) if e.is_invalid_cluster_subnet_group_state_fault() => BackendError::InvalidRequest {
                    operation: "CreateCluster",
                    reason: error_message(&err),
                },
                _ => service_error("CreateCluster", &err),
            })?;

        Ok(match output.cluster() {
            Some(cluster) => convert_cluster(cluster, &spec.identifier),
            None => ClusterDescription {
                identifier: spec.identifier.clone(),
                status: ClusterStatus::Creating,
                endpoint: None,
                vpc_id: None,
                iam_role_arns: spec.iam_role_arns.clone(),
            },
        })
    }

    async fn describe_cluster(&self, identifier: &str) -> Result<ClusterDescription, BackendError> {
        let not_found = || BackendError::NotFound {
            kind: "cluster",
            name: identifier.to_string(),
        };

        let output = self
            .redshift
            .describe_clusters()
            .cluster_identifier(identifier)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_cluster_not_found_fault() => not_found(),
                _ => service_error("DescribeClusters", &err),
            })?;

        output
            .clusters()
            .first()
            .map(|cluster| convert_cluster(cluster, identifier))
            .ok_or_else(not_found)
    }

    async fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<SecurityGroup>, BackendError> {
        let output = self
            .ec2
            .describe_security_groups()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .map_err(|err| service_error("DescribeSecurityGroups", &err))?;

        Ok(output
            .security_groups()
            .iter()
            .filter_map(convert_security_group)
            .collect())
    }

    async fn authorize_ingress(
        &mut self,
        group: &SecurityGroup,
        rule: &IngressRule,
    ) -> Result<(), BackendError> {
        self.ec2
            .authorize_security_group_ingress()
            .group_id(&group.group_id)
            .ip_protocol(&rule.protocol)
            .cidr_ip(&rule.cidr)
            .from_port(i32::from(rule.from_port))
            .to_port(i32::from(rule.to_port))
            .send()
            .await
            .map_err(|err| match err.code() {
                Some("InvalidPermission.Duplicate") => BackendError::AlreadyExists {
                    kind: "ingress rule",
                    name: format!("{} {}:{} from {}", group.group_id, rule.protocol, rule.from_port, rule.cidr),
                },
                Some("InvalidGroup.NotFound") => BackendError::NotFound {
                    kind: "security group",
                    name: group.group_id.clone(),
                },
                _ => service_error("AuthorizeSecurityGroupIngress", &err),
            })?;
        Ok(())
    }

    async fn delete_cluster(&mut self, identifier: &str, skip_final_snapshot: bool) -> Result<(), BackendError> {
        self.redshift
            .delete_cluster()
            .cluster_identifier(identifier)
            .skip_final_cluster_snapshot(skip_final_snapshot)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_cluster_not_found_fault() => BackendError::NotFound {
                    kind: "cluster",
                    name: identifier.to_string(),
                },
                Some(e) if e.is_invalid_cluster_state_fault() => BackendError::Conflict {
                    kind: "cluster",
                    name: identifier.to_string(),
                    reason: error_message(&err),
                },
                _ => service_error("DeleteCluster", &err),
            })?;
        Ok(())
    }

    async fn detach_role_policy(&mut self, role_name: &str, policy_arn: &str) -> Result<(), BackendError> {
        self.iam
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_no_such_entity_exception() => BackendError::NotFound {
                    kind: "attached policy",
                    name: format!("{} / {}", role_name, policy_arn),
                },
                _ => service_error("DetachRolePolicy", &err),
            })?;
        Ok(())
    }

    async fn delete_role(&mut self, name: &str) -> Result<(), BackendError> {
        self.iam
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_no_such_entity_exception() => BackendError::NotFound {
                    kind: "role",
                    name: name.to_string(),
                },
                Some(e) if e.is_delete_conflict_exception() => BackendError::Conflict {
                    kind: "role",
                    name: name.to_string(),
                    reason: error_message(&err),
                },
                _ => service_error("DeleteRole", &err),
            })?;
        Ok(())
    }
}

// Helper functions for converting AWS SDK types into ours

fn error_message<E, R>(err: &SdkError<E, R>) -> String
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    DisplayErrorContext(err).to_string()
}

fn service_error<E, R>(operation: &'static str, err: &SdkError<E, R>) -> BackendError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    BackendError::Service {
        operation,
        message: error_message(err),
    }
}

fn convert_role(role: &aws_sdk_iam::types::Role) -> Role {
    Role {
        name: role.role_name().to_string(),
        arn: role.arn().to_string(),
    }
}

fn convert_cluster(cluster: &aws_sdk_redshift::types::Cluster, requested: &str) -> ClusterDescription {
    let endpoint = cluster.endpoint().and_then(|endpoint| {
        endpoint.address().map(|address| Endpoint {
            address: address.to_string(),
            port: endpoint.port().and_then(|port| u16::try_from(port).ok()),
        })
    });

    ClusterDescription {
        identifier: cluster
            .cluster_identifier()
            .unwrap_or(requested)
            .to_string(),
        status: ClusterStatus::from(cluster.cluster_status().unwrap_or_default()),
        endpoint,
        vpc_id: cluster.vpc_id().map(str::to_string),
        iam_role_arns: cluster
            .iam_roles()
            .iter()
            .filter_map(|role| role.iam_role_arn())
            .map(str::to_string)
            .collect(),
    }
}

fn convert_security_group(group: &aws_sdk_ec2::types::SecurityGroup) -> Option<SecurityGroup> {
    Some(SecurityGroup {
        group_id: group.group_id()?.to_string(),
        group_name: group.group_name().unwrap_or_default().to_string(),
        vpc_id: group.vpc_id().unwrap_or_default().to_string(),
    })
}

// Export the main constructor
pub async fn create_aws_backend(
    region: String,
    key: Option<String>,
    secret: Option<String>,
    endpoint: Option<String>,
) -> Result<AwsBackend> {
    AwsBackend::with_config(region, key, secret, endpoint).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_redshift::types::{Cluster, ClusterIamRole, Endpoint as RedshiftEndpoint};

    #[test]
    fn test_convert_available_cluster() {
        let cluster = Cluster::builder()
            .cluster_identifier("dwhcluster")
            .cluster_status("available")
            .endpoint(
                RedshiftEndpoint::builder()
                    .address("dwhcluster.abc.us-west-2.redshift.amazonaws.com")
                    .port(5439)
                    .build(),
            )
            .vpc_id("vpc-1")
            .iam_roles(
                ClusterIamRole::builder()
                    .iam_role_arn("arn:aws:iam::123:role/dwhRole")
                    .apply_status("in-sync")
                    .build(),
            )
            .build();

        let described = convert_cluster(&cluster, "dwhCluster");
        assert_eq!(described.identifier, "dwhcluster");
        assert_eq!(described.status, ClusterStatus::Available);
        assert_eq!(described.vpc_id.as_deref(), Some("vpc-1"));
        assert_eq!(described.iam_role_arns, vec!["arn:aws:iam::123:role/dwhRole"]);
        let endpoint = described.endpoint.unwrap();
        assert_eq!(endpoint.address, "dwhcluster.abc.us-west-2.redshift.amazonaws.com");
        assert_eq!(endpoint.port, Some(5439));
    }

    #[test]
    fn test_convert_creating_cluster() {
        let cluster = Cluster::builder().cluster_status("creating").build();

        let described = convert_cluster(&cluster, "dwhCluster");
        assert_eq!(described.identifier, "dwhCluster");
        assert_eq!(described.status, ClusterStatus::Creating);
        assert!(described.endpoint.is_none());
        assert!(described.iam_role_arns.is_empty());
    }

    #[test]
    fn test_convert_security_group() {
        let group = aws_sdk_ec2::types::SecurityGroup::builder()
            .group_id("sg-123")
            .group_name("default")
            .vpc_id("vpc-1")
            .build();
        let converted = convert_security_group(&group).unwrap();
        assert_eq!(converted.group_id, "sg-123");
        assert_eq!(converted.group_name, "default");

        let anonymous = aws_sdk_ec2::types::SecurityGroup::builder().group_name("x").build();
        assert!(convert_security_group(&anonymous).is_none());
    }

    #[tokio::test]
    async fn test_partial_credentials_are_rejected() {
        let result = AwsBackend::with_config(
            "us-west-2".to_string(),
            Some("AKIAEXAMPLE".to_string()),
            None,
            None,
        )
        .await;
        assert!(result.is_err());
    }
}
