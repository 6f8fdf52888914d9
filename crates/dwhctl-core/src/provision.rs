//! Provisioning workflow: role, policy, cluster, ingress, derived config

use crate::backend::ControlPlane;
use crate::error::{BackendError, WorkflowError};
use crate::poll::{poll_until_status_leaves, DescribeErrorPolicy, WorkflowOptions};
use crate::progress::Progress;
use crate::types::*;
use tracing::{info, warn};

/// Steps whose failures are logged and skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    CreateRole,
    CreateCluster,
    AuthorizeIngress,
}

/// A swallowed step failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepWarning {
    pub step: ProvisionStep,
    pub error: BackendError,
}

/// Result of a provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Values to write back into the configuration
    pub patch: ConfigPatch,
    /// Status that ended the wait for the cluster
    pub final_status: ClusterStatus,
    pub describe_calls: u32,
    pub warnings: Vec<StepWarning>,
}

impl ProvisionOutcome {
    /// True when the cluster was seen `available`
    pub fn is_available(&self) -> bool {
        self.final_status == ClusterStatus::Available
    }

    pub fn warning_for(&self, step: ProvisionStep) -> Option<&StepWarning> {
        self.warnings.iter().find(|w| w.step == step)
    }
}

/// Create the role and cluster described by `config` and open its port.
///
/// Role creation, cluster creation and ingress authorization are best effort:
/// their failures end up in [`ProvisionOutcome::warnings`]. Everything else
/// aborts the run.
pub async fn provision<B>(
    backend: &mut B,
    config: &ClusterConfig,
    options: &WorkflowOptions,
    progress: &dyn Progress,
) -> Result<ProvisionOutcome, WorkflowError>
where
    B: ControlPlane + ?Sized,
{
    let role_name = config.cluster.role_name.as_str();
    let identifier = config.cluster.identifier.as_str();
    let mut warnings = Vec::new();

    announce(progress, "1.1", "Creating a new IAM role");
    match backend
        .create_role(role_name, &cluster_trust_policy(), ROLE_DESCRIPTION)
        .await
    {
        Ok(role) => info!(role = %role.name, arn = %role.arn, "created IAM role"),
        Err(e) => {
            warn!(role = %role_name, error = %e, "could not create IAM role, continuing");
            warnings.push(StepWarning {
                step: ProvisionStep::CreateRole,
                error: e,
            });
        }
    }

    announce(progress, "1.2", "Attaching policy");
    backend
        .attach_role_policy(role_name, S3_READ_ONLY_POLICY_ARN)
        .await
        .map_err(|source| WorkflowError::AttachPolicy {
            role_name: role_name.to_string(),
            policy_arn: S3_READ_ONLY_POLICY_ARN.to_string(),
            source,
        })?;

    announce(progress, "1.3", "Getting the IAM role ARN");
    let role = backend
        .get_role(role_name)
        .await
        .map_err(|source| WorkflowError::GetRole {
            role_name: role_name.to_string(),
            source,
        })?;

    announce(progress, "1.4", "Creating the cluster");
    match backend.create_cluster(&config.cluster_spec(&role.arn)).await {
        Ok(cluster) => info!(cluster = %cluster.identifier, status = %cluster.status, "cluster requested"),
        Err(e) => {
            warn!(cluster = %identifier, error = %e, "could not create cluster, continuing");
            warnings.push(StepWarning {
                step: ProvisionStep::CreateCluster,
                error: e,
            });
        }
    }

    announce(progress, "1.5", "Waiting for the cluster to become available");
    progress.waiting(identifier, &ClusterStatus::Creating);
    let waited = poll_until_status_leaves(
        identifier,
        || backend.describe_cluster(identifier),
        &ClusterStatus::Creating,
        DescribeErrorPolicy::EnterErrorState,
        &options.poll,
        &options.cancel,
    )
    .await;
    progress.settled(identifier, waited.as_ref().ok().map(|o| &o.status));
    let waited = waited?;

    if waited.status != ClusterStatus::Available {
        warn!(cluster = %identifier, status = %waited.status, "cluster did not become available, reading last known properties");
    }

    announce(progress, "1.6", "Resolving endpoint");
    let described = waited.last_seen.as_ref();
    let endpoint = described
        .and_then(|d| d.endpoint.as_ref())
        .map(|e| e.address.clone())
        .filter(|address| !address.is_empty())
        .ok_or_else(|| missing(identifier, "endpoint address", &waited.status))?;
    let role_arn = described
        .and_then(|d| d.iam_role_arns.first())
        .cloned()
        .ok_or_else(|| missing(identifier, "IAM role", &waited.status))?;
    info!(endpoint = %endpoint, role_arn = %role_arn, "resolved cluster endpoint");

    announce(progress, "1.7", "Creating inbound rule for the cluster");
    let vpc_id = described.and_then(|d| d.vpc_id.as_deref());
    match open_ingress(backend, identifier, vpc_id, config.database.port).await {
        Ok(group) => info!(group = %group.group_id, port = config.database.port, "opened ingress"),
        Err(e) => {
            warn!(cluster = %identifier, error = %e, "could not open ingress, continuing");
            warnings.push(StepWarning {
                step: ProvisionStep::AuthorizeIngress,
                error: e,
            });
        }
    }

    announce(progress, "1.8", "Recording endpoint and role ARN");
    Ok(ProvisionOutcome {
        patch: ConfigPatch { endpoint, role_arn },
        final_status: waited.status,
        describe_calls: waited.describe_calls,
        warnings,
    })
}

fn announce(progress: &dyn Progress, number: &str, description: &str) {
    info!(step = number, "{}", description);
    progress.step(number, description);
}

fn missing(identifier: &str, property: &'static str, status: &ClusterStatus) -> WorkflowError {
    WorkflowError::MissingClusterProperty {
        identifier: identifier.to_string(),
        property,
        status: status.clone(),
    }
}

async fn open_ingress<B>(
    backend: &mut B,
    identifier: &str,
    vpc_id: Option<&str>,
    port: u16,
) -> Result<SecurityGroup, BackendError>
where
    B: ControlPlane + ?Sized,
{
    let vpc_id = vpc_id.ok_or_else(|| BackendError::NotFound {
        kind: "VPC of cluster",
        name: identifier.to_string(),
    })?;

    let groups = backend.list_security_groups(vpc_id).await?;
    let group = default_group(groups).ok_or_else(|| BackendError::NotFound {
        kind: "security group in VPC",
        name: vpc_id.to_string(),
    })?;

    backend
        .authorize_ingress(&group, &IngressRule::tcp_from_anywhere(port))
        .await?;
    Ok(group)
}

/// The group named `default`, else the first one listed
fn default_group(groups: Vec<SecurityGroup>) -> Option<SecurityGroup> {
    let index = groups
        .iter()
        .position(|g| g.group_name == "default")
        .unwrap_or(0);
    groups.into_iter().nth(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PollError;
    use crate::poll::PollPolicy;
    use crate::progress::NoProgress;
    use crate::testing::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_end_to_end_with_available_cluster() {
        let mut backend = ScriptedControlPlane::new(vec![Ok(available_cluster())]);

        let outcome = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.patch.endpoint, "db.example.com");
        assert_eq!(outcome.patch.role_arn, "arn:aws:iam::123:role/x");
        assert!(outcome.is_available());
        assert!(outcome.warnings.is_empty());

        let ingress = backend.ingress();
        assert_eq!(ingress.len(), 1);
        assert_eq!(ingress[0].0, "sg-default");
        assert_eq!(ingress[0].1, IngressRule::tcp_from_anywhere(5439));
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let mut backend = ScriptedControlPlane::new(vec![
            Ok(creating_cluster()),
            Ok(available_cluster()),
        ]);

        provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap();

        assert_eq!(
            backend.calls(),
            vec![
                "create_role",
                "attach_role_policy",
                "get_role",
                "create_cluster",
                "describe_cluster",
                "describe_cluster",
                "list_security_groups",
                "authorize_ingress",
            ]
        );
    }

    #[tokio::test]
    async fn test_cluster_request_carries_role_arn() {
        let mut backend = ScriptedControlPlane::new(vec![Ok(available_cluster())]);

        provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap();

        let specs = backend.cluster_requests();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].identifier, "dwhcluster");
        assert_eq!(specs[0].node_count, 4);
        assert_eq!(specs[0].iam_role_arns, vec!["arn:aws:iam::123:role/x".to_string()]);
    }

    #[tokio::test]
    async fn test_existing_role_does_not_abort() {
        let mut backend = ScriptedControlPlane::new(vec![Ok(available_cluster())]);
        backend.fail_create_role = Some(BackendError::AlreadyExists {
            kind: "role",
            name: "dwhRole".to_string(),
        });

        let outcome = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap();

        let warning = outcome.warning_for(ProvisionStep::CreateRole).unwrap();
        assert!(warning.error.is_already_exists());
        assert_eq!(outcome.patch.endpoint, "db.example.com");
    }

    #[tokio::test]
    async fn test_attach_failure_stops_before_cluster_creation() {
        let mut backend = ScriptedControlPlane::new(vec![Ok(available_cluster())]);
        backend.fail_attach = Some(BackendError::Service {
            operation: "AttachRolePolicy",
            message: "access denied".to_string(),
        });

        let err = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::AttachPolicy { .. }));
        assert!(!backend.calls().contains(&"create_cluster"));
    }

    #[tokio::test]
    async fn test_missing_role_is_fatal() {
        let mut backend = ScriptedControlPlane::new(vec![Ok(available_cluster())]);
        backend.fail_get_role = Some(BackendError::NotFound {
            kind: "role",
            name: "dwhRole".to_string(),
        });

        let err = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::GetRole { .. }));
    }

    #[tokio::test]
    async fn test_failed_cluster_request_still_reads_existing_cluster() {
        let mut backend = ScriptedControlPlane::new(vec![Ok(available_cluster())]);
        backend.fail_create_cluster = Some(BackendError::AlreadyExists {
            kind: "cluster",
            name: "dwhcluster".to_string(),
        });

        let outcome = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap();

        assert!(outcome.warning_for(ProvisionStep::CreateCluster).is_some());
        assert_eq!(outcome.patch.endpoint, "db.example.com");
    }

    #[tokio::test]
    async fn test_describe_error_reads_stale_properties() {
        let mut backend = ScriptedControlPlane::new(vec![Err(BackendError::Service {
            operation: "DescribeClusters",
            message: "boom".to_string(),
        })]);

        let err = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap_err();

        match err {
            WorkflowError::MissingClusterProperty { status, property, .. } => {
                assert_eq!(status, ClusterStatus::Error);
                assert_eq!(property, "endpoint address");
            }
            other => panic!("Expected missing property, got {:?}", other),
        }
        assert_eq!(
            backend.calls().iter().filter(|c| **c == "describe_cluster").count(),
            1
        );
        assert!(backend.ingress().is_empty());
    }

    #[tokio::test]
    async fn test_error_after_stale_available_view_still_patches() {
        let mut stale = creating_cluster();
        stale.endpoint = available_cluster().endpoint;
        stale.iam_role_arns = available_cluster().iam_role_arns;
        let mut backend = ScriptedControlPlane::new(vec![Ok(stale)]);

        let outcome = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.final_status, ClusterStatus::Error);
        assert!(!outcome.is_available());
        assert_eq!(outcome.patch.endpoint, "db.example.com");
    }

    #[tokio::test]
    async fn test_ingress_failure_is_swallowed() {
        let mut backend = ScriptedControlPlane::new(vec![Ok(available_cluster())]);
        backend.fail_ingress = Some(BackendError::AlreadyExists {
            kind: "ingress rule",
            name: "sg-default".to_string(),
        });

        let outcome = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap();

        assert!(outcome.warning_for(ProvisionStep::AuthorizeIngress).is_some());
        assert_eq!(outcome.patch.role_arn, "arn:aws:iam::123:role/x");
    }

    #[tokio::test]
    async fn test_missing_vpc_skips_ingress() {
        let mut cluster = available_cluster();
        cluster.vpc_id = None;
        let mut backend = ScriptedControlPlane::new(vec![Ok(cluster)]);

        let outcome = provision(&mut backend, &sample_config(), &fast_options(), &NoProgress)
            .await
            .unwrap();

        let warning = outcome.warning_for(ProvisionStep::AuthorizeIngress).unwrap();
        assert!(warning.error.is_not_found());
        assert!(!backend.calls().contains(&"list_security_groups"));
    }

    #[tokio::test]
    async fn test_timeout_aborts() {
        let mut backend = ScriptedControlPlane::new(vec![Ok(creating_cluster())]);
        backend.repeat_last = true;
        let options = WorkflowOptions {
            poll: PollPolicy {
                interval: Duration::from_millis(2),
                timeout: Some(Duration::from_millis(10)),
            },
            ..Default::default()
        };

        let err = provision(&mut backend, &sample_config(), &options, &NoProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Poll(PollError::TimedOut { .. })));
        assert!(backend.ingress().is_empty());
    }

    #[test]
    fn test_default_group_preference() {
        let group = |id: &str, name: &str| SecurityGroup {
            group_id: id.to_string(),
            group_name: name.to_string(),
            vpc_id: "vpc-1".to_string(),
        };

        let picked = default_group(vec![group("sg-1", "web"), group("sg-2", "default")]);
        assert_eq!(picked.unwrap().group_id, "sg-2");

        let picked = default_group(vec![group("sg-1", "web")]);
        assert_eq!(picked.unwrap().group_id, "sg-1");

        assert!(default_group(Vec::new()).is_none());
    }
}
