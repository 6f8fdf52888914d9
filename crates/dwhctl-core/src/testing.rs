//! Scripted control plane used by the workflow tests

use crate::backend::ControlPlane;
use crate::error::BackendError;
use crate::poll::{PollPolicy, WorkflowOptions};
use crate::types::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const ROLE_ARN: &str = "arn:aws:iam::123:role/x";

pub fn sample_config() -> ClusterConfig {
    ClusterConfig {
        credentials: AwsCredentials {
            key: Some("AKIAEXAMPLE".to_string()),
            secret: Some("secret".to_string()),
            region: "us-west-2".to_string(),
        },
        database: DatabaseSettings {
            name: "dwh".to_string(),
            user: "dwhuser".to_string(),
            password: "Passw0rd".to_string(),
            port: 5439,
        },
        cluster: ClusterSettings {
            role_name: "dwhRole".to_string(),
            cluster_type: "multi-node".to_string(),
            node_count: 4,
            node_type: "dc2.large".to_string(),
            identifier: "dwhcluster".to_string(),
        },
    }
}

pub fn fast_options() -> WorkflowOptions {
    WorkflowOptions {
        poll: PollPolicy {
            interval: Duration::from_millis(1),
            timeout: None,
        },
        ..Default::default()
    }
}

pub fn cluster(status: &str) -> ClusterDescription {
    ClusterDescription {
        identifier: "dwhcluster".to_string(),
        status: ClusterStatus::from(status),
        endpoint: None,
        vpc_id: Some("vpc-1".to_string()),
        iam_role_arns: Vec::new(),
    }
}

pub fn creating_cluster() -> ClusterDescription {
    cluster("creating")
}

pub fn available_cluster() -> ClusterDescription {
    ClusterDescription {
        endpoint: Some(Endpoint {
            address: "db.example.com".to_string(),
            port: Some(5439),
        }),
        iam_role_arns: vec![ROLE_ARN.to_string()],
        ..cluster("available")
    }
}

/// Control plane stub replaying scripted describe replies.
///
/// Once the script runs out, describe fails with `NotFound` unless
/// `repeat_last` is set.
pub struct ScriptedControlPlane {
    describe_script: Mutex<VecDeque<Result<ClusterDescription, BackendError>>>,
    last_reply: Mutex<Option<Result<ClusterDescription, BackendError>>>,
    pub repeat_last: bool,
    pub fail_create_role: Option<BackendError>,
    pub fail_attach: Option<BackendError>,
    pub fail_get_role: Option<BackendError>,
    pub fail_create_cluster: Option<BackendError>,
    pub fail_ingress: Option<BackendError>,
    pub fail_delete_cluster: Option<BackendError>,
    pub fail_detach: Option<BackendError>,
    pub fail_delete_role: Option<BackendError>,
    pub security_groups: Vec<SecurityGroup>,
    calls: Mutex<Vec<&'static str>>,
    cluster_requests: Vec<ClusterSpec>,
    ingress: Vec<(String, IngressRule)>,
}

impl ScriptedControlPlane {
    pub fn new(describe_script: Vec<Result<ClusterDescription, BackendError>>) -> Self {
        Self {
            describe_script: Mutex::new(describe_script.into()),
            last_reply: Mutex::new(None),
            repeat_last: false,
            fail_create_role: None,
            fail_attach: None,
            fail_get_role: None,
            fail_create_cluster: None,
            fail_ingress: None,
            fail_delete_cluster: None,
            fail_detach: None,
            fail_delete_role: None,
            security_groups: vec![
                SecurityGroup {
                    group_id: "sg-web".to_string(),
                    group_name: "web".to_string(),
                    vpc_id: "vpc-1".to_string(),
                },
                SecurityGroup {
                    group_id: "sg-default".to_string(),
                    group_name: "default".to_string(),
                    vpc_id: "vpc-1".to_string(),
                },
            ],
            calls: Mutex::new(Vec::new()),
            cluster_requests: Vec::new(),
            ingress: Vec::new(),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cluster_requests(&self) -> &[ClusterSpec] {
        &self.cluster_requests
    }

    pub fn ingress(&self) -> &[(String, IngressRule)] {
        &self.ingress
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn outcome(failure: &Option<BackendError>) -> Result<(), BackendError> {
        match failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn create_role(
        &mut self,
        name: &str,
        _trust_policy: &str,
        _description: &str,
    ) -> Result<Role, BackendError> {
        self.record("create_role");
        Self::outcome(&self.fail_create_role)?;
        Ok(Role {
            name: name.to_string(),
            arn: ROLE_ARN.to_string(),
        })
    }

    async fn attach_role_policy(&mut self, _role_name: &str, _policy_arn: &str) -> Result<(), BackendError> {
        self.record("attach_role_policy");
        Self::outcome(&self.fail_attach)
    }

    async fn get_role(&self, name: &str) -> Result<Role, BackendError> {
        self.record("get_role");
        Self::outcome(&self.fail_get_role)?;
        Ok(Role {
            name: name.to_string(),
            arn: ROLE_ARN.to_string(),
        })
    }

    async fn create_cluster(&mut self, spec: &ClusterSpec) -> Result<ClusterDescription, BackendError> {
        self.record("create_cluster");
        self.cluster_requests.push(spec.clone());
        Self::outcome(&self.fail_create_cluster)?;
        Ok(creating_cluster())
    }

    async fn describe_cluster(&self, identifier: &str) -> Result<ClusterDescription, BackendError> {
        self.record("describe_cluster");
        let next = self.describe_script.lock().unwrap().pop_front();
        let mut last = self.last_reply.lock().unwrap();
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => match (self.repeat_last, last.as_ref()) {
                (true, Some(reply)) => reply.clone(),
                _ => Err(BackendError::NotFound {
                    kind: "cluster",
                    name: identifier.to_string(),
                }),
            },
        }
    }

    async fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<SecurityGroup>, BackendError> {
        self.record("list_security_groups");
        Ok(self
            .security_groups
            .iter()
            .filter(|g| g.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    async fn authorize_ingress(
        &mut self,
        group: &SecurityGroup,
        rule: &IngressRule,
    ) -> Result<(), BackendError> {
        self.record("authorize_ingress");
        Self::outcome(&self.fail_ingress)?;
        self.ingress.push((group.group_id.clone(), rule.clone()));
        Ok(())
    }

    async fn delete_cluster(&mut self, _identifier: &str, _skip_final_snapshot: bool) -> Result<(), BackendError> {
        self.record("delete_cluster");
        Self::outcome(&self.fail_delete_cluster)
    }

    async fn detach_role_policy(&mut self, _role_name: &str, _policy_arn: &str) -> Result<(), BackendError> {
        self.record("detach_role_policy");
        Self::outcome(&self.fail_detach)
    }

    async fn delete_role(&mut self, _name: &str) -> Result<(), BackendError> {
        self.record("delete_role");
        Self::outcome(&self.fail_delete_role)
    }
}
