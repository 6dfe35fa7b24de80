//! The `RunInstances` provider handler: the only handler with no
//! standalone provider resource. Acquire is a direct `RunInstances` call;
//! the reservation id becomes the request's resource id; release terminates
//! instances directly.

use std::sync::Arc;

use async_trait::async_trait;
use hostbroker_cloud::{AwsClient, ParamBuilder};
use hostbroker_domain::{
    DomainError, InstanceId, ProviderApi, Request, ResourceId, ResourceMappingHint, Template,
};
use hostbroker_resilience::RetryStrategy;
use tracing::info;

use crate::describe;
use crate::error::ProviderError;
use crate::handler::{AcquireOutcome, MachineObservation, ProviderHandler, ReleaseGroupResult, ReleaseOutcome};
use crate::instance_adapter::{parse_describe_instances, DescribedInstance};
use crate::resilient::ResilienceContext;

pub struct RunInstancesHandler {
    client: Arc<AwsClient>,
    resilience: ResilienceContext,
}

impl RunInstancesHandler {
    pub fn new(client: Arc<AwsClient>, resilience: ResilienceContext) -> Self {
        RunInstancesHandler { client, resilience }
    }
}

fn to_observation(d: &DescribedInstance) -> MachineObservation {
    MachineObservation {
        instance_id: InstanceId::new(d.instance_id.clone()),
        instance_type: d.instance_type.clone(),
        image_id: d.image_id.clone(),
        status: d.state,
        private_ip: d.private_ip.clone(),
        public_ip: d.public_ip.clone(),
        launch_time: d
            .launch_time
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc)),
    }
}

#[async_trait]
impl ProviderHandler for RunInstancesHandler {
    fn provider_api(&self) -> ProviderApi {
        ProviderApi::RunInstances
    }

    async fn acquire(&self, request: &Request, template: &Template) -> Result<AcquireOutcome, ProviderError> {
        template.validate()?;

        let mut params = ParamBuilder::new();
        params.set("ImageId", &template.image_id);
        params.set("InstanceType", &template.instance_type);
        params.set("MinCount", request.requested_count.to_string());
        params.set("MaxCount", request.requested_count.to_string());
        let subnet = template
            .subnet_ids
            .first()
            .ok_or_else(|| DomainError::Validation("template has no subnets".into()))?;
        params.set("SubnetId", subnet.clone());
        params.list("SecurityGroupId", template.security_group_ids.iter().cloned());
        params.set_opt("KeyName", template.key_pair.clone());
        params.set_opt("IamInstanceProfile.Name", template.iam_instance_profile.clone());
        params.set_opt(
            "UserData",
            template.user_data.as_ref().map(|d| {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(d.as_bytes())
            }),
        );
        for (i, (key, value)) in template.tags.iter().enumerate() {
            let idx = i + 1;
            params.set(format!("TagSpecification.1.Tag.{idx}.Key"), key.clone());
            params.set(format!("TagSpecification.1.Tag.{idx}.Value"), value.clone());
        }
        if !template.tags.is_empty() {
            params.set("TagSpecification.1.ResourceType", "instance");
        }

        let pairs = params.as_pairs();
        let client = self.client.clone();
        let body = self
            .resilience
            .call(RetryStrategy::Critical, "ec2", "run_instances", || {
                let client = client.clone();
                let pairs = pairs.clone();
                async move { query_ec2(&client, "RunInstances", &pairs).await }
            })
            .await?;

        let reservation_id = hostbroker_cloud::xml::text(&body, "reservationId");
        let instances = parse_describe_instances(&body);
        let instance_ids: Vec<InstanceId> =
            instances.iter().map(|i| InstanceId::new(i.instance_id.clone())).collect();

        let resource_ids = match reservation_id {
            Some(rid) => vec![ResourceId::new(rid)],
            None => instance_ids.iter().map(|id| ResourceId::new(id.as_str())).collect(),
        };

        info!(request_id = %request.request_id, count = instances.len(), "run_instances acquired");
        let provider_data =
            serde_json::json!({"reservation_id": resource_ids.first().map(|r| r.to_string())});

        Ok(AcquireOutcome::ok(
            resource_ids,
            instances.iter().map(to_observation).collect(),
            provider_data,
        ))
    }

    async fn poll_status(&self, request: &Request) -> Result<Vec<MachineObservation>, ProviderError> {
        let described = describe::describe_instances(&self.client, &self.resilience, &request.instance_ids).await?;
        Ok(described.iter().map(to_observation).collect())
    }

    async fn release(
        &self,
        instance_ids: &[InstanceId],
        _resource_mapping: &[ResourceMappingHint],
    ) -> Result<ReleaseOutcome, ProviderError> {
        if instance_ids.is_empty() {
            return Ok(ReleaseOutcome::default());
        }
        let mut params = ParamBuilder::new();
        params.list("InstanceId", instance_ids.iter().map(|i| i.as_str().to_string()));
        let pairs = params.as_pairs();
        let client = self.client.clone();
        let result = self
            .resilience
            .call(RetryStrategy::Critical, "ec2", "terminate_instances", || {
                let client = client.clone();
                let pairs = pairs.clone();
                async move { query_ec2(&client, "TerminateInstances", &pairs).await }
            })
            .await;

        let group = match result {
            Ok(_) => ReleaseGroupResult {
                resource_id: None,
                instance_ids: instance_ids.to_vec(),
                success: true,
                error: None,
            },
            Err(err) => ReleaseGroupResult {
                resource_id: None,
                instance_ids: instance_ids.to_vec(),
                success: false,
                error: Some(err.to_string()),
            },
        };
        Ok(ReleaseOutcome { groups: vec![group] })
    }
}

async fn query_ec2(client: &AwsClient, action: &str, params: &[(&str, &str)]) -> Result<String, DomainError> {
    client.ec2_query(action, params).await.map_err(|e| match e {
        hostbroker_cloud::CloudError::Domain(d) => d,
        other => DomainError::Infra(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hostbroker_cloud::{AwsClientConfig, TestCredentials};
    use hostbroker_domain::{FleetType, PricingConfig, ProviderApi as Api, RequestType, TemplateId};
    use hostbroker_resilience::CircuitBreakerRegistry;
    use std::collections::HashMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn handler(server: &MockServer) -> RunInstancesHandler {
        let client = Arc::new(AwsClient::with_test_config(
            "us-east-1",
            server.uri(),
            server.uri(),
            TestCredentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            },
        ));
        let resilience = ResilienceContext::new(Arc::new(CircuitBreakerRegistry::new(Default::default())));
        RunInstancesHandler::new(client, resilience)
    }

    fn template() -> Template {
        Template {
            template_id: TemplateId::new("tpl-1"),
            image_id: "ami-123".into(),
            instance_type: "m5.large".into(),
            weighted_instance_types: Vec::new(),
            subnet_ids: vec!["subnet-1".into()],
            security_group_ids: vec!["sg-1".into()],
            provider_api: ProviderApi::RunInstances,
            fleet_type: None,
            launch_template: None,
            price_type: None,
            pricing: PricingConfig::default(),
            fleet_role_arn: None,
            iam_instance_profile: None,
            key_pair: None,
            user_data: None,
            tags: HashMap::new(),
            block_devices: Vec::new(),
            schema_version: 1,
        }
    }

    #[tokio::test]
    async fn acquire_returns_instances_from_reservation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<RunInstancesResponse><reservationId>r-1</reservationId><instancesSet><item>\
                 <instanceId>i-0123456789abcdef0</instanceId><instanceType>m5.large</instanceType>\
                 <instanceState><name>pending</name></instanceState></item></instancesSet>\
                 </RunInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let h = handler(&server);
        let request = Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 1, Api::RunInstances, Utc::now()).unwrap();
        let outcome = h.acquire(&request, &template()).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.resource_ids.len(), 1);
        assert_eq!(outcome.instances.len(), 1);
    }

    #[tokio::test]
    async fn acquire_rejects_template_with_no_subnets() {
        let server = MockServer::start().await;
        let h = handler(&server);
        let mut t = template();
        t.subnet_ids.clear();
        let request = Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 1, Api::RunInstances, Utc::now()).unwrap();
        assert!(h.acquire(&request, &t).await.is_err());
    }

    #[tokio::test]
    async fn release_with_no_instances_is_a_noop() {
        let server = MockServer::start().await;
        let h = handler(&server);
        let outcome = h.release(&[], &[]).await.unwrap();
        assert!(outcome.groups.is_empty());
    }

    #[tokio::test]
    async fn release_terminates_instances() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<TerminateInstancesResponse><requestId>r-1</requestId></TerminateInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let h = handler(&server);
        let ids = vec![InstanceId::new("i-0123456789abcdef0")];
        let outcome = h.release(&ids, &[]).await.unwrap();
        assert!(outcome.overall_success());
        assert_eq!(outcome.groups[0].instance_ids, ids);
    }

    #[tokio::test]
    async fn release_reports_failure_on_cloud_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "<Response><Errors><Error><Code>InvalidParameterValue</Code><Message>bad instance id</Message></Error></Errors></Response>",
            ))
            .mount(&server)
            .await;

        let h = handler(&server);
        let ids = vec![InstanceId::new("i-0123456789abcdef0")];
        let outcome = h.release(&ids, &[]).await.unwrap();
        assert!(!outcome.overall_success());
    }
}
