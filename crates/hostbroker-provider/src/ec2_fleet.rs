//! The `EC2Fleet` provider handler.

use std::sync::Arc;

use async_trait::async_trait;
use hostbroker_cloud::{AwsClient, ParamBuilder};
use hostbroker_domain::{
    DomainError, FleetCapacitySnapshot, FleetType, InstanceId, PriceType, ProviderApi, Request, ResourceId,
    ResourceMappingHint, Template,
};
use hostbroker_resilience::RetryStrategy;
use tracing::{info, warn};

use crate::describe;
use crate::error::ProviderError;
use crate::handler::{AcquireOutcome, MachineObservation, ProviderHandler, ReleaseGroupResult, ReleaseOutcome};
use crate::launch_template::LaunchTemplateManager;
use crate::release::{attribute_by_tags, group_by_mapping, merge};
use crate::resilient::ResilienceContext;

pub struct Ec2FleetHandler {
    client: Arc<AwsClient>,
    resilience: ResilienceContext,
    launch_templates: Arc<LaunchTemplateManager>,
}

impl Ec2FleetHandler {
    pub fn new(
        client: Arc<AwsClient>,
        resilience: ResilienceContext,
        launch_templates: Arc<LaunchTemplateManager>,
    ) -> Self {
        Ec2FleetHandler { client, resilience, launch_templates }
    }

    async fn ec2(&self, strategy: RetryStrategy, action: &str, operation: &str, params: Vec<(String, String)>) -> Result<String, ProviderError> {
        let client = self.client.clone();
        self.resilience
            .call(strategy, "ec2", operation, move || {
                let client = client.clone();
                let params = params.clone();
                async move {
                    let pairs: Vec<(&str, &str)> =
                        params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                    client.ec2_query(action, &pairs).await.map_err(to_domain)
                }
            })
            .await
    }

    fn build_overrides(&self, template: &Template, params: &mut ParamBuilder) {
        let types: Vec<(String, f64)> = if template.weighted_instance_types.is_empty() {
            vec![(template.instance_type.clone(), 1.0)]
        } else {
            template
                .weighted_instance_types
                .iter()
                .map(|w| (w.instance_type.clone(), w.weight))
                .collect()
        };
        let mut idx = 0usize;
        for subnet in &template.subnet_ids {
            for (instance_type, weight) in &types {
                idx += 1;
                params.set(
                    format!("LaunchTemplateConfigs.1.Overrides.{idx}.SubnetId"),
                    subnet.clone(),
                );
                params.set(
                    format!("LaunchTemplateConfigs.1.Overrides.{idx}.InstanceType"),
                    instance_type.clone(),
                );
                params.set(
                    format!("LaunchTemplateConfigs.1.Overrides.{idx}.WeightedCapacity"),
                    weight.to_string(),
                );
            }
        }
    }
}

#[async_trait]
impl ProviderHandler for Ec2FleetHandler {
    fn provider_api(&self) -> ProviderApi {
        ProviderApi::Ec2Fleet
    }

    async fn acquire(&self, request: &Request, template: &Template) -> Result<AcquireOutcome, ProviderError> {
        template.validate()?;
        let fleet_type = template
            .fleet_type
            .ok_or_else(|| DomainError::Validation("EC2Fleet template missing fleet_type".into()))?;

        let lt = self.launch_templates.resolve(template, request).await?;

        let mut params = ParamBuilder::new();
        params.set("Type", fleet_type.as_aws_str());
        params.set("LaunchTemplateConfigs.1.LaunchTemplateSpecification.LaunchTemplateId", lt.launch_template_id.clone());
        params.set(
            "LaunchTemplateConfigs.1.LaunchTemplateSpecification.Version",
            lt.version.clone().unwrap_or_else(|| "$Latest".to_string()),
        );
        self.build_overrides(template, &mut params);
        params.set("TargetCapacitySpecification.TotalTargetCapacity", request.requested_count.to_string());

        match template.price_type.unwrap_or(PriceType::Ondemand) {
            PriceType::Ondemand => {
                params.set("TargetCapacitySpecification.DefaultTargetCapacityType", "on-demand");
            }
            PriceType::Spot => {
                params.set("TargetCapacitySpecification.DefaultTargetCapacityType", "spot");
                params.set_opt("SpotOptions.AllocationStrategy", template.pricing.allocation_strategy.clone());
                params.set_opt("SpotOptions.MaxTotalPrice", template.pricing.max_price.map(|p| p.to_string()));
            }
            PriceType::Heterogeneous => {
                let percent = template.pricing.percent_on_demand.unwrap_or(0);
                let on_demand = request.requested_count * percent / 100;
                let spot = request.requested_count - on_demand;
                params.set("TargetCapacitySpecification.OnDemandTargetCapacity", on_demand.to_string());
                params.set("TargetCapacitySpecification.SpotTargetCapacity", spot.to_string());
                params.set_opt("SpotOptions.AllocationStrategy", template.pricing.allocation_strategy.clone());
            }
        }

        if fleet_type == FleetType::Maintain {
            params.set("ReplaceUnhealthyInstances", "true");
            params.set("ExcessCapacityTerminationPolicy", "termination");
        }

        let pairs: Vec<(String, String)> = params.as_pairs().into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let body = self.ec2(RetryStrategy::Critical, "CreateFleet", "create_fleet", pairs).await?;

        let fleet_id = hostbroker_cloud::xml::text(&body, "fleetId")
            .ok_or_else(|| DomainError::Infra("CreateFleet response missing fleetId".into()))?;

        let instance_ids: Vec<String> = hostbroker_cloud::xml::all_texts(&body, "instanceId");
        let error_codes = hostbroker_cloud::xml::all_texts(&body, "errorCode");
        let error_messages = hostbroker_cloud::xml::all_texts(&body, "errorMessage");
        let fleet_errors: Vec<String> = error_codes
            .iter()
            .zip(error_messages.iter())
            .map(|(c, m)| format!("{c}: {m}"))
            .collect();

        if !matches!(fleet_type, FleetType::Instant) {
            // Neither `request` nor `maintain` fleet types support launch-time
            // tag specs on the fleet resource itself; tag the fleet id directly.
            if !template.tags.is_empty() {
                let mut tag_params = ParamBuilder::new();
                tag_params.set("ResourceId.1", fleet_id.clone());
                for (i, (k, v)) in template.tags.iter().enumerate() {
                    let idx = i + 1;
                    tag_params.set(format!("Tag.{idx}.Key"), k.clone());
                    tag_params.set(format!("Tag.{idx}.Value"), v.clone());
                }
                let tag_pairs: Vec<(String, String)> =
                    tag_params.as_pairs().into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
                if let Err(e) = self.ec2(RetryStrategy::Standard, "CreateTags", "create_tags", tag_pairs).await {
                    warn!(fleet_id, error = %e, "post-creation fleet tagging failed");
                }
            }
        }

        info!(request_id = %request.request_id, fleet_id, fleet_type = fleet_type.as_aws_str(), "ec2 fleet created");

        let provider_data = serde_json::json!({
            "fleet_id": fleet_id,
            "fleet_type": fleet_type.as_aws_str(),
            "instant_instance_ids": instance_ids,
        });

        if !fleet_errors.is_empty() && instance_ids.is_empty() && matches!(fleet_type, FleetType::Instant) {
            return Ok(AcquireOutcome {
                success: false,
                resource_ids: vec![ResourceId::new(fleet_id)],
                instances: Vec::new(),
                provider_data,
                error_message: Some(fleet_errors.join("; ")),
                fleet_errors,
            });
        }

        Ok(AcquireOutcome {
            success: true,
            resource_ids: vec![ResourceId::new(fleet_id)],
            instances: Vec::new(),
            provider_data,
            error_message: if fleet_errors.is_empty() { None } else { Some(fleet_errors.join("; ")) },
            fleet_errors,
        })
    }

    async fn poll_status(&self, request: &Request) -> Result<Vec<MachineObservation>, ProviderError> {
        let Some(fleet_id) = request.resource_ids.first() else {
            return Ok(Vec::new());
        };
        let is_instant = request
            .metadata
            .get("fleet_type")
            .and_then(|v| v.as_str())
            .map(|s| s == "instant")
            .unwrap_or(false);

        let ids: Vec<InstanceId> = if is_instant {
            request
                .metadata
                .get("instant_instance_ids")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(InstanceId::new).collect())
                .unwrap_or_default()
        } else {
            let pages = self
                .client
                .ec2_query_paginated("DescribeFleetInstances", &[("FleetId", fleet_id.as_str())])
                .await
                .map_err(|e| ProviderError::Domain(to_domain(e)))?;
            pages
                .iter()
                .flat_map(|p| hostbroker_cloud::xml::all_texts(p, "instanceId"))
                .map(InstanceId::new)
                .collect()
        };

        let described = describe::describe_instances(&self.client, &self.resilience, &ids).await?;
        Ok(described
            .iter()
            .map(|d| MachineObservation {
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
            })
            .collect())
    }

    async fn fleet_capacity(&self, request: &Request) -> Result<Option<FleetCapacitySnapshot>, ProviderError> {
        let Some(fleet_id) = request.resource_ids.first() else {
            return Ok(None);
        };
        let body = self
            .ec2(
                RetryStrategy::ReadOnly,
                "DescribeFleets",
                "describe_fleets",
                vec![("FleetId.1".to_string(), fleet_id.as_str().to_string())],
            )
            .await?;
        let target = hostbroker_cloud::xml::text(&body, "totalTargetCapacity").and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
        let fulfilled = hostbroker_cloud::xml::text(&body, "fulfilledCapacity")
            .and_then(|s| s.parse::<f64>().ok())
            .map(|f| f as u32)
            .unwrap_or(0);
        Ok(Some(FleetCapacitySnapshot { resource_id: fleet_id.clone(), target_capacity: target, fulfilled_capacity: fulfilled }))
    }

    async fn release(
        &self,
        instance_ids: &[InstanceId],
        resource_mapping: &[ResourceMappingHint],
    ) -> Result<ReleaseOutcome, ProviderError> {
        if instance_ids.is_empty() {
            return Ok(ReleaseOutcome::default());
        }

        let mut grouped = group_by_mapping(instance_ids, resource_mapping);
        if !grouped.needs_lookup.is_empty() {
            let described = describe::describe_instances(&self.client, &self.resilience, &grouped.needs_lookup).await?;
            let lookup = attribute_by_tags(&grouped.needs_lookup, &described, &["aws:ec2:fleet-id"]);
            merge(&mut grouped, lookup);
        }

        let mut groups = Vec::new();

        for (fleet_id, ids) in grouped.by_resource {
            let group_result = self.release_one_fleet(&fleet_id, &ids).await;
            groups.push(group_result);
        }

        if !grouped.no_fleet.is_empty() {
            let result = self
                .ec2(
                    RetryStrategy::Critical,
                    "TerminateInstances",
                    "terminate_instances",
                    instance_id_params(&grouped.no_fleet),
                )
                .await;
            groups.push(ReleaseGroupResult {
                resource_id: None,
                instance_ids: grouped.no_fleet,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }

        Ok(ReleaseOutcome { groups })
    }
}

impl Ec2FleetHandler {
    async fn release_one_fleet(&self, fleet_id: &ResourceId, ids: &[InstanceId]) -> ReleaseGroupResult {
        let describe_result = self
            .ec2(
                RetryStrategy::ReadOnly,
                "DescribeFleets",
                "describe_fleets",
                vec![("FleetId.1".to_string(), fleet_id.as_str().to_string())],
            )
            .await;

        let (fleet_type, current_total) = match &describe_result {
            Ok(body) => (
                hostbroker_cloud::xml::text(body, "type").unwrap_or_else(|| "maintain".to_string()),
                hostbroker_cloud::xml::text(body, "totalTargetCapacity")
                    .and_then(|s| s.parse::<u32>().ok())
                    .unwrap_or(ids.len() as u32),
            ),
            Err(_) => ("maintain".to_string(), ids.len() as u32),
        };

        if fleet_type == "maintain" {
            let new_target = current_total.saturating_sub(ids.len() as u32);
            let modify_result = self
                .ec2(
                    RetryStrategy::Critical,
                    "ModifyFleet",
                    "modify_fleet",
                    vec![
                        ("FleetId".to_string(), fleet_id.as_str().to_string()),
                        ("TargetCapacitySpecification.TotalTargetCapacity".to_string(), new_target.to_string()),
                    ],
                )
                .await;
            if let Err(e) = modify_result {
                return ReleaseGroupResult {
                    resource_id: Some(fleet_id.clone()),
                    instance_ids: ids.to_vec(),
                    success: false,
                    error: Some(e.to_string()),
                };
            }

            let terminate_result = self
                .ec2(RetryStrategy::Critical, "TerminateInstances", "terminate_instances", instance_id_params(ids))
                .await;
            if let Err(e) = terminate_result {
                return ReleaseGroupResult {
                    resource_id: Some(fleet_id.clone()),
                    instance_ids: ids.to_vec(),
                    success: false,
                    error: Some(e.to_string()),
                };
            }

            if new_target == 0 {
                let delete_result = self
                    .ec2(
                        RetryStrategy::Critical,
                        "DeleteFleets",
                        "delete_fleets",
                        vec![
                            ("FleetId.1".to_string(), fleet_id.as_str().to_string()),
                            ("TerminateInstances".to_string(), "true".to_string()),
                        ],
                    )
                    .await;
                if let Err(e) = delete_result {
                    warn!(fleet_id = %fleet_id, error = %e, "fleet deletion after zero target capacity failed (best-effort)");
                }
            }

            ReleaseGroupResult { resource_id: Some(fleet_id.clone()), instance_ids: ids.to_vec(), success: true, error: None }
        } else {
            let terminate_result = self
                .ec2(RetryStrategy::Critical, "TerminateInstances", "terminate_instances", instance_id_params(ids))
                .await;
            ReleaseGroupResult {
                resource_id: Some(fleet_id.clone()),
                instance_ids: ids.to_vec(),
                success: terminate_result.is_ok(),
                error: terminate_result.err().map(|e| e.to_string()),
            }
        }
    }
}

fn instance_id_params(ids: &[InstanceId]) -> Vec<(String, String)> {
    ids.iter().enumerate().map(|(i, id)| (format!("InstanceId.{}", i + 1), id.as_str().to_string())).collect()
}

fn to_domain(e: hostbroker_cloud::CloudError) -> DomainError {
    match e {
        hostbroker_cloud::CloudError::Domain(d) => d,
        other => DomainError::Infra(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hostbroker_cloud::TestCredentials;
    use hostbroker_domain::{LaunchTemplateRef, PricingConfig, ProviderApi as Api, RequestType, TemplateId};
    use hostbroker_resilience::CircuitBreakerRegistry;
    use std::collections::HashMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_launch_template_config() -> hostbroker_config::LaunchTemplateConfig {
        hostbroker_config::LaunchTemplateConfig {
            create_per_request: false,
            reuse_existing: true,
            naming_strategy: "hostbroker-{request_id}".to_string(),
            cleanup_old_versions: false,
            max_versions_per_template: 10,
        }
    }

    fn handler(server: &MockServer) -> Ec2FleetHandler {
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
        let launch_templates = Arc::new(LaunchTemplateManager::new(client.clone(), test_launch_template_config()));
        Ec2FleetHandler::new(client, resilience, launch_templates)
    }

    fn template(fleet_type: FleetType) -> Template {
        Template {
            template_id: TemplateId::new("tpl-1"),
            image_id: "ami-123".into(),
            instance_type: "m5.large".into(),
            weighted_instance_types: Vec::new(),
            subnet_ids: vec!["subnet-1".into()],
            security_group_ids: vec!["sg-1".into()],
            provider_api: ProviderApi::Ec2Fleet,
            fleet_type: Some(fleet_type),
            // Pinned id+version so `acquire` skips the CreateLaunchTemplate call.
            launch_template: Some(LaunchTemplateRef { launch_template_id: "lt-1".into(), version: Some("1".into()) }),
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

    fn request() -> Request {
        Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 2, Api::Ec2Fleet, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn acquire_creates_a_maintain_fleet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<CreateFleetResponse><fleetId>fleet-1</fleetId></CreateFleetResponse>",
            ))
            .mount(&server)
            .await;

        let h = handler(&server);
        let outcome = h.acquire(&request(), &template(FleetType::Maintain)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.resource_ids.len(), 1);
    }

    #[tokio::test]
    async fn acquire_reports_failure_for_instant_fleet_with_no_instances() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<CreateFleetResponse><fleetId>fleet-1</fleetId>\
                 <errors><item><errorCode>InsufficientCapacity</errorCode>\
                 <errorMessage>no capacity</errorMessage></item></errors></CreateFleetResponse>",
            ))
            .mount(&server)
            .await;

        let h = handler(&server);
        let outcome = h.acquire(&request(), &template(FleetType::Instant)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error_message.is_some());
    }

    #[tokio::test]
    async fn release_with_no_instances_is_a_noop() {
        let server = MockServer::start().await;
        let h = handler(&server);
        let outcome = h.release(&[], &[]).await.unwrap();
        assert!(outcome.groups.is_empty());
    }

    #[tokio::test]
    async fn release_with_no_mapping_falls_back_to_direct_terminate() {
        let server = MockServer::start().await;
        // Every release path in this test goes through DescribeInstances
        // (tag lookup) then TerminateInstances; neither response body is
        // inspected for success, so one mock serves both.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeInstancesResponse><reservationSet><item><instancesSet><item>\
                 <instanceId>i-0123456789abcdef0</instanceId><instanceType>m5.large</instanceType>\
                 <instanceState><name>running</name></instanceState>\
                 </item></instancesSet></item></reservationSet></DescribeInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let h = handler(&server);
        let ids = vec![InstanceId::new("i-0123456789abcdef0")];
        let outcome = h.release(&ids, &[]).await.unwrap();
        assert_eq!(outcome.groups.len(), 1);
        assert!(outcome.overall_success());
    }
}
