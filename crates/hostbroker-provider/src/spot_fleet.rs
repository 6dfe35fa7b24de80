//! The `SpotFleet` provider handler.
//!
//! Structurally identical to [`crate::ec2_fleet::Ec2FleetHandler`] (same
//! `request`/`maintain` fleet types, same grouping algorithm on release) but
//! talks to `RequestSpotFleet`/`DescribeSpotFleetRequests`/
//! `ModifySpotFleetRequest`/`CancelSpotFleetRequests` instead, and every
//! fleet needs an IAM fleet role.

use std::collections::{HashMap, HashSet};
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
use crate::release::{attribute_by_fleet_membership, attribute_by_tags, group_by_mapping, merge};
use crate::resilient::ResilienceContext;

/// The short form a template may supply for `fleet_role_arn`
/// (`aws-ec2-spot-fleet-tagging-role`) that expands to the account's
/// service-linked role ARN using the caller's own account id.
const SERVICE_LINKED_ROLE_SHORT_FORM: &str = "aws-ec2-spot-fleet-tagging-role";

/// Suffix of the EC2-fleet service-linked role ARN's resource path. A
/// template that names this role (created for EC2 Fleet, not SpotFleet)
/// gets auto-converted to the SpotFleet service-linked role below.
const EC2_FLEET_SERVICE_LINKED_ROLE_PATH: &str = "/aws-service-role/ec2.amazonaws.com/AWSServiceRoleForEC2Fleet";

/// If `role` is the EC2-fleet service-linked role ARN, returns the
/// SpotFleet-equivalent ARN for the same account. Otherwise `None`.
fn convert_ec2_fleet_service_linked_role(role: &str) -> Option<String> {
    let (prefix, path) = role.split_once(":role")?;
    if path != EC2_FLEET_SERVICE_LINKED_ROLE_PATH {
        return None;
    }
    Some(format!("{prefix}:role/aws-service-role/spotfleet.amazonaws.com/AWSServiceRoleForEC2SpotFleet"))
}

pub struct SpotFleetHandler {
    client: Arc<AwsClient>,
    resilience: ResilienceContext,
    launch_templates: Arc<LaunchTemplateManager>,
}

impl SpotFleetHandler {
    pub fn new(
        client: Arc<AwsClient>,
        resilience: ResilienceContext,
        launch_templates: Arc<LaunchTemplateManager>,
    ) -> Self {
        SpotFleetHandler { client, resilience, launch_templates }
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

    async fn resolve_fleet_role(&self, template: &Template) -> Result<String, ProviderError> {
        let role = template
            .fleet_role_arn
            .as_deref()
            .ok_or_else(|| DomainError::Validation("SpotFleet template missing fleet_role_arn".into()))?;
        if let Some(converted) = convert_ec2_fleet_service_linked_role(role) {
            return Ok(converted);
        }
        if role != SERVICE_LINKED_ROLE_SHORT_FORM {
            return Ok(role.to_string());
        }
        let account_id = self.client.get_caller_identity().await.map_err(|e| ProviderError::Cloud(e))?;
        Ok(format!(
            "arn:aws:iam::{account_id}:role/aws-service-role/spotfleet.amazonaws.com/AWSServiceRoleForEC2SpotFleet"
        ))
    }

    fn build_launch_specs(&self, template: &Template, lt_id: &str, lt_version: Option<&str>, params: &mut ParamBuilder) {
        let spot_types: Vec<(String, f64)> = if template.weighted_instance_types.is_empty() {
            vec![(template.instance_type.clone(), 1.0)]
        } else {
            template
                .weighted_instance_types
                .iter()
                .map(|w| (w.instance_type.clone(), w.weight))
                .collect()
        };
        let heterogeneous = matches!(template.price_type, Some(PriceType::Heterogeneous));

        let mut idx = 0usize;
        for subnet in &template.subnet_ids {
            for (instance_type, weight) in &spot_types {
                idx += 1;
                let prefix = format!("LaunchSpecifications.{idx}");
                params.set(format!("{prefix}.LaunchTemplateSpecification.LaunchTemplateId"), lt_id.to_string());
                if let Some(v) = lt_version {
                    params.set(format!("{prefix}.LaunchTemplateSpecification.Version"), v.to_string());
                }
                params.set(format!("{prefix}.SubnetId"), subnet.clone());
                params.set(format!("{prefix}.InstanceType"), instance_type.clone());
                params.set(format!("{prefix}.WeightedCapacity"), weight.to_string());
                params.set(format!("{prefix}.Priority"), (idx - 1).to_string());
                if let Some(price) = template.pricing.max_price {
                    params.set(format!("{prefix}.SpotPrice"), price.to_string());
                }
            }
        }

        if heterogeneous {
            for (instance_type, weight) in &template.pricing.on_demand_weighted {
                for subnet in &template.subnet_ids {
                    idx += 1;
                    let prefix = format!("LaunchSpecifications.{idx}");
                    params.set(format!("{prefix}.LaunchTemplateSpecification.LaunchTemplateId"), lt_id.to_string());
                    if let Some(v) = lt_version {
                        params.set(format!("{prefix}.LaunchTemplateSpecification.Version"), v.to_string());
                    }
                    params.set(format!("{prefix}.SubnetId"), subnet.clone());
                    params.set(format!("{prefix}.InstanceType"), instance_type.clone());
                    params.set(format!("{prefix}.WeightedCapacity"), weight.to_string());
                    params.set(format!("{prefix}.Priority"), (idx - 1).to_string());
                }
            }
        }
    }
}

#[async_trait]
impl ProviderHandler for SpotFleetHandler {
    fn provider_api(&self) -> ProviderApi {
        ProviderApi::SpotFleet
    }

    async fn acquire(&self, request: &Request, template: &Template) -> Result<AcquireOutcome, ProviderError> {
        template.validate()?;
        let fleet_type = template
            .fleet_type
            .ok_or_else(|| DomainError::Validation("SpotFleet template missing fleet_type".into()))?;
        if matches!(fleet_type, FleetType::Instant) {
            return Err(DomainError::Validation("SpotFleet does not support the instant fleet type".into()).into());
        }

        let lt = self.launch_templates.resolve(template, request).await?;
        let fleet_role = self.resolve_fleet_role(template).await?;

        let mut params = ParamBuilder::new();
        params.set("SpotFleetRequestConfig.IamFleetRole", fleet_role);
        params.set("SpotFleetRequestConfig.TargetCapacity", request.requested_count.to_string());
        params.set("SpotFleetRequestConfig.Type", fleet_type.as_aws_str());
        self.build_launch_specs(template, &lt.launch_template_id, lt.version.as_deref(), &mut params);

        if matches!(template.price_type, Some(PriceType::Heterogeneous)) {
            let percent = template.pricing.percent_on_demand.unwrap_or(0);
            params.set(
                "SpotFleetRequestConfig.OnDemandTargetCapacity",
                (request.requested_count * percent / 100).to_string(),
            );
        }
        params.set_opt("SpotFleetRequestConfig.AllocationStrategy", template.pricing.allocation_strategy.clone());
        if fleet_type == FleetType::Maintain {
            params.set("SpotFleetRequestConfig.ExcessCapacityTerminationPolicy", "default");
            params.set("SpotFleetRequestConfig.ReplaceUnhealthyInstances", "true");
        }

        let pairs: Vec<(String, String)> = params.as_pairs().into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let body = self.ec2(RetryStrategy::Critical, "RequestSpotFleet", "request_spot_fleet", pairs).await?;

        let fleet_id = hostbroker_cloud::xml::text(&body, "spotFleetRequestId")
            .ok_or_else(|| DomainError::Infra("RequestSpotFleet response missing spotFleetRequestId".into()))?;

        let error_codes = hostbroker_cloud::xml::all_texts(&body, "errorCode");
        let error_messages = hostbroker_cloud::xml::all_texts(&body, "errorMessage");
        let fleet_errors: Vec<String> = error_codes
            .iter()
            .zip(error_messages.iter())
            .map(|(c, m)| format!("{c}: {m}"))
            .collect();

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
                warn!(fleet_id, error = %e, "post-creation spot fleet tagging failed");
            }
        }

        info!(request_id = %request.request_id, fleet_id, fleet_type = fleet_type.as_aws_str(), "spot fleet requested");

        Ok(AcquireOutcome {
            success: true,
            resource_ids: vec![ResourceId::new(fleet_id.clone())],
            instances: Vec::new(),
            provider_data: serde_json::json!({"fleet_id": fleet_id, "fleet_type": fleet_type.as_aws_str()}),
            error_message: if fleet_errors.is_empty() { None } else { Some(fleet_errors.join("; ")) },
            fleet_errors,
        })
    }

    async fn poll_status(&self, request: &Request) -> Result<Vec<MachineObservation>, ProviderError> {
        let Some(fleet_id) = request.resource_ids.first() else {
            return Ok(Vec::new());
        };
        let pages = self
            .client
            .ec2_query_paginated("DescribeSpotFleetInstances", &[("SpotFleetRequestId", fleet_id.as_str())])
            .await
            .map_err(|e| ProviderError::Domain(to_domain(e)))?;
        let ids: Vec<InstanceId> = pages
            .iter()
            .flat_map(|p| hostbroker_cloud::xml::all_texts(p, "instanceId"))
            .map(InstanceId::new)
            .collect();

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
                "DescribeSpotFleetRequests",
                "describe_spot_fleet_requests",
                vec![("SpotFleetRequestId.1".to_string(), fleet_id.as_str().to_string())],
            )
            .await?;
        let target = hostbroker_cloud::xml::text(&body, "targetCapacity").and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
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
            let mut lookup = attribute_by_tags(&grouped.needs_lookup, &described, &["aws:ec2spot:fleet-request-id"]);
            if !lookup.no_fleet.is_empty() {
                let membership = self.scan_active_fleet_membership(&lookup.no_fleet).await?;
                let scanned = attribute_by_fleet_membership(&lookup.no_fleet, &membership);
                lookup.no_fleet = scanned.no_fleet;
                for (fleet_id, ids) in scanned.by_resource {
                    lookup.by_resource.entry(fleet_id).or_default().extend(ids);
                }
            }
            merge(&mut grouped, lookup);
        }

        let mut groups = Vec::new();
        for (fleet_id, ids) in grouped.by_resource {
            groups.push(self.release_one_fleet(&fleet_id, &ids).await);
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

impl SpotFleetHandler {
    /// Falls back to scanning active spot fleet requests' own instance
    /// membership for instances whose spot-fleet tag hasn't propagated yet.
    /// Stops as soon as every `lookup` id has a found owner.
    async fn scan_active_fleet_membership(
        &self,
        lookup: &[InstanceId],
    ) -> Result<HashMap<ResourceId, Vec<InstanceId>>, ProviderError> {
        let mut membership: HashMap<ResourceId, Vec<InstanceId>> = HashMap::new();
        let mut remaining: HashSet<InstanceId> = lookup.iter().cloned().collect();
        if remaining.is_empty() {
            return Ok(membership);
        }

        let body = self
            .ec2(RetryStrategy::ReadOnly, "DescribeSpotFleetRequests", "describe_spot_fleet_requests", Vec::new())
            .await?;
        for block in hostbroker_cloud::xml::all_blocks(&body, "item") {
            if remaining.is_empty() {
                break;
            }
            let Some(fleet_id) = hostbroker_cloud::xml::text(&block, "spotFleetRequestId") else { continue };
            let state = hostbroker_cloud::xml::text(&block, "spotFleetRequestState").unwrap_or_default();
            if state != "active" {
                continue;
            }

            let instances_body = self
                .ec2(
                    RetryStrategy::ReadOnly,
                    "DescribeSpotFleetInstances",
                    "describe_spot_fleet_instances",
                    vec![("SpotFleetRequestId".to_string(), fleet_id.clone())],
                )
                .await?;
            let resource_id = ResourceId::new(fleet_id);
            for instance_id in hostbroker_cloud::xml::all_texts(&instances_body, "instanceId") {
                let instance_id = InstanceId::new(instance_id);
                if remaining.remove(&instance_id) {
                    membership.entry(resource_id.clone()).or_default().push(instance_id);
                }
            }
        }
        Ok(membership)
    }

    async fn release_one_fleet(&self, fleet_id: &ResourceId, ids: &[InstanceId]) -> ReleaseGroupResult {
        let describe_result = self
            .ec2(
                RetryStrategy::ReadOnly,
                "DescribeSpotFleetRequests",
                "describe_spot_fleet_requests",
                vec![("SpotFleetRequestId.1".to_string(), fleet_id.as_str().to_string())],
            )
            .await;

        let (is_maintain, current_total) = match &describe_result {
            Ok(body) => (
                hostbroker_cloud::xml::text(body, "type").map(|t| t == "maintain").unwrap_or(true),
                hostbroker_cloud::xml::text(body, "targetCapacity")
                    .and_then(|s| s.parse::<u32>().ok())
                    .unwrap_or(ids.len() as u32),
            ),
            Err(_) => (true, ids.len() as u32),
        };

        if is_maintain {
            let new_target = current_total.saturating_sub(ids.len() as u32);
            if let Err(e) = self
                .ec2(
                    RetryStrategy::Critical,
                    "ModifySpotFleetRequest",
                    "modify_spot_fleet_request",
                    vec![
                        ("SpotFleetRequestId".to_string(), fleet_id.as_str().to_string()),
                        ("TargetCapacity".to_string(), new_target.to_string()),
                    ],
                )
                .await
            {
                return ReleaseGroupResult {
                    resource_id: Some(fleet_id.clone()),
                    instance_ids: ids.to_vec(),
                    success: false,
                    error: Some(e.to_string()),
                };
            }

            if let Err(e) = self
                .ec2(RetryStrategy::Critical, "TerminateInstances", "terminate_instances", instance_id_params(ids))
                .await
            {
                return ReleaseGroupResult {
                    resource_id: Some(fleet_id.clone()),
                    instance_ids: ids.to_vec(),
                    success: false,
                    error: Some(e.to_string()),
                };
            }

            if new_target == 0 {
                let cancel_result = self
                    .ec2(
                        RetryStrategy::Critical,
                        "CancelSpotFleetRequests",
                        "cancel_spot_fleet_requests",
                        vec![
                            ("SpotFleetRequestId.1".to_string(), fleet_id.as_str().to_string()),
                            ("TerminateInstances".to_string(), "true".to_string()),
                        ],
                    )
                    .await;
                if let Err(e) = cancel_result {
                    warn!(fleet_id = %fleet_id, error = %e, "spot fleet cancellation after zero target capacity failed (best-effort)");
                }
            }
            ReleaseGroupResult { resource_id: Some(fleet_id.clone()), instance_ids: ids.to_vec(), success: true, error: None }
        } else {
            let result = self
                .ec2(RetryStrategy::Critical, "TerminateInstances", "terminate_instances", instance_id_params(ids))
                .await;
            ReleaseGroupResult {
                resource_id: Some(fleet_id.clone()),
                instance_ids: ids.to_vec(),
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
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

    fn handler(server: &MockServer) -> SpotFleetHandler {
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
        SpotFleetHandler::new(client, resilience, launch_templates)
    }

    fn template(fleet_type: FleetType) -> Template {
        Template {
            template_id: TemplateId::new("tpl-1"),
            image_id: "ami-123".into(),
            instance_type: "m5.large".into(),
            weighted_instance_types: Vec::new(),
            subnet_ids: vec!["subnet-1".into()],
            security_group_ids: vec!["sg-1".into()],
            provider_api: ProviderApi::SpotFleet,
            fleet_type: Some(fleet_type),
            launch_template: Some(LaunchTemplateRef { launch_template_id: "lt-1".into(), version: Some("1".into()) }),
            price_type: Some(PriceType::Spot),
            pricing: PricingConfig::default(),
            fleet_role_arn: Some("arn:aws:iam::123456789012:role/fleet-role".into()),
            iam_instance_profile: None,
            key_pair: None,
            user_data: None,
            tags: HashMap::new(),
            block_devices: Vec::new(),
            schema_version: 1,
        }
    }

    fn request() -> Request {
        Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 2, Api::SpotFleet, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn acquire_requests_a_maintain_spot_fleet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<RequestSpotFleetResponse><spotFleetRequestId>sfr-1</spotFleetRequestId></RequestSpotFleetResponse>",
            ))
            .mount(&server)
            .await;

        let h = handler(&server);
        let outcome = h.acquire(&request(), &template(FleetType::Maintain)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.resource_ids.len(), 1);
    }

    #[tokio::test]
    async fn acquire_rejects_instant_fleet_type() {
        let server = MockServer::start().await;
        let h = handler(&server);
        assert!(h.acquire(&request(), &template(FleetType::Instant)).await.is_err());
    }

    #[tokio::test]
    async fn acquire_requires_fleet_role_arn() {
        let server = MockServer::start().await;
        let h = handler(&server);
        let mut t = template(FleetType::Maintain);
        t.fleet_role_arn = None;
        assert!(h.acquire(&request(), &t).await.is_err());
    }

    #[tokio::test]
    async fn release_with_no_instances_is_a_noop() {
        let server = MockServer::start().await;
        let h = handler(&server);
        let outcome = h.release(&[], &[]).await.unwrap();
        assert!(outcome.groups.is_empty());
    }

    #[tokio::test]
    async fn release_attributes_untagged_instance_via_fleet_membership_scan() {
        let server = MockServer::start().await;
        // One body serves DescribeInstances (no spot-fleet tag -> tag
        // lookup misses), DescribeSpotFleetRequests (one active fleet) and
        // DescribeSpotFleetInstances (that fleet's membership includes i-1).
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeInstancesResponse><reservationSet><item><instancesSet><item>\
                 <instanceId>i-1</instanceId><instanceType>m5.large</instanceType>\
                 <instanceState><name>running</name></instanceState>\
                 </item></instancesSet></item></reservationSet>\
                 <spotFleetRequestConfigSet><item>\
                 <spotFleetRequestId>sfr-9</spotFleetRequestId>\
                 <spotFleetRequestState>active</spotFleetRequestState>\
                 <type>maintain</type><targetCapacity>2</targetCapacity>\
                 </item></spotFleetRequestConfigSet>\
                 <activeInstanceSet><item><instanceId>i-1</instanceId></item></activeInstanceSet>\
                 </DescribeInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let h = handler(&server);
        let ids = vec![InstanceId::new("i-1")];
        let outcome = h.release(&ids, &[]).await.unwrap();
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].resource_id, Some(ResourceId::new("sfr-9")));
        assert!(outcome.groups[0].success);
    }

    #[test]
    fn ec2_fleet_service_linked_role_converts_to_spot_fleet_equivalent() {
        let ec2_fleet_role =
            "arn:aws:iam::123456789012:role/aws-service-role/ec2.amazonaws.com/AWSServiceRoleForEC2Fleet";
        let converted = convert_ec2_fleet_service_linked_role(ec2_fleet_role).unwrap();
        assert_eq!(
            converted,
            "arn:aws:iam::123456789012:role/aws-service-role/spotfleet.amazonaws.com/AWSServiceRoleForEC2SpotFleet"
        );
    }

    #[test]
    fn unrelated_role_arns_are_not_converted() {
        assert!(convert_ec2_fleet_service_linked_role("arn:aws:iam::123456789012:role/fleet-role").is_none());
    }

    #[tokio::test]
    async fn resolve_fleet_role_auto_converts_ec2_fleet_service_linked_arn() {
        let server = MockServer::start().await;
        let h = handler(&server);
        let mut t = template(FleetType::Maintain);
        t.fleet_role_arn =
            Some("arn:aws:iam::999999999999:role/aws-service-role/ec2.amazonaws.com/AWSServiceRoleForEC2Fleet".into());
        let resolved = h.resolve_fleet_role(&t).await.unwrap();
        assert_eq!(
            resolved,
            "arn:aws:iam::999999999999:role/aws-service-role/spotfleet.amazonaws.com/AWSServiceRoleForEC2SpotFleet"
        );
    }
}
