//! The single entry point every application-layer command/query goes
//! through to reach a cloud provisioning API. Routes a
//! [`ProviderOperation`] by `operation_type`, never lets an AWS field name
//! leak past this module, and honours dry-run without making a single cloud
//! call.

use std::sync::Arc;
use std::time::Duration;

use hostbroker_cloud::AwsClient;
use hostbroker_domain::{
    DomainError, OperationType, ProviderApi, ProviderOperation, ProviderResult, Request,
    ResourceMappingHint, Template,
};
use tracing::warn;

use crate::error::ProviderError;
use crate::registry::ProviderHandlerRegistry;

/// Thin wrapper with a "lazy, explicit readiness" construction shape:
/// `initialize()` just records that the registry + client exist,
/// `cleanup()` drops them.
pub struct ProviderStrategy {
    registry: Option<Arc<ProviderHandlerRegistry>>,
    client: Option<Arc<AwsClient>>,
}

impl ProviderStrategy {
    pub fn new() -> Self {
        ProviderStrategy { registry: None, client: None }
    }

    /// Record readiness. A registry/client configured after construction
    /// (the common path — see [`crate::registry::ProviderHandlerRegistry`])
    /// makes the provisioning adapter available; without it, `CREATE_INSTANCES`
    /// is an explicit deny and `TERMINATE_INSTANCES` falls back to a direct
    /// `terminate_instances` call.
    pub fn initialize(&mut self, registry: Arc<ProviderHandlerRegistry>, client: Arc<AwsClient>) {
        self.registry = Some(registry);
        self.client = Some(client);
    }

    pub fn cleanup(&mut self) {
        self.registry = None;
        self.client = None;
    }

    pub async fn execute(&self, op: ProviderOperation) -> ProviderResult {
        let result = self.dispatch(&op).await;
        match result {
            Ok(value) => ProviderResult::ok(value),
            Err(e) => ProviderResult::err(DomainError::from(e)),
        }
    }

    async fn dispatch(&self, op: &ProviderOperation) -> Result<serde_json::Value, ProviderError> {
        match op.operation_type {
            OperationType::CreateInstances => self.create_instances(op).await,
            OperationType::TerminateInstances => self.terminate_instances(op).await,
            OperationType::GetInstanceStatus => self.get_instance_status(op).await,
            OperationType::DescribeResourceInstances => self.describe_resource_instances(op).await,
            OperationType::ValidateTemplate => self.validate_template(op),
            OperationType::GetAvailableTemplates => Ok(self.available_templates()),
            OperationType::HealthCheck => self.health_check(op).await,
        }
    }

    fn param<T: serde::de::DeserializeOwned>(op: &ProviderOperation, key: &str) -> Result<T, ProviderError> {
        let value = op
            .parameters
            .get(key)
            .ok_or_else(|| DomainError::Validation(format!("operation missing parameter `{key}`")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ProviderError::Domain(DomainError::Validation(format!("parameter `{key}`: {e}"))))
    }

    async fn create_instances(&self, op: &ProviderOperation) -> Result<serde_json::Value, ProviderError> {
        let request: Request = Self::param(op, "request")?;
        let template: Template = Self::param(op, "template")?;

        if op.context.dry_run {
            return Ok(serde_json::json!({"success": true, "resource_ids": [], "instances": [], "dry_run": true}));
        }

        let Some(registry) = &self.registry else {
            return Err(ProviderError::AdapterUnavailable("CREATE_INSTANCES".into()));
        };

        let provider_api = if registry.contains(template.provider_api) {
            template.provider_api
        } else {
            warn!(requested = %template.provider_api, "unknown provider_api, falling back to RunInstances");
            ProviderApi::RunInstances
        };
        let handler = registry.get(provider_api)?;
        let outcome = handler.acquire(&request, &template).await?;
        Ok(serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null))
    }

    async fn terminate_instances(&self, op: &ProviderOperation) -> Result<serde_json::Value, ProviderError> {
        let instance_ids: Vec<hostbroker_domain::InstanceId> = Self::param(op, "instance_ids")?;
        let resource_mapping: Vec<ResourceMappingHint> =
            op.parameters.get("resource_mapping").cloned().map(serde_json::from_value).transpose().unwrap_or(None).unwrap_or_default();
        let provider_api: ProviderApi = Self::param(op, "provider_api")?;

        if op.context.dry_run {
            return Ok(serde_json::json!({"success": true, "groups": []}));
        }

        match &self.registry {
            Some(registry) => {
                let handler = registry.get(provider_api)?;
                let outcome = handler.release(&instance_ids, &resource_mapping).await?;
                Ok(serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null))
            }
            None => {
                let Some(client) = &self.client else {
                    return Err(ProviderError::AdapterUnavailable("TERMINATE_INSTANCES".into()));
                };
                let params: Vec<(String, String)> = instance_ids
                    .iter()
                    .enumerate()
                    .map(|(i, id)| (format!("InstanceId.{}", i + 1), id.as_str().to_string()))
                    .collect();
                let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                client
                    .ec2_query("TerminateInstances", &pairs)
                    .await
                    .map_err(ProviderError::Cloud)?;
                Ok(serde_json::json!({"success": true, "fallback": "direct_terminate"}))
            }
        }
    }

    async fn get_instance_status(&self, op: &ProviderOperation) -> Result<serde_json::Value, ProviderError> {
        let request: Request = Self::param(op, "request")?;
        let provider_api: ProviderApi = Self::param(op, "provider_api")?;
        let registry = self.registry.as_ref().ok_or_else(|| ProviderError::AdapterUnavailable("GET_INSTANCE_STATUS".into()))?;
        let handler = registry.get(provider_api)?;
        let observations = handler.poll_status(&request).await?;
        Ok(serde_json::to_value(observations).unwrap_or(serde_json::Value::Null))
    }

    async fn describe_resource_instances(&self, op: &ProviderOperation) -> Result<serde_json::Value, ProviderError> {
        let request: Request = Self::param(op, "request")?;
        let provider_api: ProviderApi = Self::param(op, "provider_api")?;
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| ProviderError::AdapterUnavailable("DESCRIBE_RESOURCE_INSTANCES".into()))?;
        let handler = registry.get(provider_api)?;
        let observations = handler.poll_status(&request).await?;
        let capacity = handler.fleet_capacity(&request).await?;
        let capacity_json = capacity.map(|snapshot| {
            serde_json::json!({
                "resource_id": snapshot.resource_id,
                "target_capacity_units": snapshot.target_capacity,
                "fulfilled_capacity_units": snapshot.fulfilled_capacity,
                "provisioned_instance_count": observations.len(),
                "state": if snapshot.is_fulfilled() { "fulfilled" } else { "provisioning" },
            })
        });
        Ok(serde_json::json!({
            "instances": observations,
            "capacity": capacity_json,
        }))
    }

    fn validate_template(&self, op: &ProviderOperation) -> Result<serde_json::Value, ProviderError> {
        let template: Template = Self::param(op, "template")?;
        match template.validate() {
            Ok(warnings) => Ok(serde_json::json!({"valid": true, "errors": [], "warnings": warnings})),
            Err(DomainError::Validation(message)) => {
                let errors: Vec<&str> = message.split("; ").collect();
                Ok(serde_json::json!({"valid": false, "errors": errors, "warnings": []}))
            }
            Err(other) => Err(ProviderError::Domain(other)),
        }
    }

    fn available_templates(&self) -> serde_json::Value {
        serde_json::json!({
            "templates": [
                {"template_id": "default-run-instances", "provider_api": "RunInstances"},
                {"template_id": "default-ec2-fleet", "provider_api": "EC2Fleet"},
            ]
        })
    }

    async fn health_check(&self, op: &ProviderOperation) -> Result<serde_json::Value, ProviderError> {
        if op.context.dry_run {
            return Ok(serde_json::json!({"healthy": true, "dry_run": true}));
        }
        let Some(client) = &self.client else {
            return Ok(serde_json::json!({"healthy": false, "reason": "client not initialized"}));
        };
        match tokio::time::timeout(Duration::from_secs(5), client.get_caller_identity()).await {
            Ok(Ok(account)) => Ok(serde_json::json!({"healthy": true, "account": account})),
            Ok(Err(e)) => Ok(serde_json::json!({"healthy": false, "reason": e.to_string()})),
            Err(_) => Ok(serde_json::json!({"healthy": false, "reason": "timed out"})),
        }
    }
}

impl Default for ProviderStrategy {
    fn default() -> Self {
        Self::new()
    }
}
