//! The shared contract every provisioning-API handler implements: one
//! struct per provisioning API (`RunInstances`/`EC2Fleet`/`SpotFleet`/`ASG`),
//! each offering one mutating create, one mutating release, and one
//! read-only observe operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostbroker_domain::{
    FleetCapacitySnapshot, InstanceId, MachineStatus, ProviderApi, Request, ResourceId, ResourceMappingHint, Template,
};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A single instance as reported by a handler, before the caller attaches
/// `request_id`/`template_id` and turns it into a [`hostbroker_domain::Machine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineObservation {
    pub instance_id: InstanceId,
    pub instance_type: String,
    pub image_id: Option<String>,
    pub status: MachineStatus,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub launch_time: Option<DateTime<Utc>>,
}

/// Outcome of a handler's `acquire` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireOutcome {
    pub success: bool,
    pub resource_ids: Vec<ResourceId>,
    pub instances: Vec<MachineObservation>,
    pub provider_data: serde_json::Value,
    pub error_message: Option<String>,
    /// Per-instance cloud-side errors (e.g. one fleet's launch failures),
    /// carried through to `Request.metadata["fleet_errors"]` for
    /// partial-success reporting even when the count of fulfilled
    /// instances alone wouldn't flag the request as partial.
    #[serde(default)]
    pub fleet_errors: Vec<String>,
}

impl AcquireOutcome {
    pub fn ok(resource_ids: Vec<ResourceId>, instances: Vec<MachineObservation>, provider_data: serde_json::Value) -> Self {
        AcquireOutcome {
            success: true,
            resource_ids,
            instances,
            provider_data,
            error_message: None,
            fleet_errors: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        AcquireOutcome {
            success: false,
            resource_ids: Vec::new(),
            instances: Vec::new(),
            provider_data: serde_json::Value::Null,
            error_message: Some(message.into()),
            fleet_errors: Vec::new(),
        }
    }

    /// A dry-run acquire: synthetic success, no cloud calls, no resource ids.
    pub fn dry_run() -> Self {
        AcquireOutcome {
            success: true,
            resource_ids: Vec::new(),
            instances: Vec::new(),
            provider_data: serde_json::json!({"dry_run": true}),
            error_message: None,
            fleet_errors: Vec::new(),
        }
    }
}

/// Outcome of releasing one group of instances sharing a fleet/ASG owner
/// (or the "no-fleet" bucket).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseGroupResult {
    pub resource_id: Option<ResourceId>,
    pub instance_ids: Vec<InstanceId>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub groups: Vec<ReleaseGroupResult>,
}

impl ReleaseOutcome {
    pub fn overall_success(&self) -> bool {
        self.groups.iter().all(|g| g.success)
    }

    pub fn fleet_errors(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|g| !g.success)
            .filter_map(|g| g.error.clone())
            .collect()
    }
}

#[async_trait]
pub trait ProviderHandler: Send + Sync {
    fn provider_api(&self) -> ProviderApi;

    async fn acquire(&self, request: &Request, template: &Template) -> Result<AcquireOutcome, ProviderError>;

    async fn poll_status(&self, request: &Request) -> Result<Vec<MachineObservation>, ProviderError>;

    /// Point-in-time target/fulfilled capacity for the request's fleet or
    /// ASG resource. `RunInstances` has no standalone resource to project
    /// capacity from, so the default is `None`.
    async fn fleet_capacity(&self, _request: &Request) -> Result<Option<FleetCapacitySnapshot>, ProviderError> {
        Ok(None)
    }

    async fn release(
        &self,
        instance_ids: &[InstanceId],
        resource_mapping: &[ResourceMappingHint],
    ) -> Result<ReleaseOutcome, ProviderError>;
}
