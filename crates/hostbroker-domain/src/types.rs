use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn new(s: impl Into<String>) -> Self {
        TemplateId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single provisioned instance id (e.g. `i-0123456789abcdef0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        InstanceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepted shape for an EC2 instance id at any external boundary (scheduler
/// adapter input, return-request `machine_ids`). Internal code that already
/// holds ids straight from an AWS response skips this and uses
/// [`InstanceId::new`] directly.
fn is_valid_instance_id(s: &str) -> bool {
    let Some(hex) = s.strip_prefix("i-") else { return false };
    (8..=17).contains(&hex.len()) && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

impl InstanceId {
    /// Validate and construct an [`InstanceId`] from caller-supplied input.
    /// Rejects anything not matching `i-[0-9a-f]{8,17}`.
    pub fn parse(s: impl Into<String>) -> Result<Self, DomainError> {
        let s = s.into();
        if !is_valid_instance_id(&s) {
            return Err(DomainError::Validation(format!("invalid instance id: {}", s)));
        }
        Ok(InstanceId(s))
    }
}

/// Provider-side handle for a request's underlying resource: an EC2 Fleet
/// id, a Spot Fleet request id, or an Auto Scaling Group name. RunInstances
/// requests never populate one of these since the reservation has no
/// standalone provider resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(s: impl Into<String>) -> Self {
        ResourceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Provider API ──────────────────────────────────────────────────────────────

/// Which of the four AWS provisioning APIs fulfils a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderApi {
    #[serde(rename = "RunInstances")]
    RunInstances,
    #[serde(rename = "EC2Fleet")]
    Ec2Fleet,
    #[serde(rename = "SpotFleet")]
    SpotFleet,
    #[serde(rename = "ASG")]
    Asg,
}

impl std::fmt::Display for ProviderApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderApi::RunInstances => write!(f, "RunInstances"),
            ProviderApi::Ec2Fleet => write!(f, "EC2Fleet"),
            ProviderApi::SpotFleet => write!(f, "SpotFleet"),
            ProviderApi::Asg => write!(f, "ASG"),
        }
    }
}

impl ProviderApi {
    /// Whether this API exposes a standalone provider resource (fleet id,
    /// ASG name) distinct from the instances it launches.
    pub fn has_managed_resource(&self) -> bool {
        !matches!(self, ProviderApi::RunInstances)
    }
}

// ── Request aggregate ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Acquire,
    Return,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestType::Acquire => write!(f, "acquire"),
            RequestType::Return => write!(f, "return"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    /// Some but not all instances/resources were provisioned or released.
    Partial,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::InProgress => write!(f, "in_progress"),
            RequestStatus::Partial => write!(f, "partial"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Failed => write!(f, "failed"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Partial | RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition. Terminal states never
    /// move; `Pending` only ever advances to `InProgress` or `Cancelled`.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, InProgress) | (Pending, Cancelled) => true,
            (InProgress, Partial)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Cancelled) => true,
            _ => false,
        }
    }
}

/// Domain events raised by [`Request`] mutations. Collected on the aggregate
/// and drained by the unit of work after a successful commit; never
/// published from a rolled-back transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DomainEvent {
    RequestCreated {
        request_id: RequestId,
        request_type: RequestType,
        template_id: TemplateId,
        requested_count: u32,
    },
    RequestStatusChanged {
        request_id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        message: Option<String>,
    },
    RequestCompleted {
        request_id: RequestId,
    },
    RequestFailed {
        request_id: RequestId,
        message: String,
    },
    RequestCancelled {
        request_id: RequestId,
    },
}

impl DomainEvent {
    /// The request every variant is raised against.
    pub fn request_id(&self) -> RequestId {
        match self {
            DomainEvent::RequestCreated { request_id, .. }
            | DomainEvent::RequestStatusChanged { request_id, .. }
            | DomainEvent::RequestCompleted { request_id }
            | DomainEvent::RequestFailed { request_id, .. }
            | DomainEvent::RequestCancelled { request_id } => *request_id,
        }
    }
}

/// The acquire/return request aggregate. Tracks everything the host-factory
/// contract needs to report: which instances or provider resources belong
/// to the request, its lifecycle status, and a trail of domain events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub request_type: RequestType,
    pub template_id: TemplateId,
    pub requested_count: u32,
    pub provider_api: ProviderApi,
    pub status: RequestStatus,
    pub status_message: Option<String>,
    pub resource_ids: Vec<ResourceId>,
    pub instance_ids: Vec<InstanceId>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip, default)]
    domain_events: Vec<DomainEvent>,
}

impl Request {
    pub fn new(
        request_type: RequestType,
        template_id: TemplateId,
        requested_count: u32,
        provider_api: ProviderApi,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if requested_count == 0 {
            return Err(DomainError::Validation(
                "requested_count must be greater than zero".into(),
            ));
        }
        let request_id = RequestId::new();
        let mut req = Request {
            request_id,
            request_type,
            template_id: template_id.clone(),
            requested_count,
            provider_api,
            status: RequestStatus::Pending,
            status_message: None,
            resource_ids: Vec::new(),
            instance_ids: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            domain_events: Vec::new(),
        };
        req.domain_events.push(DomainEvent::RequestCreated {
            request_id,
            request_type,
            template_id,
            requested_count,
        });
        Ok(req)
    }

    /// Append a provider resource id (fleet id / ASG name). Append-only:
    /// the same id is never removed once recorded, mirroring how the
    /// underlying provider resource itself is never un-created mid-request.
    pub fn add_resource_id(&mut self, id: ResourceId) {
        if !self.resource_ids.contains(&id) {
            self.resource_ids.push(id);
        }
    }

    /// Append instance ids observed for this request. Append-only for the
    /// same reason as [`add_resource_id`](Self::add_resource_id).
    pub fn add_instance_ids(&mut self, ids: impl IntoIterator<Item = InstanceId>) {
        for id in ids {
            if !self.instance_ids.contains(&id) {
                self.instance_ids.push(id);
            }
        }
    }

    pub fn transition_to(
        &mut self,
        next: RequestStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidState(format!(
                "request {} cannot move from {} to {}",
                self.request_id, self.status, next
            )));
        }
        let from = self.status;
        self.status = next;
        self.status_message = message.clone();
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.domain_events.push(DomainEvent::RequestStatusChanged {
            request_id: self.request_id,
            from,
            to: next,
            message,
        });
        match next {
            RequestStatus::Completed => {
                self.domain_events.push(DomainEvent::RequestCompleted {
                    request_id: self.request_id,
                })
            }
            RequestStatus::Failed => self.domain_events.push(DomainEvent::RequestFailed {
                request_id: self.request_id,
                message: self.status_message.clone().unwrap_or_default(),
            }),
            RequestStatus::Cancelled => self
                .domain_events
                .push(DomainEvent::RequestCancelled { request_id: self.request_id }),
            _ => {}
        }
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(RequestStatus::Cancelled, None, now)
    }

    /// Drain and return the events raised since the last call. The unit of
    /// work calls this only after a successful commit.
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.domain_events)
    }
}

// ── Template ───────────────────────────────────────────────────────────────────

/// How a fleet-backed request's capacity is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Ondemand,
    Spot,
    Heterogeneous,
}

/// EC2 Fleet / Spot Fleet lifecycle mode. Only meaningful when
/// `provider_api` is `EC2Fleet` or `SpotFleet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetType {
    Instant,
    Request,
    Maintain,
}

impl FleetType {
    pub fn as_aws_str(&self) -> &'static str {
        match self {
            FleetType::Instant => "instant",
            FleetType::Request => "request",
            FleetType::Maintain => "maintain",
        }
    }
}

/// A weighted instance type, used for EC2 Fleet / Spot Fleet override lines
/// and for heterogeneous on-demand/spot capacity splits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedInstanceType {
    pub instance_type: String,
    pub weight: f64,
}

/// An existing cloud-side launch template a [`Template`] may already
/// reference, short-circuiting [`crate`]-level launch-template creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchTemplateRef {
    pub launch_template_id: String,
    /// `None` means "resolve to latest" when reused.
    pub version: Option<String>,
}

/// A block device mapping entry for the derived launch template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDevice {
    pub device_name: String,
    pub volume_size_gb: u32,
    pub volume_type: String,
}

/// Pricing configuration consumed by the `EC2Fleet`/`SpotFleet` handlers.
/// Fields beyond `price_type` are optional and only apply to the pricing
/// mode they belong to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    pub max_price: Option<f64>,
    pub allocation_strategy: Option<String>,
    /// 0-100; only meaningful for `Heterogeneous`.
    pub percent_on_demand: Option<u32>,
    #[serde(default)]
    pub on_demand_weighted: Vec<WeightedInstanceType>,
    #[serde(default)]
    pub spot_weighted: Vec<WeightedInstanceType>,
}

/// Declarative description of what a machine should look like: image,
/// instance type(s), network, IAM, pricing. Referenced by id from a
/// [`Request`]; owned and resolved by a `TemplateStore` repository port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: TemplateId,
    pub image_id: String,
    pub instance_type: String,
    #[serde(default)]
    pub weighted_instance_types: Vec<WeightedInstanceType>,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub provider_api: ProviderApi,
    pub fleet_type: Option<FleetType>,
    pub launch_template: Option<LaunchTemplateRef>,
    #[serde(default)]
    pub price_type: Option<PriceType>,
    #[serde(default)]
    pub pricing: PricingConfig,
    pub fleet_role_arn: Option<String>,
    pub iam_instance_profile: Option<String>,
    pub key_pair: Option<String>,
    pub user_data: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub block_devices: Vec<BlockDevice>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    1
}

impl Template {
    /// Static validation of required fields. Aggregates every problem found
    /// instead of stopping at the first, matching the `VALIDATE_TEMPLATE`
    /// contract's "errors distinct from warnings" split.
    pub fn validate(&self) -> Result<Vec<String>, DomainError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.image_id.is_empty() || !self.image_id.starts_with("ami-") {
            errors.push(format!("invalid image id: {:?}", self.image_id));
        }
        if self.instance_type.is_empty() {
            errors.push("instance_type must not be empty".to_string());
        }
        if self.subnet_ids.is_empty() {
            errors.push("at least one subnet is required".to_string());
        }
        if self.security_group_ids.is_empty() {
            errors.push("at least one security group is required".to_string());
        }
        match self.provider_api {
            ProviderApi::Ec2Fleet => {
                if !matches!(self.fleet_type, Some(FleetType::Instant | FleetType::Request | FleetType::Maintain))
                {
                    errors.push("EC2Fleet templates require a fleet_type".to_string());
                }
            }
            ProviderApi::SpotFleet => {
                if !matches!(self.fleet_type, Some(FleetType::Request | FleetType::Maintain)) {
                    errors.push("SpotFleet templates require fleet_type request|maintain".to_string());
                }
                if self.fleet_role_arn.is_none() {
                    errors.push("SpotFleet templates require fleet_role_arn".to_string());
                }
            }
            _ => {}
        }
        if matches!(self.price_type, Some(PriceType::Heterogeneous))
            && self.pricing.percent_on_demand.is_none()
        {
            warnings.push("heterogeneous pricing without percent_on_demand defaults to 0% on-demand".to_string());
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(DomainError::Validation(errors.join("; ")))
        }
    }
}

// ── Machine aggregate ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
    Unknown,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Pending => write!(f, "pending"),
            MachineStatus::Running => write!(f, "running"),
            MachineStatus::ShuttingDown => write!(f, "shutting-down"),
            MachineStatus::Stopping => write!(f, "stopping"),
            MachineStatus::Stopped => write!(f, "stopped"),
            MachineStatus::Terminated => write!(f, "terminated"),
            MachineStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl MachineStatus {
    /// Parse an EC2 `instance-state-name` value.
    pub fn from_ec2_state(s: &str) -> Self {
        match s {
            "pending" => MachineStatus::Pending,
            "running" => MachineStatus::Running,
            "shutting-down" => MachineStatus::ShuttingDown,
            "stopping" => MachineStatus::Stopping,
            "stopped" => MachineStatus::Stopped,
            "terminated" => MachineStatus::Terminated,
            _ => MachineStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MachineStatus::Terminated)
    }
}

impl Default for MachineStatus {
    fn default() -> Self {
        MachineStatus::Unknown
    }
}

/// A single machine (EC2 instance) belonging to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub instance_id: InstanceId,
    pub request_id: RequestId,
    pub template_id: TemplateId,
    pub provider_api: ProviderApi,
    pub instance_type: String,
    pub image_id: Option<String>,
    pub status: MachineStatus,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub launch_time: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl Machine {
    pub fn mark_status(&mut self, status: MachineStatus) {
        self.status = status;
    }
}

// ── Provider operation / result ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    CreateInstances,
    TerminateInstances,
    GetInstanceStatus,
    DescribeResourceInstances,
    ValidateTemplate,
    GetAvailableTemplates,
    HealthCheck,
}

/// Cross-cutting context carried alongside every provider operation: a
/// correlation id for log/trace joining, the owning request (absent for
/// request-less operations like `GET_AVAILABLE_TEMPLATES`/`HEALTH_CHECK`),
/// whether it should be a dry run, and whether the scheduler adapter should
/// be bypassed for template resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    pub correlation_id: String,
    pub request_id: Option<RequestId>,
    pub dry_run: bool,
    #[serde(default)]
    pub skip_adapter: bool,
}

impl OperationContext {
    pub fn new(request_id: Option<RequestId>, dry_run: bool) -> Self {
        OperationContext {
            correlation_id: Uuid::new_v4().to_string(),
            request_id,
            dry_run,
            skip_adapter: false,
        }
    }
}

/// A single call into a provider handler. `parameters` carries the
/// operation-specific payload (launch spec, target capacity, instance ids
/// to release, ...) as loosely-typed JSON so the command bus and the
/// provider registry don't need a parameter type per operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOperation {
    pub operation_type: OperationType,
    pub parameters: HashMap<String, serde_json::Value>,
    pub context: OperationContext,
}

/// Outcome of a [`ProviderOperation`]. `error` is populated with a
/// [`DomainError`] when `success` is false; callers match on it to decide
/// whether the resilience layer should retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<DomainError>,
}

impl ProviderResult {
    pub fn ok(data: serde_json::Value) -> Self {
        ProviderResult { success: true, data, error: None }
    }

    pub fn err(error: DomainError) -> Self {
        ProviderResult { success: false, data: serde_json::Value::Null, error: Some(error) }
    }
}

// ── Circuit breaker projection ────────────────────────────────────────────────

/// Read-only snapshot of a circuit breaker's state, exposed to operators via
/// the status/observability surface. The live state machine lives in the
/// resilience layer; this is the value object it reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub service: String,
    pub operation: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Caller-supplied hint attributing one instance to its owning fleet/ASG, so
/// the release path can skip a discovery round-trip. See
/// [`crate`]-level documentation on the release grouping algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMappingHint {
    pub instance_id: InstanceId,
    pub resource_id: Option<ResourceId>,
    pub desired_capacity: u32,
}

// ── Fleet capacity projection ─────────────────────────────────────────────────

/// Point-in-time capacity read for an EC2 Fleet, Spot Fleet, or ASG resource,
/// used while polling a request's provisioning progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetCapacitySnapshot {
    pub resource_id: ResourceId,
    pub target_capacity: u32,
    pub fulfilled_capacity: u32,
}

impl FleetCapacitySnapshot {
    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled_capacity >= self.target_capacity
    }
}
