use std::collections::HashMap;
use std::time::Duration;

/// Validated, in-memory configuration tree. Built from [`crate::raw::RawConfig`]
/// by [`crate::loader::load_config`]; nothing downstream ever sees the raw
/// string/YAML shapes.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub launch_template: LaunchTemplateConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub selection_policy: SelectionPolicy,
    pub health_check_interval: Duration,
    pub circuit_breaker: CircuitBreakerSettings,
    pub providers: Vec<ProviderInstanceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    RoundRobin,
    WeightedRoundRobin,
    HealthBased,
    CapabilityBased,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

/// One registered provider instance (e.g. a distinct AWS account/region)
/// that the selection policy in [`ProviderConfig`] chooses among.
#[derive(Debug, Clone)]
pub struct ProviderInstanceConfig {
    pub name: String,
    pub provider_type: String,
    pub enabled: bool,
    pub priority: u32,
    pub weight: u32,
    pub capabilities: Vec<String>,
    pub config: HashMap<String, String>,
}

impl ProviderInstanceConfig {
    /// `config["region"]`, defaulting to `us-east-1` the way the cloud
    /// client does when nothing more specific is configured.
    pub fn region(&self) -> &str {
        self.config.get("region").map(String::as_str).unwrap_or("us-east-1")
    }
}

#[derive(Debug, Clone)]
pub struct LaunchTemplateConfig {
    pub create_per_request: bool,
    pub reuse_existing: bool,
    pub naming_strategy: String,
    pub cleanup_old_versions: bool,
    pub max_versions_per_template: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStrategy {
    Json,
    Sql,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub strategy: StorageStrategy,
}
