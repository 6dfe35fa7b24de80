use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Raw YAML representation of the top-level config file.
#[derive(Debug, Deserialize, Serialize)]
pub struct RawConfig {
    #[serde(default)]
    pub provider: RawProviderConfig,
    #[serde(default)]
    pub launch_template: RawLaunchTemplateConfig,
    #[serde(default)]
    pub storage: RawStorageConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawProviderConfig {
    #[serde(default = "default_selection_policy")]
    pub selection_policy: String,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    #[serde(default)]
    pub circuit_breaker: RawCircuitBreakerConfig,
    #[serde(default)]
    pub providers: Vec<RawProviderInstance>,
}

impl Default for RawProviderConfig {
    fn default() -> Self {
        RawProviderConfig {
            selection_policy: default_selection_policy(),
            health_check_interval: default_health_check_interval(),
            circuit_breaker: RawCircuitBreakerConfig::default(),
            providers: Vec::new(),
        }
    }
}

fn default_selection_policy() -> String {
    "ROUND_ROBIN".to_string()
}

fn default_health_check_interval() -> u64 {
    60
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawCircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl Default for RawCircuitBreakerConfig {
    fn default() -> Self {
        RawCircuitBreakerConfig {
            enabled: default_true(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60
}

fn default_half_open_max_calls() -> u32 {
    10
}

/// One entry of `provider.providers[]`: a distinct registered provider
/// instance (e.g. a second AWS account/region) participating in selection.
#[derive(Debug, Deserialize, Serialize)]
pub struct RawProviderInstance {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawLaunchTemplateConfig {
    #[serde(default)]
    pub create_per_request: bool,
    #[serde(default = "default_true")]
    pub reuse_existing: bool,
    #[serde(default = "default_naming_strategy")]
    pub naming_strategy: String,
    #[serde(default)]
    pub cleanup_old_versions: bool,
    #[serde(default = "default_max_versions_per_template")]
    pub max_versions_per_template: u32,
}

impl Default for RawLaunchTemplateConfig {
    fn default() -> Self {
        RawLaunchTemplateConfig {
            create_per_request: false,
            reuse_existing: default_true(),
            naming_strategy: default_naming_strategy(),
            cleanup_old_versions: false,
            max_versions_per_template: default_max_versions_per_template(),
        }
    }
}

fn default_naming_strategy() -> String {
    "hostbroker-{request_id}".to_string()
}

fn default_max_versions_per_template() -> u32 {
    10
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawStorageConfig {
    #[serde(default = "default_storage_strategy")]
    pub strategy: String,
}

impl Default for RawStorageConfig {
    fn default() -> Self {
        RawStorageConfig { strategy: default_storage_strategy() }
    }
}

fn default_storage_strategy() -> String {
    "json".to_string()
}
