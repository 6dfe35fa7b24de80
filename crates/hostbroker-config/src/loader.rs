use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::model::{
    CircuitBreakerSettings, Config, LaunchTemplateConfig, ProviderConfig, ProviderInstanceConfig,
    SelectionPolicy, StorageConfig, StorageStrategy,
};
use crate::raw::{RawCircuitBreakerConfig, RawConfig, RawLaunchTemplateConfig, RawProviderConfig, RawProviderInstance, RawStorageConfig};

/// Load and validate the config file at `path`.
///
/// Missing file is not an error: an absent config simply means every knob
/// takes its default (no provider instances registered, JSON storage,
/// round-robin selection) the same way an absent `config.yml` meant an
/// empty partition list in the enclave loader this was adapted from.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "config file absent, using defaults");
        return convert_config(RawConfig {
            provider: RawProviderConfig::default(),
            launch_template: RawLaunchTemplateConfig::default(),
            storage: RawStorageConfig::default(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!(path = %path.display(), "loaded config");
    convert_config(raw)
}

fn convert_config(raw: RawConfig) -> Result<Config, ConfigError> {
    Ok(Config {
        provider: convert_provider(raw.provider)?,
        launch_template: convert_launch_template(raw.launch_template),
        storage: convert_storage(raw.storage)?,
    })
}

fn convert_provider(raw: RawProviderConfig) -> Result<ProviderConfig, ConfigError> {
    let selection_policy = parse_selection_policy(&raw.selection_policy)?;
    let circuit_breaker = convert_circuit_breaker(raw.circuit_breaker);
    let providers = raw.providers.into_iter().map(convert_provider_instance).collect();

    Ok(ProviderConfig {
        selection_policy,
        health_check_interval: Duration::from_secs(raw.health_check_interval),
        circuit_breaker,
        providers,
    })
}

fn convert_circuit_breaker(raw: RawCircuitBreakerConfig) -> CircuitBreakerSettings {
    CircuitBreakerSettings {
        enabled: raw.enabled,
        failure_threshold: raw.failure_threshold,
        recovery_timeout: Duration::from_secs(raw.recovery_timeout),
        half_open_max_calls: raw.half_open_max_calls,
    }
}

fn convert_provider_instance(raw: RawProviderInstance) -> ProviderInstanceConfig {
    ProviderInstanceConfig {
        name: raw.name,
        provider_type: raw.provider_type,
        enabled: raw.enabled,
        priority: raw.priority,
        weight: raw.weight.max(1),
        capabilities: raw.capabilities,
        config: raw.config,
    }
}

fn convert_launch_template(raw: RawLaunchTemplateConfig) -> LaunchTemplateConfig {
    LaunchTemplateConfig {
        create_per_request: raw.create_per_request,
        reuse_existing: raw.reuse_existing,
        naming_strategy: raw.naming_strategy,
        cleanup_old_versions: raw.cleanup_old_versions,
        max_versions_per_template: raw.max_versions_per_template,
    }
}

fn convert_storage(raw: RawStorageConfig) -> Result<StorageConfig, ConfigError> {
    Ok(StorageConfig { strategy: parse_storage_strategy(&raw.strategy)? })
}

fn parse_selection_policy(s: &str) -> Result<SelectionPolicy, ConfigError> {
    match s {
        "ROUND_ROBIN" => Ok(SelectionPolicy::RoundRobin),
        "WEIGHTED_ROUND_ROBIN" => Ok(SelectionPolicy::WeightedRoundRobin),
        "HEALTH_BASED" => Ok(SelectionPolicy::HealthBased),
        "CAPABILITY_BASED" => Ok(SelectionPolicy::CapabilityBased),
        other => Err(ConfigError::Conversion {
            path: "provider.selection_policy".to_string(),
            message: format!("unknown selection policy '{}'", other),
        }),
    }
}

fn parse_storage_strategy(s: &str) -> Result<StorageStrategy, ConfigError> {
    match s {
        "json" => Ok(StorageStrategy::Json),
        "sql" => Ok(StorageStrategy::Sql),
        other => Err(ConfigError::Conversion {
            path: "storage.strategy".to_string(),
            message: format!("unknown storage strategy '{}'", other),
        }),
    }
}
