//! Wires configuration, storage, the provider strategy, and the four
//! provisioning-API handlers into the context every command/query handler
//! in [`crate::handlers`] is given. A single composition-root struct built
//! once at process start, rather than service-locating dependencies per
//! call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hostbroker_cloud::{AwsClient, AwsClientConfig};
use hostbroker_config::{Config, StorageStrategy};
use hostbroker_provider::{
    AsgHandler, Ec2FleetHandler, LaunchTemplateManager, ProviderHandler, ProviderHandlerRegistry,
    ProviderStrategy, RunInstancesHandler, SpotFleetHandler,
};
use hostbroker_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
use hostbroker_store::Store;

use crate::error::AppError;
use crate::events::{EventPublisher, TracingEventPublisher};
use crate::selection::ProviderSelector;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub strategy: Arc<ProviderStrategy>,
    pub selector: ProviderSelector,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub publisher: Arc<dyn EventPublisher>,
}

impl AppContext {
    /// Build the full runtime: resolve storage, stand up an `AwsClient` for
    /// the region of the first configured provider instance (falling back
    /// to `us-east-1` with none configured), register all four provisioning
    /// handlers, and initialize the strategy that dispatches between them.
    pub async fn bootstrap(config: Config) -> Result<Self, AppError> {
        let store = build_store(&config).await?;

        let region = config
            .provider
            .providers
            .first()
            .map(|p| p.region().to_string())
            .unwrap_or_else(|| "us-east-1".to_string());
        let client = Arc::new(
            AwsClient::new(AwsClientConfig { region })
                .await
                .map_err(|e| AppError::Provisioning(e.to_string()))?,
        );

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.provider.circuit_breaker.failure_threshold,
            reset_timeout: config.provider.circuit_breaker.recovery_timeout,
            half_open_timeout: Duration::from_secs(30),
            half_open_max_calls: config.provider.circuit_breaker.half_open_max_calls,
        };
        let breakers = Arc::new(CircuitBreakerRegistry::new(breaker_config));
        let resilience = hostbroker_provider::resilient::ResilienceContext::new(breakers.clone());
        let launch_templates = Arc::new(LaunchTemplateManager::new(client.clone(), config.launch_template.clone()));

        let mut registry = ProviderHandlerRegistry::new();
        registry.register(Arc::new(RunInstancesHandler::new(client.clone(), resilience.clone())) as Arc<dyn ProviderHandler>);
        registry.register(Arc::new(Ec2FleetHandler::new(
            client.clone(),
            resilience.clone(),
            launch_templates.clone(),
        )) as Arc<dyn ProviderHandler>);
        registry.register(Arc::new(SpotFleetHandler::new(
            client.clone(),
            resilience.clone(),
            launch_templates.clone(),
        )) as Arc<dyn ProviderHandler>);
        registry.register(Arc::new(AsgHandler::new(
            client.clone(),
            resilience.clone(),
            launch_templates.clone(),
        )) as Arc<dyn ProviderHandler>);

        let mut strategy = ProviderStrategy::new();
        strategy.initialize(Arc::new(registry), client.clone());

        Ok(AppContext {
            config,
            store,
            strategy: Arc::new(strategy),
            selector: ProviderSelector::new(),
            breakers,
            publisher: Arc::new(TracingEventPublisher),
        })
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn Store>, AppError> {
    match config.storage.strategy {
        StorageStrategy::Json => {
            let path = std::env::var("HOSTBROKER_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("hostbroker.redb"));
            let store = hostbroker_store::RedbStore::open(&path)?;
            Ok(Arc::new(store))
        }
        StorageStrategy::Sql => {
            let url = std::env::var("DATABASE_URL").map_err(|_| {
                AppError::Validation("DATABASE_URL must be set when storage.strategy is sql".into())
            })?;
            let store = hostbroker_store::PostgresStore::connect(&url).await?;
            Ok(Arc::new(store))
        }
    }
}
