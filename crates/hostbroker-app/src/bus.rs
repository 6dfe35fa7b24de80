//! Thin dispatch layer so callers (the HTTP surface, the CLI) hold one
//! `CommandBus`/`QueryBus` instead of importing every handler function
//! individually.

use std::sync::Arc;

use crate::commands::{Command, CommandOutcome, Query, QueryResult};
use crate::error::AppError;
use crate::handlers;
use crate::runtime::AppContext;

#[derive(Clone)]
pub struct CommandBus {
    ctx: Arc<AppContext>,
}

impl CommandBus {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        CommandBus { ctx }
    }

    pub async fn dispatch(&self, command: Command) -> Result<CommandOutcome, AppError> {
        match command {
            Command::CreateMachineRequest(cmd) => {
                Ok(CommandOutcome::Request(handlers::create_machine_request(&self.ctx, cmd).await?))
            }
            Command::CreateReturnRequest(cmd) => {
                Ok(CommandOutcome::Return(handlers::create_return_request(&self.ctx, cmd).await?))
            }
            Command::UpdateRequestStatus(cmd) => {
                Ok(CommandOutcome::Request(handlers::update_request_status(&self.ctx, cmd).await?))
            }
            Command::CancelRequest(cmd) => {
                Ok(CommandOutcome::Request(handlers::cancel_request(&self.ctx, cmd).await?))
            }
            Command::CompleteRequest(cmd) => {
                Ok(CommandOutcome::Request(handlers::complete_request(&self.ctx, cmd).await?))
            }
            Command::SaveTemplate(cmd) => {
                handlers::save_template(&self.ctx, cmd).await?;
                Ok(CommandOutcome::Unit)
            }
        }
    }
}

#[derive(Clone)]
pub struct QueryBus {
    ctx: Arc<AppContext>,
}

impl QueryBus {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        QueryBus { ctx }
    }

    pub async fn dispatch(&self, query: Query) -> Result<QueryResult, AppError> {
        handlers::handle_query(&self.ctx, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::SaveTemplateCommand;
    use crate::events::TracingEventPublisher;
    use crate::runtime::AppContext;
    use crate::selection::ProviderSelector;
    use hostbroker_config::{
        CircuitBreakerSettings, Config, LaunchTemplateConfig, ProviderConfig, SelectionPolicy,
        StorageConfig, StorageStrategy,
    };
    use hostbroker_domain::{PricingConfig, ProviderApi, Template, TemplateId};
    use hostbroker_provider::ProviderStrategy;
    use hostbroker_resilience::CircuitBreakerRegistry;
    use hostbroker_store::InMemoryStore;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> Arc<AppContext> {
        Arc::new(AppContext {
            config: Config {
                provider: ProviderConfig {
                    selection_policy: SelectionPolicy::RoundRobin,
                    health_check_interval: Duration::from_secs(30),
                    circuit_breaker: CircuitBreakerSettings {
                        enabled: true,
                        failure_threshold: 5,
                        recovery_timeout: Duration::from_secs(30),
                        half_open_max_calls: 1,
                    },
                    providers: Vec::new(),
                },
                launch_template: LaunchTemplateConfig {
                    create_per_request: true,
                    reuse_existing: false,
                    naming_strategy: "per-request".into(),
                    cleanup_old_versions: false,
                    max_versions_per_template: 5,
                },
                storage: StorageConfig { strategy: StorageStrategy::Json },
            },
            store: Arc::new(InMemoryStore::new()),
            strategy: Arc::new(ProviderStrategy::new()),
            selector: ProviderSelector::new(),
            breakers: Arc::new(CircuitBreakerRegistry::new(Default::default())),
            publisher: Arc::new(TracingEventPublisher),
        })
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
    async fn save_template_command_round_trips_through_query_bus() {
        let ctx = ctx();
        let commands = CommandBus::new(ctx.clone());
        let queries = QueryBus::new(ctx);

        let outcome = commands
            .dispatch(Command::SaveTemplate(SaveTemplateCommand { template: template() }))
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Unit));

        let result = queries.dispatch(Query::GetTemplate(TemplateId::new("tpl-1"))).await.unwrap();
        match result {
            QueryResult::Template(Some(t)) => assert_eq!(t.template_id, TemplateId::new("tpl-1")),
            other => panic!("expected a saved template, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_template_command_rejects_an_invalid_template() {
        let ctx = ctx();
        let commands = CommandBus::new(ctx);
        let mut bad = template();
        bad.subnet_ids.clear();
        let err = commands
            .dispatch(Command::SaveTemplate(SaveTemplateCommand { template: bad }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(_)));
    }
}
