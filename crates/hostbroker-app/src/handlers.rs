//! Command/query orchestration. Each `create_*` function is one
//! unit-of-work boundary: every domain mutation goes through
//! [`UnitOfWork::save_request`]/`save_machine` and events are only handed to
//! the [`EventPublisher`] after the matching save succeeds.

use std::collections::HashMap;

use chrono::Utc;
use futures::future::join_all;
use hostbroker_domain::{
    InstanceId, Machine, OperationContext, OperationType, ProviderApi, ProviderOperation, Request,
    RequestStatus, RequestType, ResourceMappingHint, Template, TemplateId,
};
use hostbroker_provider::{AcquireOutcome, MachineObservation, ReleaseOutcome};
use hostbroker_store::UnitOfWork;

use crate::capability::validate_strict;
use crate::commands::{
    CancelRequestCommand, CompleteRequestCommand, CreateMachineRequestCommand,
    CreateReturnRequestCommand, Query, QueryResult, ReturnGroupOutcome, ReturnOutcome,
    SaveTemplateCommand, UpdateRequestStatusCommand,
};
use crate::error::AppError;
use crate::events::publish_all;
use crate::runtime::AppContext;

pub async fn create_machine_request(
    ctx: &AppContext,
    cmd: CreateMachineRequestCommand,
) -> Result<Request, AppError> {
    let template = ctx
        .store
        .get_template(&cmd.template_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("template {}", cmd.template_id)))?;

    let provider_instance = ctx
        .selector
        .select(
            ctx.config.provider.selection_policy,
            &ctx.config.provider.providers,
            &template.provider_api.to_string(),
            &ctx.breakers,
        )
        .await?;

    validate_strict(&template, provider_instance)?;

    let now = Utc::now();
    let mut request = Request::new(
        RequestType::Acquire,
        cmd.template_id.clone(),
        cmd.requested_count,
        template.provider_api,
        now,
    )?;
    request
        .metadata
        .insert("provider_instance".into(), serde_json::json!(provider_instance.name));

    let mut uow = UnitOfWork::new(ctx.store.clone());
    uow.save_request(&mut request).await?;

    if cmd.dry_run {
        // No (Pending, Completed) arm exists in the transition table, so a
        // dry run walks the same two hops a real success would.
        request.transition_to(RequestStatus::InProgress, None, Utc::now())?;
        uow.save_request(&mut request).await?;
        request.transition_to(RequestStatus::Completed, Some("dry run".into()), Utc::now())?;
        uow.save_request(&mut request).await?;
        publish_all(ctx.publisher.as_ref(), &uow.take_events());
        return Ok(request);
    }

    request.transition_to(RequestStatus::InProgress, None, Utc::now())?;
    uow.save_request(&mut request).await?;

    match provision(ctx, &mut uow, &mut request, &template).await {
        Ok(()) => {
            publish_all(ctx.publisher.as_ref(), &uow.take_events());
            Ok(request)
        }
        Err(err) => {
            let message = err.to_string();
            if request.transition_to(RequestStatus::Failed, Some(message), Utc::now()).is_ok() {
                let _ = uow.save_request(&mut request).await;
            }
            publish_all(ctx.publisher.as_ref(), &uow.take_events());
            Err(err)
        }
    }
}

async fn provision(
    ctx: &AppContext,
    uow: &mut UnitOfWork,
    request: &mut Request,
    template: &Template,
) -> Result<(), AppError> {
    let mut parameters = HashMap::new();
    parameters.insert("request".to_string(), serde_json::to_value(&*request)?);
    parameters.insert("template".to_string(), serde_json::to_value(template)?);
    let op = ProviderOperation {
        operation_type: OperationType::CreateInstances,
        parameters,
        context: OperationContext::new(Some(request.request_id), false),
    };

    let result = ctx.strategy.execute(op).await;
    if !result.success {
        return Err(AppError::Provisioning(
            result.error.map(|e| e.to_string()).unwrap_or_else(|| "provider returned failure".into()),
        ));
    }

    let outcome: AcquireOutcome = serde_json::from_value(result.data)?;
    if !outcome.success {
        return Err(AppError::Provisioning(
            outcome.error_message.unwrap_or_else(|| "acquire failed".into()),
        ));
    }

    for resource_id in &outcome.resource_ids {
        request.add_resource_id(resource_id.clone());
    }
    request.add_instance_ids(outcome.instances.iter().map(|o| o.instance_id.clone()));
    if let serde_json::Value::Object(fields) = &outcome.provider_data {
        for (key, value) in fields {
            request.metadata.insert(key.clone(), value.clone());
        }
    }

    for observation in &outcome.instances {
        let machine = machine_from_observation(request, observation);
        uow.save_machine(&machine).await?;
    }

    let fulfilled = outcome.instances.len() as u32;
    let (next_status, message, error_type) = if fulfilled == 0 {
        (RequestStatus::Failed, Some("no instances were fulfilled".to_string()), Some("no_capacity"))
    } else if fulfilled < request.requested_count {
        (
            RequestStatus::Partial,
            Some(format!("{fulfilled} of {} instances fulfilled", request.requested_count)),
            Some("partial_fulfillment"),
        )
    } else if !outcome.fleet_errors.is_empty() {
        (
            RequestStatus::Partial,
            Some(format!(
                "{fulfilled} instances fulfilled with {} fleet error(s)",
                outcome.fleet_errors.len()
            )),
            Some("fleet_errors"),
        )
    } else {
        (RequestStatus::Completed, None, None)
    };

    if !outcome.fleet_errors.is_empty() {
        request.metadata.insert("fleet_errors".into(), serde_json::json!(outcome.fleet_errors));
    }
    if let Some(message) = &message {
        request.metadata.insert("error_message".into(), serde_json::json!(message));
    }
    if let Some(error_type) = error_type {
        request.metadata.insert("error_type".into(), serde_json::json!(error_type));
    }

    request.transition_to(next_status, message, Utc::now())?;
    uow.save_request(request).await?;
    Ok(())
}

fn machine_from_observation(request: &Request, observation: &MachineObservation) -> Machine {
    Machine {
        instance_id: observation.instance_id.clone(),
        request_id: request.request_id,
        template_id: request.template_id.clone(),
        provider_api: request.provider_api,
        instance_type: observation.instance_type.clone(),
        image_id: observation.image_id.clone(),
        status: observation.status,
        private_ip: observation.private_ip.clone(),
        public_ip: observation.public_ip.clone(),
        launch_time: observation.launch_time,
        metadata: HashMap::new(),
    }
}

pub async fn create_return_request(
    ctx: &AppContext,
    cmd: CreateReturnRequestCommand,
) -> Result<ReturnOutcome, AppError> {
    if cmd.machine_ids.is_empty() {
        return Err(AppError::Validation("machine_ids must not be empty".into()));
    }

    let mut machines = Vec::with_capacity(cmd.machine_ids.len());
    for instance_id in &cmd.machine_ids {
        let machine = ctx
            .store
            .get_machine(instance_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("machine {instance_id}")))?;
        machines.push(machine);
    }

    let representative = &machines[0];
    let now = Utc::now();
    let mut request = Request::new(
        RequestType::Return,
        representative.template_id.clone(),
        machines.len() as u32,
        representative.provider_api,
        now,
    )?;
    request.add_instance_ids(machines.iter().map(|m| m.instance_id.clone()));

    let mut uow = UnitOfWork::new(ctx.store.clone());
    uow.save_request(&mut request).await?;
    publish_all(ctx.publisher.as_ref(), &uow.take_events());

    request.transition_to(RequestStatus::InProgress, None, Utc::now())?;
    uow.save_request(&mut request).await?;
    publish_all(ctx.publisher.as_ref(), &uow.take_events());

    let mut groups: HashMap<TemplateId, Vec<Machine>> = HashMap::new();
    for machine in machines {
        groups.entry(machine.template_id.clone()).or_default().push(machine);
    }

    let group_futures = groups.into_iter().map(|(template_id, members)| release_group(ctx, template_id, members));
    let outcomes: Vec<ReturnGroupOutcome> = join_all(group_futures).await;

    let succeeded = outcomes.iter().filter(|g| g.success).count();
    let (next_status, message, error_type) = if succeeded == outcomes.len() {
        (RequestStatus::Completed, None, None)
    } else if succeeded == 0 {
        (
            RequestStatus::Failed,
            Some("every template group failed to release".to_string()),
            Some("release_failure"),
        )
    } else {
        (
            RequestStatus::Partial,
            Some(format!("{succeeded} of {} template groups released", outcomes.len())),
            Some("release_failure"),
        )
    };

    let fleet_errors: Vec<String> = outcomes.iter().filter_map(|g| g.error.clone()).collect();
    if !fleet_errors.is_empty() {
        request.metadata.insert("fleet_errors".into(), serde_json::json!(fleet_errors));
    }
    if let Some(message) = &message {
        request.metadata.insert("error_message".into(), serde_json::json!(message));
    }
    if let Some(error_type) = error_type {
        request.metadata.insert("error_type".into(), serde_json::json!(error_type));
    }

    request.transition_to(next_status, message, Utc::now())?;
    uow.save_request(&mut request).await?;
    publish_all(ctx.publisher.as_ref(), &uow.take_events());

    Ok(ReturnOutcome { request, groups: outcomes })
}

async fn release_group(ctx: &AppContext, template_id: TemplateId, members: Vec<Machine>) -> ReturnGroupOutcome {
    let instance_ids: Vec<InstanceId> = members.iter().map(|m| m.instance_id.clone()).collect();
    let provider_api = members[0].provider_api;

    match release_group_inner(ctx, provider_api, &members).await {
        Ok(outcome) if outcome.overall_success() => {
            ReturnGroupOutcome { template_id, instance_ids, success: true, error: None }
        }
        Ok(outcome) => ReturnGroupOutcome {
            template_id,
            instance_ids,
            success: false,
            error: Some(outcome.fleet_errors().join("; ")),
        },
        Err(err) => ReturnGroupOutcome { template_id, instance_ids, success: false, error: Some(err.to_string()) },
    }
}

async fn release_group_inner(
    ctx: &AppContext,
    provider_api: ProviderApi,
    members: &[Machine],
) -> Result<ReleaseOutcome, AppError> {
    let instance_ids: Vec<InstanceId> = members.iter().map(|m| m.instance_id.clone()).collect();
    let resource_mapping = build_resource_mapping(ctx, members).await?;

    let mut parameters = HashMap::new();
    parameters.insert("instance_ids".to_string(), serde_json::to_value(&instance_ids)?);
    parameters.insert("resource_mapping".to_string(), serde_json::to_value(&resource_mapping)?);
    parameters.insert("provider_api".to_string(), serde_json::to_value(provider_api)?);
    let op = ProviderOperation {
        operation_type: OperationType::TerminateInstances,
        parameters,
        context: OperationContext::new(None, false),
    };

    let result = ctx.strategy.execute(op).await;
    if !result.success {
        return Err(AppError::Provisioning(
            result.error.map(|e| e.to_string()).unwrap_or_else(|| "provider returned failure".into()),
        ));
    }
    Ok(serde_json::from_value(result.data)?)
}

/// Looks up each machine's owning request to recover the fleet/ASG resource
/// id and the capacity it was requested against, so the release path can
/// skip a discovery round-trip (`group_by_mapping` in the provider crate).
async fn build_resource_mapping(ctx: &AppContext, members: &[Machine]) -> Result<Vec<ResourceMappingHint>, AppError> {
    let mut hints = Vec::with_capacity(members.len());
    for machine in members {
        let owner = ctx.store.get_request(&machine.request_id).await?;
        let (resource_id, desired_capacity) = match owner {
            Some(req) => (req.resource_ids.first().cloned(), req.requested_count),
            None => (None, 0),
        };
        hints.push(ResourceMappingHint {
            instance_id: machine.instance_id.clone(),
            resource_id,
            desired_capacity,
        });
    }
    Ok(hints)
}

pub async fn update_request_status(ctx: &AppContext, cmd: UpdateRequestStatusCommand) -> Result<Request, AppError> {
    let request = ctx
        .store
        .get_request(&cmd.request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {}", cmd.request_id)))?;

    let mut parameters = HashMap::new();
    parameters.insert("request".to_string(), serde_json::to_value(&request)?);
    parameters.insert("provider_api".to_string(), serde_json::to_value(request.provider_api)?);
    let op = ProviderOperation {
        operation_type: OperationType::GetInstanceStatus,
        parameters,
        context: OperationContext::new(Some(request.request_id), false),
    };

    let result = ctx.strategy.execute(op).await;
    if !result.success {
        return Err(AppError::Provisioning(
            result.error.map(|e| e.to_string()).unwrap_or_else(|| "provider returned failure".into()),
        ));
    }
    let observations: Vec<MachineObservation> = serde_json::from_value(result.data)?;

    let mut uow = UnitOfWork::new(ctx.store.clone());
    for observation in observations {
        if let Some(mut machine) = ctx.store.get_machine(&observation.instance_id).await? {
            machine.mark_status(observation.status);
            machine.private_ip = observation.private_ip;
            machine.public_ip = observation.public_ip;
            uow.save_machine(&machine).await?;
        }
    }
    publish_all(ctx.publisher.as_ref(), &uow.take_events());

    Ok(request)
}

pub async fn cancel_request(ctx: &AppContext, cmd: CancelRequestCommand) -> Result<Request, AppError> {
    let mut request = ctx
        .store
        .get_request(&cmd.request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {}", cmd.request_id)))?;

    request.cancel(Utc::now())?;
    if let Some(message) = cmd.message {
        request.status_message = Some(message);
    }

    let mut uow = UnitOfWork::new(ctx.store.clone());
    uow.save_request(&mut request).await?;
    publish_all(ctx.publisher.as_ref(), &uow.take_events());
    Ok(request)
}

pub async fn complete_request(ctx: &AppContext, cmd: CompleteRequestCommand) -> Result<Request, AppError> {
    let mut request = ctx
        .store
        .get_request(&cmd.request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {}", cmd.request_id)))?;

    if request.status.is_terminal() {
        return Err(AppError::Validation(format!(
            "request {} is already in terminal state {}",
            request.request_id, request.status
        )));
    }
    request.transition_to(RequestStatus::Completed, cmd.message, Utc::now())?;

    let mut uow = UnitOfWork::new(ctx.store.clone());
    uow.save_request(&mut request).await?;
    publish_all(ctx.publisher.as_ref(), &uow.take_events());
    Ok(request)
}

pub async fn save_template(ctx: &AppContext, cmd: SaveTemplateCommand) -> Result<(), AppError> {
    cmd.template.validate()?;
    ctx.store.save_template(&cmd.template).await?;
    Ok(())
}

pub async fn handle_query(ctx: &AppContext, query: Query) -> Result<QueryResult, AppError> {
    match query {
        Query::GetTemplate(id) => Ok(QueryResult::Template(ctx.store.get_template(&id).await?)),
        Query::ListTemplates => Ok(QueryResult::Templates(ctx.store.list_templates().await?)),
        Query::GetRequest(id) => Ok(QueryResult::Request(ctx.store.get_request(&id).await?)),
        Query::ListRequests => Ok(QueryResult::Requests(ctx.store.list_requests().await?)),
        Query::GetMachinesByRequest(id) => {
            Ok(QueryResult::Machines(ctx.store.list_machines_by_request(&id).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbroker_cloud::{AwsClient, TestCredentials};
    use hostbroker_config::{
        CircuitBreakerSettings, Config, LaunchTemplateConfig, ProviderConfig, ProviderInstanceConfig,
        SelectionPolicy, StorageConfig, StorageStrategy,
    };
    use hostbroker_domain::{DomainError, PricingConfig, RequestId, RequestType};
    use hostbroker_provider::resilient::ResilienceContext;
    use hostbroker_provider::{ProviderHandler, ProviderHandlerRegistry, ProviderStrategy, RunInstancesHandler};
    use hostbroker_resilience::CircuitBreakerRegistry;
    use hostbroker_store::InMemoryStore;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> Config {
        Config {
            provider: ProviderConfig {
                selection_policy: SelectionPolicy::RoundRobin,
                health_check_interval: Duration::from_secs(30),
                circuit_breaker: CircuitBreakerSettings {
                    enabled: true,
                    failure_threshold: 5,
                    recovery_timeout: Duration::from_secs(30),
                    half_open_max_calls: 1,
                },
                providers: vec![ProviderInstanceConfig {
                    name: "primary".into(),
                    provider_type: "aws".into(),
                    enabled: true,
                    priority: 0,
                    weight: 1,
                    capabilities: Vec::new(),
                    config: HashMap::new(),
                }],
            },
            launch_template: LaunchTemplateConfig {
                create_per_request: true,
                reuse_existing: false,
                naming_strategy: "per-request".into(),
                cleanup_old_versions: false,
                max_versions_per_template: 5,
            },
            storage: StorageConfig { strategy: StorageStrategy::Json },
        }
    }

    async fn ctx_with_run_instances(server: &MockServer) -> AppContext {
        let client = std::sync::Arc::new(AwsClient::with_test_config(
            "us-east-1",
            server.uri(),
            server.uri(),
            TestCredentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            },
        ));
        let breakers = std::sync::Arc::new(CircuitBreakerRegistry::new(Default::default()));
        let resilience = ResilienceContext::new(breakers.clone());
        let mut registry = ProviderHandlerRegistry::new();
        registry.register(
            std::sync::Arc::new(RunInstancesHandler::new(client.clone(), resilience)) as std::sync::Arc<dyn ProviderHandler>
        );
        let mut strategy = ProviderStrategy::new();
        strategy.initialize(std::sync::Arc::new(registry), client);

        AppContext {
            config: test_config(),
            store: std::sync::Arc::new(InMemoryStore::new()),
            strategy: std::sync::Arc::new(strategy),
            selector: crate::selection::ProviderSelector::new(),
            breakers,
            publisher: std::sync::Arc::new(crate::events::TracingEventPublisher),
        }
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
    async fn create_machine_request_provisions_and_completes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<RunInstancesResponse><reservationId>r-1</reservationId><instancesSet><item>\
                 <instanceId>i-0123456789abcdef0</instanceId><instanceType>m5.large</instanceType>\
                 <instanceState><name>pending</name></instanceState></item></instancesSet>\
                 </RunInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let ctx = ctx_with_run_instances(&server).await;
        ctx.store.save_template(&template()).await.unwrap();

        let cmd = CreateMachineRequestCommand {
            template_id: TemplateId::new("tpl-1"),
            requested_count: 1,
            dry_run: false,
        };
        let request = create_machine_request(&ctx, cmd).await.unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.instance_ids.len(), 1);
    }

    #[tokio::test]
    async fn create_machine_request_missing_template_is_not_found() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let cmd = CreateMachineRequestCommand {
            template_id: TemplateId::new("does-not-exist"),
            requested_count: 1,
            dry_run: false,
        };
        let err = create_machine_request(&ctx, cmd).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_machine_request_dry_run_skips_provisioning() {
        // No mock is mounted; a dry run must not make any cloud call.
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        ctx.store.save_template(&template()).await.unwrap();

        let cmd = CreateMachineRequestCommand {
            template_id: TemplateId::new("tpl-1"),
            requested_count: 1,
            dry_run: true,
        };
        let request = create_machine_request(&ctx, cmd).await.unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.status_message.as_deref(), Some("dry run"));
        assert!(request.instance_ids.is_empty());
    }

    #[tokio::test]
    async fn create_machine_request_partial_fulfillment_records_error_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<RunInstancesResponse><reservationId>r-1</reservationId><instancesSet><item>\
                 <instanceId>i-0123456789abcdef0</instanceId><instanceType>m5.large</instanceType>\
                 <instanceState><name>pending</name></instanceState></item></instancesSet>\
                 </RunInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let ctx = ctx_with_run_instances(&server).await;
        ctx.store.save_template(&template()).await.unwrap();

        let cmd = CreateMachineRequestCommand {
            template_id: TemplateId::new("tpl-1"),
            requested_count: 2,
            dry_run: false,
        };
        let request = create_machine_request(&ctx, cmd).await.unwrap();
        assert_eq!(request.status, RequestStatus::Partial);
        assert_eq!(request.metadata.get("error_type").and_then(|v| v.as_str()), Some("partial_fulfillment"));
        assert!(request.metadata.get("error_message").is_some());
    }

    #[tokio::test]
    async fn create_return_request_rejects_empty_machine_ids() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let err = create_return_request(&ctx, CreateReturnRequestCommand { machine_ids: Vec::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn create_return_request_unknown_machine_is_not_found() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let err = create_return_request(
            &ctx,
            CreateReturnRequestCommand { machine_ids: vec![InstanceId::new("i-missing")] },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_return_request_releases_known_machines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<TerminateInstancesResponse><instancesSet><item><instanceId>i-1</instanceId>\
                 <currentState><name>shutting-down</name></currentState>\
                 <previousState><name>running</name></previousState></item></instancesSet>\
                 </TerminateInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let ctx = ctx_with_run_instances(&server).await;
        let owner = Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 1, ProviderApi::RunInstances, Utc::now()).unwrap();
        ctx.store.save_request(&owner).await.unwrap();
        let machine = Machine {
            instance_id: InstanceId::new("i-1"),
            request_id: owner.request_id,
            template_id: TemplateId::new("tpl-1"),
            provider_api: ProviderApi::RunInstances,
            instance_type: "m5.large".into(),
            image_id: None,
            status: hostbroker_domain::MachineStatus::Running,
            private_ip: None,
            public_ip: None,
            launch_time: None,
            metadata: HashMap::new(),
        };
        ctx.store.save_machine(&machine).await.unwrap();

        let outcome = create_return_request(&ctx, CreateReturnRequestCommand { machine_ids: vec![InstanceId::new("i-1")] })
            .await
            .unwrap();
        assert!(outcome.overall_success());
        assert_eq!(outcome.request.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn update_request_status_unknown_request_is_not_found() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let err = update_request_status(&ctx, UpdateRequestStatusCommand { request_id: RequestId::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_request_status_with_no_tracked_instances_makes_no_cloud_call() {
        // `request.instance_ids` is empty, so `describe_instances` short-circuits
        // without a call — no mock is mounted to prove it.
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let request = Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 1, ProviderApi::RunInstances, Utc::now()).unwrap();
        ctx.store.save_request(&request).await.unwrap();

        let refreshed = update_request_status(&ctx, UpdateRequestStatusCommand { request_id: request.request_id })
            .await
            .unwrap();
        assert_eq!(refreshed.request_id, request.request_id);
    }

    #[tokio::test]
    async fn cancel_request_moves_a_pending_request_to_cancelled() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let request = Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 1, ProviderApi::RunInstances, Utc::now()).unwrap();
        ctx.store.save_request(&request).await.unwrap();

        let cancelled = cancel_request(
            &ctx,
            CancelRequestCommand { request_id: request.request_id, message: Some("operator cancelled".into()) },
        )
        .await
        .unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert_eq!(cancelled.status_message.as_deref(), Some("operator cancelled"));
    }

    #[tokio::test]
    async fn complete_request_moves_an_in_progress_request_to_completed() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let mut request = Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 1, ProviderApi::RunInstances, Utc::now()).unwrap();
        request.transition_to(RequestStatus::InProgress, None, Utc::now()).unwrap();
        ctx.store.save_request(&request).await.unwrap();

        let completed = complete_request(&ctx, CompleteRequestCommand { request_id: request.request_id, message: None })
            .await
            .unwrap();
        assert_eq!(completed.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn complete_request_rejects_an_already_partial_request() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let mut request = Request::new(RequestType::Acquire, TemplateId::new("tpl-1"), 2, ProviderApi::RunInstances, Utc::now()).unwrap();
        request.transition_to(RequestStatus::InProgress, None, Utc::now()).unwrap();
        request.transition_to(RequestStatus::Partial, Some("1 of 2 instances fulfilled".into()), Utc::now()).unwrap();
        ctx.store.save_request(&request).await.unwrap();

        let err = complete_request(&ctx, CompleteRequestCommand { request_id: request.request_id, message: None })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn save_template_rejects_invalid_template() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        let mut bad = template();
        bad.subnet_ids.clear();
        let err = save_template(&ctx, SaveTemplateCommand { template: bad }).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn handle_query_lists_saved_templates() {
        let server = MockServer::start().await;
        let ctx = ctx_with_run_instances(&server).await;
        ctx.store.save_template(&template()).await.unwrap();

        let result = handle_query(&ctx, Query::ListTemplates).await.unwrap();
        match result {
            QueryResult::Templates(templates) => assert_eq!(templates.len(), 1),
            other => panic!("expected Templates, got {other:?}"),
        }
    }
}
