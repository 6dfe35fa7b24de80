//! The scheduler-facing HTTP surface: template listing/registration,
//! machine request/return, and status polling, each translating between the
//! wire shapes a host-factory-style scheduler expects and the
//! [`hostbroker_app`] command/query bus.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use hostbroker_app::{
    CancelRequestCommand, Command, CommandOutcome, CreateMachineRequestCommand,
    CreateReturnRequestCommand, Query, QueryResult, SaveTemplateCommand,
};
use hostbroker_domain::{InstanceId, Machine, PriceType, Request, RequestId, RequestStatus, Template, TemplateId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

fn parse_request_id(raw: &str) -> Result<RequestId, ApiError> {
    Uuid::parse_str(raw).map(RequestId).map_err(|_| ApiError::bad_request(format!("invalid requestId: {raw}")))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.queries.dispatch(Query::ListRequests).await?;
    Ok(StatusCode::OK)
}

// ── Templates ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TemplateWire {
    #[serde(rename = "templateId")]
    pub template_id: String,
    #[serde(rename = "imageId")]
    pub image_id: String,
    #[serde(rename = "vmType")]
    pub vm_type: String,
    #[serde(rename = "subnetIds")]
    pub subnet_ids: Vec<String>,
    #[serde(rename = "securityGroupIds")]
    pub security_group_ids: Vec<String>,
    #[serde(rename = "providerApi")]
    pub provider_api: String,
}

impl From<&Template> for TemplateWire {
    fn from(t: &Template) -> Self {
        TemplateWire {
            template_id: t.template_id.to_string(),
            image_id: t.image_id.clone(),
            vm_type: t.instance_type.clone(),
            subnet_ids: t.subnet_ids.clone(),
            security_group_ids: t.security_group_ids.clone(),
            provider_api: t.provider_api.to_string(),
        }
    }
}

pub async fn get_available_templates(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let QueryResult::Templates(templates) = state.queries.dispatch(Query::ListTemplates).await? else {
        return Err(ApiError::internal("unexpected query result"));
    };
    let wire: Vec<TemplateWire> = templates.iter().map(TemplateWire::from).collect();
    Ok(Json(json!({ "templates": wire })))
}

#[derive(Debug, Deserialize)]
pub struct PutTemplateBody {
    pub template: Template,
}

pub async fn put_template(
    State(state): State<AppState>,
    Json(body): Json<PutTemplateBody>,
) -> Result<StatusCode, ApiError> {
    state
        .commands
        .dispatch(Command::SaveTemplate(SaveTemplateCommand { template: body.template }))
        .await?;
    Ok(StatusCode::CREATED)
}

// ── Request machines ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TemplateRef {
    #[serde(rename = "templateId")]
    pub template_id: String,
    #[serde(rename = "maxNumber")]
    pub max_number: u32,
}

#[derive(Debug, Deserialize)]
pub struct RequestMachinesBody {
    pub template: TemplateRef,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct RequestOutputWire {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub message: String,
}

pub async fn request_machines(
    State(state): State<AppState>,
    Json(body): Json<RequestMachinesBody>,
) -> Result<Json<RequestOutputWire>, ApiError> {
    let cmd = CreateMachineRequestCommand {
        template_id: TemplateId::new(body.template.template_id),
        requested_count: body.template.max_number,
        dry_run: body.dry_run,
    };
    let outcome = state.commands.dispatch(Command::CreateMachineRequest(cmd)).await?;
    let CommandOutcome::Request(request) = outcome else {
        return Err(ApiError::internal("unexpected command outcome"));
    };
    Ok(Json(RequestOutputWire {
        request_id: request.request_id.to_string(),
        message: request.status_message.clone().unwrap_or_else(|| "request accepted".to_string()),
    }))
}

// ── Return machines ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MachineRef {
    #[serde(rename = "machineId")]
    pub machine_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RequestReturnMachinesBody {
    pub machines: Vec<MachineRef>,
}

pub async fn request_return_machines(
    State(state): State<AppState>,
    Json(body): Json<RequestReturnMachinesBody>,
) -> Result<Json<RequestOutputWire>, ApiError> {
    let machine_ids: Vec<InstanceId> =
        body.machines.into_iter().map(|m| InstanceId::new(m.machine_id)).collect();
    let cmd = CreateReturnRequestCommand { machine_ids };
    let outcome = state.commands.dispatch(Command::CreateReturnRequest(cmd)).await?;
    let CommandOutcome::Return(ret) = outcome else {
        return Err(ApiError::internal("unexpected command outcome"));
    };
    let message = if ret.overall_success() {
        "return accepted".to_string()
    } else {
        ret.groups.iter().filter_map(|g| g.error.as_deref()).collect::<Vec<_>>().join("; ")
    };
    Ok(Json(RequestOutputWire { request_id: ret.request.request_id.to_string(), message }))
}

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RequestIdRef {
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GetRequestStatusBody {
    pub requests: Vec<RequestIdRef>,
}

#[derive(Debug, Serialize)]
pub struct MachineWire {
    #[serde(rename = "machineId")]
    pub machine_id: String,
    pub name: String,
    pub result: String,
    pub status: String,
    #[serde(rename = "privateIpAddress")]
    pub private_ip_address: Option<String>,
    #[serde(rename = "publicIpAddress")]
    pub public_ip_address: Option<String>,
    pub launchtime: Option<i64>,
    #[serde(rename = "instanceType")]
    pub instance_type: String,
    #[serde(rename = "priceType")]
    pub price_type: Option<String>,
    pub message: String,
    #[serde(rename = "instanceTags")]
    pub instance_tags: HashMap<String, String>,
    #[serde(rename = "cloudHostId")]
    pub cloud_host_id: String,
}

fn machine_result(request_status: RequestStatus, machine: &Machine) -> &'static str {
    if machine.status.is_terminal() {
        return "fail";
    }
    match request_status {
        RequestStatus::Pending | RequestStatus::InProgress => "executing",
        RequestStatus::Failed => "fail",
        _ => "succeed",
    }
}

fn request_status_wire(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending | RequestStatus::InProgress => "running",
        RequestStatus::Completed => "complete",
        RequestStatus::Partial | RequestStatus::Failed | RequestStatus::Cancelled => "complete_with_error",
    }
}

fn price_type_str(p: PriceType) -> String {
    match p {
        PriceType::Ondemand => "ondemand".to_string(),
        PriceType::Spot => "spot".to_string(),
        PriceType::Heterogeneous => "heterogeneous".to_string(),
    }
}

async fn machine_wire(state: &AppState, request: &Request, machine: &Machine) -> MachineWire {
    let price_type = match state.queries.dispatch(Query::GetTemplate(machine.template_id.clone())).await {
        Ok(QueryResult::Template(Some(template))) => template.price_type.map(price_type_str),
        _ => None,
    };
    MachineWire {
        machine_id: machine.instance_id.to_string(),
        name: machine.instance_id.to_string(),
        result: machine_result(request.status, machine).to_string(),
        status: machine.status.to_string(),
        private_ip_address: machine.private_ip.clone(),
        public_ip_address: machine.public_ip.clone(),
        launchtime: machine.launch_time.map(|t| t.timestamp()),
        instance_type: machine.instance_type.clone(),
        price_type,
        message: request.status_message.clone().unwrap_or_default(),
        instance_tags: machine.metadata.clone(),
        cloud_host_id: machine.instance_id.to_string(),
    }
}

pub async fn get_request_status(
    State(state): State<AppState>,
    Json(body): Json<GetRequestStatusBody>,
) -> Result<Json<Value>, ApiError> {
    let mut entries = Vec::with_capacity(body.requests.len());
    for r in body.requests {
        let request_id = parse_request_id(&r.request_id)?;

        let QueryResult::Request(maybe_request) = state.queries.dispatch(Query::GetRequest(request_id)).await?
        else {
            return Err(ApiError::internal("unexpected query result"));
        };
        let request = maybe_request.ok_or_else(|| ApiError::not_found(format!("request {}", r.request_id)))?;

        let QueryResult::Machines(machines) =
            state.queries.dispatch(Query::GetMachinesByRequest(request.request_id)).await?
        else {
            return Err(ApiError::internal("unexpected query result"));
        };

        let mut machine_wires = Vec::with_capacity(machines.len());
        for machine in &machines {
            machine_wires.push(machine_wire(&state, &request, machine).await);
        }

        entries.push(json!({
            "requestId": request.request_id.to_string(),
            "status": request_status_wire(request.status),
            "machines": machine_wires,
            "message": request.status_message.clone().unwrap_or_default(),
        }));
    }
    Ok(Json(json!({ "requests": entries })))
}

// ── Operator endpoints ─────────────────────────────────────────────────────────

pub async fn list_requests(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let QueryResult::Requests(requests) = state.queries.dispatch(Query::ListRequests).await? else {
        return Err(ApiError::internal("unexpected query result"));
    };
    Ok(Json(json!(requests)))
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelRequestBody {
    pub message: Option<String>,
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<CancelRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let request_id = parse_request_id(&request_id)?;
    let cmd = CancelRequestCommand { request_id, message: body.message };
    let outcome = state.commands.dispatch(Command::CancelRequest(cmd)).await?;
    let CommandOutcome::Request(request) = outcome else {
        return Err(ApiError::internal("unexpected command outcome"));
    };
    Ok(Json(json!(request)))
}
