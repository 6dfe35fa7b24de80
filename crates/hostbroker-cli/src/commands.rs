use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use hostbroker_api::build_app;
use hostbroker_app::{
    AppContext, CancelRequestCommand, Command as AppCommand, CommandOutcome,
    CreateMachineRequestCommand, CreateReturnRequestCommand, Query, QueryResult,
    SaveTemplateCommand,
};
use hostbroker_domain::{InstanceId, Machine, Request, RequestId, Template, TemplateId};
use serde_json::{json, Value};

use crate::output;

fn auth_token() -> Arc<String> {
    Arc::new(std::env::var("HOSTBROKER_SERVER_TOKEN").unwrap_or_else(|_| "dev-token".to_string()))
}

async fn local_context(config_path: &Path) -> Result<Arc<AppContext>> {
    let config = hostbroker_config::load_config(config_path)
        .with_context(|| format!("loading config at {}", config_path.display()))?;
    let ctx = AppContext::bootstrap(config).await.context("bootstrapping hostbroker context")?;
    Ok(Arc::new(ctx))
}

pub async fn serve(config_path: PathBuf, bind: String, port: u16) -> Result<()> {
    let ctx = local_context(&config_path).await?;
    let token = auth_token();
    println!("listening on {bind}:{port} (token: {token})");

    let app = build_app(ctx, token);
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── HTTP client for --remote mode ────────────────────────────────────────────

struct RemoteClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl RemoteClient {
    fn new(base: String, token: Option<String>) -> Self {
        RemoteClient { base, token, http: reqwest::Client::new() }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base.trim_end_matches('/'), path);
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        check_status(&resp)?;
        Ok(resp.json().await?)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self.request(reqwest::Method::POST, path).json(&body).send().await?;
        check_status(&resp)?;
        Ok(resp.json().await?)
    }

    async fn put(&self, path: &str, body: Value) -> Result<()> {
        let resp = self.request(reqwest::Method::PUT, path).json(&body).send().await?;
        check_status(&resp)?;
        Ok(())
    }
}

fn check_status(resp: &reqwest::Response) -> Result<()> {
    if !resp.status().is_success() {
        bail!("request failed with status {}", resp.status());
    }
    Ok(())
}

// ── Templates ─────────────────────────────────────────────────────────────────

pub async fn put_template(remote: Option<String>, token: Option<String>, config: PathBuf, path: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let template: Template = serde_json::from_str(&raw).context("parsing template JSON")?;

    if let Some(base) = remote {
        RemoteClient::new(base, token).put("/templates", json!({ "template": template })).await?;
    } else {
        let ctx = local_context(&config).await?;
        let bus = hostbroker_app::CommandBus::new(ctx);
        bus.dispatch(AppCommand::SaveTemplate(SaveTemplateCommand { template })).await?;
    }
    println!("template saved");
    Ok(())
}

pub async fn list_templates(remote: Option<String>, token: Option<String>, config: PathBuf) -> Result<()> {
    let templates: Vec<Template> = if let Some(base) = remote {
        let body = RemoteClient::new(base, token).get("/templates").await?;
        serde_json::from_value(body["templates"].clone()).unwrap_or_default()
    } else {
        let ctx = local_context(&config).await?;
        let bus = hostbroker_app::QueryBus::new(ctx);
        let QueryResult::Templates(t) = bus.dispatch(Query::ListTemplates).await? else {
            bail!("unexpected query result");
        };
        t
    };
    print!("{}", output::render_templates(&templates));
    Ok(())
}

// ── Request / return machines ─────────────────────────────────────────────────

pub async fn request_machines(
    remote: Option<String>,
    token: Option<String>,
    config: PathBuf,
    template_id: String,
    count: u32,
    dry_run: bool,
) -> Result<()> {
    if let Some(base) = remote {
        let body = RemoteClient::new(base, token)
            .post(
                "/requestMachines",
                json!({ "template": { "templateId": template_id, "maxNumber": count }, "dry_run": dry_run }),
            )
            .await?;
        println!("request {} — {}", body["requestId"], body["message"]);
    } else {
        let ctx = local_context(&config).await?;
        let bus = hostbroker_app::CommandBus::new(ctx);
        let cmd = CreateMachineRequestCommand { template_id: TemplateId::new(template_id), requested_count: count, dry_run };
        let CommandOutcome::Request(request) = bus.dispatch(AppCommand::CreateMachineRequest(cmd)).await? else {
            bail!("unexpected command outcome");
        };
        println!("request {} — status {:?}", request.request_id, request.status);
    }
    Ok(())
}

pub async fn return_machines(
    remote: Option<String>,
    token: Option<String>,
    config: PathBuf,
    machine_ids: Vec<String>,
) -> Result<()> {
    if machine_ids.is_empty() {
        bail!("at least one machine id is required");
    }
    if let Some(base) = remote {
        let machines: Vec<Value> = machine_ids.iter().map(|id| json!({ "machineId": id })).collect();
        let body =
            RemoteClient::new(base, token).post("/requestReturnMachines", json!({ "machines": machines })).await?;
        println!("return request {} — {}", body["requestId"], body["message"]);
    } else {
        let ctx = local_context(&config).await?;
        let bus = hostbroker_app::CommandBus::new(ctx);
        let cmd = CreateReturnRequestCommand { machine_ids: machine_ids.into_iter().map(InstanceId::new).collect() };
        let CommandOutcome::Return(outcome) = bus.dispatch(AppCommand::CreateReturnRequest(cmd)).await? else {
            bail!("unexpected command outcome");
        };
        println!("return request {} — overall success: {}", outcome.request.request_id, outcome.overall_success());
    }
    Ok(())
}

// ── Status / requests ──────────────────────────────────────────────────────────

pub async fn status(
    remote: Option<String>,
    token: Option<String>,
    config: PathBuf,
    request_ids: Vec<String>,
) -> Result<()> {
    if request_ids.is_empty() {
        bail!("at least one request id is required");
    }
    if let Some(base) = remote {
        let refs: Vec<Value> = request_ids.iter().map(|id| json!({ "requestId": id })).collect();
        let body = RemoteClient::new(base, token).post("/getRequestStatus", json!({ "requests": refs })).await?;
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        let ctx = local_context(&config).await?;
        let bus = hostbroker_app::QueryBus::new(ctx);
        for raw_id in request_ids {
            let uuid = uuid::Uuid::parse_str(&raw_id).with_context(|| format!("invalid request id: {raw_id}"))?;
            let request_id = RequestId(uuid);
            let QueryResult::Request(maybe_request) = bus.dispatch(Query::GetRequest(request_id)).await? else {
                bail!("unexpected query result");
            };
            let request: Request = maybe_request.ok_or_else(|| anyhow::anyhow!("request {raw_id} not found"))?;
            let QueryResult::Machines(machines) = bus.dispatch(Query::GetMachinesByRequest(request_id)).await? else {
                bail!("unexpected query result");
            };
            let machines: Vec<Machine> = machines;
            print!("{}", output::render_status(&request, &machines));
        }
    }
    Ok(())
}

pub async fn list_requests(remote: Option<String>, token: Option<String>, config: PathBuf) -> Result<()> {
    let requests: Vec<Request> = if let Some(base) = remote {
        let body = RemoteClient::new(base, token).get("/requests").await?;
        serde_json::from_value(body).unwrap_or_default()
    } else {
        let ctx = local_context(&config).await?;
        let bus = hostbroker_app::QueryBus::new(ctx);
        let QueryResult::Requests(r) = bus.dispatch(Query::ListRequests).await? else {
            bail!("unexpected query result");
        };
        r
    };
    print!("{}", output::render_requests(&requests));
    Ok(())
}

pub async fn cancel(
    remote: Option<String>,
    token: Option<String>,
    config: PathBuf,
    request_id: String,
    message: Option<String>,
) -> Result<()> {
    if let Some(base) = remote {
        let body = RemoteClient::new(base, token)
            .request(reqwest::Method::POST, &format!("/requests/{request_id}/cancel"))
            .json(&json!({ "message": message }))
            .send()
            .await?;
        check_status(&body)?;
    } else {
        let ctx = local_context(&config).await?;
        let bus = hostbroker_app::CommandBus::new(ctx);
        let uuid = uuid::Uuid::parse_str(&request_id).with_context(|| format!("invalid request id: {request_id}"))?;
        let cmd = CancelRequestCommand { request_id: RequestId(uuid), message };
        bus.dispatch(AppCommand::CancelRequest(cmd)).await?;
    }
    println!("request {request_id} cancelled");
    Ok(())
}
