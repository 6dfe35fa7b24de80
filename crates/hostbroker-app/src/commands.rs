use hostbroker_domain::{InstanceId, Machine, Request, RequestId, Template, TemplateId};

#[derive(Debug, Clone)]
pub struct CreateMachineRequestCommand {
    pub template_id: TemplateId,
    pub requested_count: u32,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct CreateReturnRequestCommand {
    pub machine_ids: Vec<InstanceId>,
}

#[derive(Debug, Clone)]
pub struct UpdateRequestStatusCommand {
    pub request_id: RequestId,
}

#[derive(Debug, Clone)]
pub struct CancelRequestCommand {
    pub request_id: RequestId,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompleteRequestCommand {
    pub request_id: RequestId,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SaveTemplateCommand {
    pub template: Template,
}

#[derive(Debug, Clone)]
pub enum Command {
    CreateMachineRequest(CreateMachineRequestCommand),
    CreateReturnRequest(CreateReturnRequestCommand),
    UpdateRequestStatus(UpdateRequestStatusCommand),
    CancelRequest(CancelRequestCommand),
    CompleteRequest(CompleteRequestCommand),
    SaveTemplate(SaveTemplateCommand),
}

/// Per-template-group outcome of a return request, surfaced so the caller
/// can see which groups failed without losing the ones that succeeded.
#[derive(Debug, Clone)]
pub struct ReturnGroupOutcome {
    pub template_id: TemplateId,
    pub instance_ids: Vec<InstanceId>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReturnOutcome {
    pub request: Request,
    pub groups: Vec<ReturnGroupOutcome>,
}

impl ReturnOutcome {
    pub fn overall_success(&self) -> bool {
        self.groups.iter().all(|g| g.success)
    }
}

#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Request(Request),
    Return(ReturnOutcome),
    Unit,
}

#[derive(Debug, Clone)]
pub enum Query {
    GetTemplate(TemplateId),
    ListTemplates,
    GetRequest(RequestId),
    ListRequests,
    GetMachinesByRequest(RequestId),
}

#[derive(Debug, Clone)]
pub enum QueryResult {
    Template(Option<Template>),
    Templates(Vec<Template>),
    Request(Option<Request>),
    Requests(Vec<Request>),
    Machines(Vec<Machine>),
}
