use async_trait::async_trait;
use hostbroker_domain::{DomainEvent, InstanceId, Machine, Request, RequestId, Template, TemplateId};

use crate::error::StoreError;

/// Repository port for [`Request`] aggregates, plus the [`Machine`] and
/// [`Template`] repositories and the event log the request lifecycle engine
/// needs. One backend implements the whole trait, rather than splitting
/// into per-aggregate traits that every backend would have to
/// re-implement in lockstep anyway.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError>;
    async fn list_requests(&self) -> Result<Vec<Request>, StoreError>;
    async fn save_request(&self, request: &Request) -> Result<(), StoreError>;

    async fn get_machine(&self, id: &InstanceId) -> Result<Option<Machine>, StoreError>;
    async fn list_machines_by_request(&self, request_id: &RequestId) -> Result<Vec<Machine>, StoreError>;
    async fn save_machine(&self, machine: &Machine) -> Result<(), StoreError>;

    async fn get_template(&self, id: &TemplateId) -> Result<Option<Template>, StoreError>;
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError>;
    async fn save_template(&self, template: &Template) -> Result<(), StoreError>;

    async fn append_event(&self, event: &DomainEvent) -> Result<(), StoreError>;
    async fn list_events(&self, request_id: Option<&RequestId>, limit: u32) -> Result<Vec<DomainEvent>, StoreError>;
}
