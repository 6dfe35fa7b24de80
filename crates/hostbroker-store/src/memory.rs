use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hostbroker_domain::{DomainEvent, InstanceId, Machine, Request, RequestId, Template, TemplateId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::Store;

#[derive(Debug, Default)]
struct Inner {
    requests: HashMap<RequestId, Request>,
    machines: HashMap<InstanceId, Machine>,
    templates: HashMap<TemplateId, Template>,
    events: Vec<DomainEvent>,
}

/// In-memory [`Store`] implementation. All data is lost on process exit;
/// used by tests and by `hostbroker-cli`/`hostbroker-api` when no
/// `storage.strategy` is configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.inner.read().await.requests.get(id).cloned())
    }

    async fn list_requests(&self) -> Result<Vec<Request>, StoreError> {
        Ok(self.inner.read().await.requests.values().cloned().collect())
    }

    async fn save_request(&self, request: &Request) -> Result<(), StoreError> {
        self.inner.write().await.requests.insert(request.request_id, request.clone());
        Ok(())
    }

    async fn get_machine(&self, id: &InstanceId) -> Result<Option<Machine>, StoreError> {
        Ok(self.inner.read().await.machines.get(id).cloned())
    }

    async fn list_machines_by_request(&self, request_id: &RequestId) -> Result<Vec<Machine>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .machines
            .values()
            .filter(|m| &m.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn save_machine(&self, machine: &Machine) -> Result<(), StoreError> {
        self.inner.write().await.machines.insert(machine.instance_id.clone(), machine.clone());
        Ok(())
    }

    async fn get_template(&self, id: &TemplateId) -> Result<Option<Template>, StoreError> {
        Ok(self.inner.read().await.templates.get(id).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        Ok(self.inner.read().await.templates.values().cloned().collect())
    }

    async fn save_template(&self, template: &Template) -> Result<(), StoreError> {
        self.inner.write().await.templates.insert(template.template_id.clone(), template.clone());
        Ok(())
    }

    async fn append_event(&self, event: &DomainEvent) -> Result<(), StoreError> {
        self.inner.write().await.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, request_id: Option<&RequestId>, limit: u32) -> Result<Vec<DomainEvent>, StoreError> {
        let guard = self.inner.read().await;
        let filtered: Vec<DomainEvent> = guard
            .events
            .iter()
            .filter(|ev| request_id.map_or(true, |id| &ev.request_id() == id))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit as usize);
        Ok(filtered[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hostbroker_domain::{MachineStatus, ProviderApi, RequestType};

    #[tokio::test]
    async fn round_trips_a_request() {
        let store = InMemoryStore::new();
        let req = Request::new(
            RequestType::Acquire,
            TemplateId::new("tpl-1"),
            3,
            ProviderApi::Asg,
            Utc::now(),
        )
        .unwrap();
        store.save_request(&req).await.unwrap();
        let loaded = store.get_request(&req.request_id).await.unwrap().unwrap();
        assert_eq!(loaded.request_id, req.request_id);
        assert_eq!(loaded.requested_count, 3);
    }

    fn dummy_machine(instance_id: &str, request_id: RequestId) -> Machine {
        Machine {
            instance_id: InstanceId::new(instance_id),
            request_id,
            template_id: TemplateId::new("tpl-1"),
            provider_api: ProviderApi::RunInstances,
            instance_type: "m5.large".into(),
            image_id: None,
            status: MachineStatus::Running,
            private_ip: None,
            public_ip: None,
            launch_time: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn list_machines_by_request_filters_correctly() {
        let store = InMemoryStore::new();
        let req_a = RequestId::new();
        let req_b = RequestId::new();
        store.save_machine(&dummy_machine("i-1", req_a)).await.unwrap();
        store.save_machine(&dummy_machine("i-2", req_b)).await.unwrap();

        let only_a = store.list_machines_by_request(&req_a).await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].instance_id, InstanceId::new("i-1"));
    }

    #[tokio::test]
    async fn list_events_caps_to_limit() {
        let store = InMemoryStore::new();
        let request_id = RequestId::new();
        for _ in 0..5 {
            store
                .append_event(&DomainEvent::RequestCompleted { request_id })
                .await
                .unwrap();
        }
        let events = store.list_events(Some(&request_id), 2).await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
