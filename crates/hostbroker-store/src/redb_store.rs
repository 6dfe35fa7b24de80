use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hostbroker_domain::{DomainEvent, InstanceId, Machine, Request, RequestId, Template, TemplateId};
use redb::{Database, ReadableTable, TableDefinition};

use crate::envelope::Envelope;
use crate::error::StoreError;
use crate::store::Store;

const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("requests");
const MACHINES: TableDefinition<&str, &[u8]> = TableDefinition::new("machines");
const TEMPLATES: TableDefinition<&str, &[u8]> = TableDefinition::new("templates");
const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

fn internal<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// JSON-file-backed [`Store`] implementation on top of a redb database.
/// All request/machine/template state survives process restarts; suitable
/// for a single-process control plane deployment without an external
/// database. See [`crate::postgres_store::PostgresStore`] for the
/// multi-process-safe backend satisfying the same port.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a redb database at `path`. Parent directories are
    /// created automatically.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;
        {
            let wtxn = db.begin_write().map_err(internal)?;
            wtxn.open_table(REQUESTS).map_err(internal)?;
            wtxn.open_table(MACHINES).map_err(internal)?;
            wtxn.open_table(TEMPLATES).map_err(internal)?;
            wtxn.open_table(EVENTS).map_err(internal)?;
            wtxn.open_table(META).map_err(internal)?;
            wtxn.commit().map_err(internal)?;
        }
        Ok(RedbStore { db: Arc::new(db) })
    }

    fn get_envelope<T: serde::de::DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(table).map_err(internal)?;
        match table.get(key).map_err(internal)? {
            Some(guard) => {
                let env: Envelope<T> = serde_json::from_slice(guard.value())?;
                Ok(Some(env.into_payload()))
            }
            None => Ok(None),
        }
    }

    fn list_envelopes<T: serde::de::DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> Result<Vec<T>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(table).map_err(internal)?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let env: Envelope<T> = serde_json::from_slice(v.value())?;
            results.push(env.into_payload());
        }
        Ok(results)
    }

    fn put_envelope<T: serde::Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        payload: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&Envelope::new(payload))?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut t = wtxn.open_table(table).map_err(internal)?;
            t.insert(key, bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl Store for RedbStore {
    async fn get_request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        self.get_envelope(REQUESTS, &id.to_string())
    }

    async fn list_requests(&self) -> Result<Vec<Request>, StoreError> {
        self.list_envelopes(REQUESTS)
    }

    async fn save_request(&self, request: &Request) -> Result<(), StoreError> {
        self.put_envelope(REQUESTS, &request.request_id.to_string(), request)
    }

    async fn get_machine(&self, id: &InstanceId) -> Result<Option<Machine>, StoreError> {
        self.get_envelope(MACHINES, id.as_str())
    }

    async fn list_machines_by_request(&self, request_id: &RequestId) -> Result<Vec<Machine>, StoreError> {
        let all: Vec<Machine> = self.list_envelopes(MACHINES)?;
        Ok(all.into_iter().filter(|m| &m.request_id == request_id).collect())
    }

    async fn save_machine(&self, machine: &Machine) -> Result<(), StoreError> {
        self.put_envelope(MACHINES, machine.instance_id.as_str(), machine)
    }

    async fn get_template(&self, id: &TemplateId) -> Result<Option<Template>, StoreError> {
        self.get_envelope(TEMPLATES, id.as_str())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        self.list_envelopes(TEMPLATES)
    }

    async fn save_template(&self, template: &Template) -> Result<(), StoreError> {
        self.put_envelope(TEMPLATES, template.template_id.as_str(), template)
    }

    async fn append_event(&self, event: &DomainEvent) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&Envelope::new(event))?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut meta = wtxn.open_table(META).map_err(internal)?;
            let seq = meta.get("event_seq").map_err(internal)?.map(|g| g.value()).unwrap_or(0);
            let new_seq = seq + 1;
            meta.insert("event_seq", new_seq).map_err(internal)?;

            let mut events = wtxn.open_table(EVENTS).map_err(internal)?;
            events.insert(new_seq, bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_events(&self, request_id: Option<&RequestId>, limit: u32) -> Result<Vec<DomainEvent>, StoreError> {
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(EVENTS).map_err(internal)?;
        let mut all: Vec<DomainEvent> = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let env: Envelope<DomainEvent> = serde_json::from_slice(v.value())?;
            let event = env.into_payload();
            if request_id.map_or(true, |id| &event.request_id() == id) {
                all.push(event);
            }
        }
        let start = all.len().saturating_sub(limit as usize);
        Ok(all[start..].to_vec())
    }
}
