use std::sync::Arc;

use hostbroker_domain::{DomainEvent, Machine, Request};

use crate::error::StoreError;
use crate::store::Store;

/// Scoped transactional boundary for one command-handler invocation.
///
/// `save_request`/`save_machine` persist immediately against the underlying
/// [`Store`] — there is no cross-repository database transaction to open,
/// handlers call `self.store.upsert_*` directly — but events raised by a
/// [`Request`] mutation are only ever added to
/// [`take_events`](Self::take_events) *after* the matching save succeeds.
/// A handler that bails out before calling `save_request` has produced no
/// persisted state and no events to publish, giving the rollback guarantee
/// without needing a literal `begin`/`rollback` pair.
pub struct UnitOfWork {
    store: Arc<dyn Store>,
    pending_events: Vec<DomainEvent>,
}

impl UnitOfWork {
    pub fn new(store: Arc<dyn Store>) -> Self {
        UnitOfWork { store, pending_events: Vec::new() }
    }

    /// Persist `request` and drain its pending domain events into this UoW's
    /// publish queue. Events from a `save_request` that returns `Err` are
    /// left on the aggregate, not queued.
    pub async fn save_request(&mut self, request: &mut Request) -> Result<(), StoreError> {
        self.store.save_request(request).await?;
        let events = request.take_events();
        for event in &events {
            self.store.append_event(event).await?;
        }
        self.pending_events.extend(events);
        Ok(())
    }

    pub async fn save_machine(&mut self, machine: &Machine) -> Result<(), StoreError> {
        self.store.save_machine(machine).await
    }

    /// Drain the events queued by successful saves on this UoW. The caller
    /// (a command handler) publishes these only after every save in the
    /// handler's unit of work has succeeded.
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
