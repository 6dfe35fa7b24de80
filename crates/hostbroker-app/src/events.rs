//! Publishes the domain events a [`crate::handlers`] unit of work drains
//! after a successful save. The only implementation is structured-log
//! based; a message-bus publisher would implement the same trait.

use hostbroker_domain::DomainEvent;
use tracing::info;

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &DomainEvent);
}

/// Emits one structured log line per event via `tracing` rather than
/// standing up a queue for a single-process control plane.
#[derive(Debug, Default)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: &DomainEvent) {
        match event {
            DomainEvent::RequestCreated { request_id, request_type, template_id, requested_count } => {
                info!(%request_id, %request_type, template_id = %template_id, requested_count, "request created");
            }
            DomainEvent::RequestStatusChanged { request_id, from, to, message } => {
                info!(%request_id, %from, %to, message = message.as_deref().unwrap_or(""), "request status changed");
            }
            DomainEvent::RequestCompleted { request_id } => {
                info!(%request_id, "request completed");
            }
            DomainEvent::RequestFailed { request_id, message } => {
                info!(%request_id, message, "request failed");
            }
            DomainEvent::RequestCancelled { request_id } => {
                info!(%request_id, "request cancelled");
            }
        }
    }
}

pub fn publish_all(publisher: &dyn EventPublisher, events: &[DomainEvent]) {
    for event in events {
        publisher.publish(event);
    }
}
