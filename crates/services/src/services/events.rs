//! Domain events emitted by the activation engine after commit.
//!
//! In-process broadcast, fire-and-forget: subscribers that lag past the
//! channel capacity miss events, and nothing is redelivered. The consumers
//! (discussion-room bootstrap, audit trail) are advisory, so losing one is
//! acceptable; durable state only ever changes inside the engine's
//! transactions.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ProcessCreated {
        process_id: Uuid,
        device_sn: String,
    },
    TaskStarted {
        process_id: Uuid,
        task_id: Uuid,
        node: String,
    },
}

#[derive(Clone)]
pub struct EventService {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventService {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn emit(&self, event: DomainEvent) {
        tracing::debug!(?event, "domain event");
        // No receivers is fine; send only fails when nobody listens.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Background consumer writing the audit trail.
    pub fn spawn_audit_logger(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DomainEvent::ProcessCreated {
                        process_id,
                        device_sn,
                    }) => {
                        tracing::info!(%process_id, %device_sn, "audit: process created");
                    }
                    Ok(DomainEvent::TaskStarted {
                        process_id,
                        task_id,
                        node,
                    }) => {
                        tracing::info!(%process_id, %task_id, %node, "audit: task started");
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "audit logger lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventService {
    fn default() -> Self {
        Self::new()
    }
}
