//! Ordered persistence queue.
//!
//! All officer-originated writes of one reconciliation lifetime go through
//! a single writer task, so they reach the store in the order they were
//! issued. A set-then-unset can never land as unset-then-set.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::notifier::{persist_notification, persist_read};
use super::status::{persist_status, StatusWriteReport};
use crate::adapters::store::DocumentStore;
use crate::config::Collections;
use crate::domain::detection::CaseStatus;
use crate::domain::records::NotificationRecord;

/// One queued write
#[derive(Debug)]
pub enum WriteIntent {
    Status {
        case_id: String,
        status: Option<CaseStatus>,
        /// Receives the report once both destinations have been attempted
        reply: Option<oneshot::Sender<StatusWriteReport>>,
    },
    Read {
        case_id: String,
    },
    Notification(NotificationRecord),
}

/// Handle to the writer task
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteIntent>,
    task: JoinHandle<()>,
}

impl WriteQueue {
    pub fn spawn(store: Arc<dyn DocumentStore>, collections: Collections) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteIntent>();

        let task = tokio::spawn(async move {
            while let Some(intent) = rx.recv().await {
                apply(store.as_ref(), &collections, intent).await;
            }
            debug!("Write queue drained");
        });

        Self { tx, task }
    }

    /// Queue a write; false once the queue has shut down
    pub fn submit(&self, intent: WriteIntent) -> bool {
        self.tx.send(intent).is_ok()
    }

    /// Stop accepting writes and wait for queued ones to finish
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

async fn apply(store: &dyn DocumentStore, collections: &Collections, intent: WriteIntent) {
    match intent {
        WriteIntent::Status {
            case_id,
            status,
            reply,
        } => {
            let report = persist_status(store, collections, &case_id, status).await;
            if let Some(reply) = reply {
                let _ = reply.send(report);
            }
        }
        WriteIntent::Read { case_id } => {
            persist_read(store, collections, &case_id).await;
        }
        WriteIntent::Notification(record) => {
            let _ = persist_notification(store, collections, &record).await;
        }
    }
}
