//! Routes metadata change events to the local replica state machine.

use crate::operations::{
    DrainFileOperation, DrainFileOperationRequest, ReplicateFileOperation,
    ReplicateFileOperationRequest,
};
use crate::replication::{Intent, coordinator_sees_new_holder, intent};
use crate::{ChangeEvent, ChangeKind, FileMetadata, QuorumCoordinator};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct ChangeDispatcher {
    local_node_id: String,
    quorum: Arc<QuorumCoordinator>,
    replicate: Arc<ReplicateFileOperation>,
    drain: Arc<DrainFileOperation>,
}

impl ChangeDispatcher {
    pub fn new(
        local_node_id: String,
        quorum: Arc<QuorumCoordinator>,
        replicate: Arc<ReplicateFileOperation>,
        drain: Arc<DrainFileOperation>,
    ) -> Self {
        Self {
            local_node_id,
            quorum,
            replicate,
            drain,
        }
    }

    /// Consume `events` until the subscription closes. Each event is handled
    /// on its own task so a slow transfer does not hold back other keys.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ChangeEvent<FileMetadata>>) {
        while let Some(event) = events.recv().await {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle(event).await;
            });
        }
        tracing::info!("Change subscription closed on {}", self.local_node_id);
    }

    pub async fn handle(&self, event: ChangeEvent<FileMetadata>) {
        let Some(new) = event.new else {
            return;
        };
        let entry = new.value;
        let key = event.key;

        if event.kind == ChangeKind::Updated
            && coordinator_sees_new_holder(&entry, &self.local_node_id)
        {
            self.quorum.observe(&entry);
        }

        match intent(Some(&entry), &self.local_node_id) {
            Intent::Idle => {}
            Intent::Replicate => {
                let request = ReplicateFileOperationRequest { key: key.clone() };
                match self.replicate.run(request).await {
                    Ok(outcome) => {
                        tracing::debug!("Replicate {}: {:?}", key, outcome);
                    }
                    Err(error) => {
                        tracing::error!(
                            "Replication failed: node={} key={} error={}",
                            self.local_node_id,
                            key,
                            error
                        );
                    }
                }
            }
            Intent::Drain => {
                let request = DrainFileOperationRequest {
                    key: key.clone(),
                    initiate: false,
                };
                if let Err(error) = self.drain.run(request).await {
                    tracing::error!(
                        "Drain failed: node={} key={} error={}",
                        self.local_node_id,
                        key,
                        error
                    );
                }
            }
        }
    }
}
