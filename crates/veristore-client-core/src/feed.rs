//! Live row-change subscription contract.
//!
//! The reconciler never inspects event payloads: any insert, update, or
//! delete scoped to its identifier triggers a full refetch. What matters
//! here is the lifecycle: exactly one live channel per subscription, torn
//! down when the guard drops, so an identity switch or unmount cannot leak a
//! connection.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Callback invoked for every change event on the subscribed identifier.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub external_user_id: String,
    pub kind: ChangeKind,
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open one live channel filtered to rows belonging to the identifier.
    async fn subscribe(&self, external_user_id: &str, on_change: ChangeCallback)
    -> FeedSubscription;
}

/// RAII guard over a live subscription. Dropping it closes the channel.
#[derive(Debug)]
pub struct FeedSubscription {
    task: JoinHandle<()>,
}

impl FeedSubscription {
    #[must_use]
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Change feed over an in-process broadcast channel; the primitive the
/// payment store publishes to.
#[derive(Clone)]
pub struct BroadcastChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastChangeFeed {
    #[must_use]
    pub fn new(sender: broadcast::Sender<ChangeEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ChangeFeed for BroadcastChangeFeed {
    async fn subscribe(
        &self,
        external_user_id: &str,
        on_change: ChangeCallback,
    ) -> FeedSubscription {
        let mut receiver = self.sender.subscribe();
        let external_user_id = external_user_id.to_string();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.external_user_id == external_user_id {
                            on_change();
                        }
                    }
                    // A lagged receiver missed events; rows changed either
                    // way, so signal a refetch rather than dropping it.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            target: "veristore.feed",
                            skipped,
                            "change feed lagged; forcing refresh",
                        );
                        on_change();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        FeedSubscription::new(task)
    }
}
