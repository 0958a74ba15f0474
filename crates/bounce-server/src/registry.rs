use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bounce_messages::{PeerControl, PeerFrame, SyncNotification, WireEvent};
use tokio::sync::{Mutex, mpsc};

use crate::queue::{MessageQueue, QueueItem};

pub type ConnectionId = u64;

/// Outbound half of a peer socket; frames pushed here are written to the
/// WebSocket by that socket's dispatch task.
pub type FrameSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
struct RegistryInner {
    /// Keyed by a monotonically increasing connection id, so "first" is the
    /// oldest live executor and iteration order is stable.
    executors: BTreeMap<ConnectionId, FrameSender>,
    subscribers: BTreeMap<ConnectionId, FrameSender>,
    queues: HashMap<String, Arc<MessageQueue>>,
}

/// Single source of truth for which peers are reachable and which request ids
/// are in flight.
///
/// A new socket is classified as an executor until it sends a sync-client
/// registration frame; reclassification is one-way. Queue lifecycle is owned
/// here so the routing table always matches the set of pending requests.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_connection(&self, sender: FrameSender) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().await.executors.insert(id, sender);
        id
    }

    /// Drops the peer from both sets. An executor disconnect mid-flight cannot
    /// be recovered, so once no executor remains every pending queue is closed
    /// and discarded: parked forwarders fail fast instead of waiting out
    /// their own timeout.
    pub async fn remove_connection(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        inner.executors.remove(&id);
        inner.subscribers.remove(&id);
        if inner.executors.is_empty() && !inner.queues.is_empty() {
            tracing::warn!(
                "last executor gone, failing {} in-flight request(s)",
                inner.queues.len()
            );
            for (_, queue) in inner.queues.drain() {
                queue.close();
            }
        }
    }

    pub async fn has_active_connections(&self) -> bool {
        !self.inner.lock().await.executors.is_empty()
    }

    /// Selection policy: first of the current set, oldest connection wins.
    /// No load balancing, no affinity.
    pub async fn first_connection(&self) -> Option<FrameSender> {
        self.inner.lock().await.executors.values().next().cloned()
    }

    /// Serializes and ships a frame to the first executor. `false` when no
    /// executor is reachable.
    pub async fn send_to_executor(&self, frame: &impl serde::Serialize) -> bool {
        let Ok(text) = serde_json::to_string(frame) else {
            return false;
        };
        match self.first_connection().await {
            Some(sender) => sender.send(text).is_ok(),
            None => false,
        }
    }

    pub async fn create_message_queue(&self, request_id: &str) -> Arc<MessageQueue> {
        let queue = Arc::new(MessageQueue::new());
        self.inner
            .lock()
            .await
            .queues
            .insert(request_id.to_string(), queue.clone());
        queue
    }

    pub async fn remove_message_queue(&self, request_id: &str) {
        if let Some(queue) = self.inner.lock().await.queues.remove(request_id) {
            queue.close();
        }
    }

    /// One inbound text frame from a peer socket. Registration frames
    /// reclassify the peer; wire events route to their request's queue; a
    /// malformed frame is logged and dropped so it can never poison unrelated
    /// in-flight requests.
    pub async fn handle_frame(&self, id: ConnectionId, raw: &str) {
        match serde_json::from_str::<PeerFrame>(raw) {
            Ok(PeerFrame::Control(PeerControl::RegisterSyncClient)) => {
                let mut inner = self.inner.lock().await;
                if let Some(sender) = inner.executors.remove(&id) {
                    tracing::info!("🔄 peer {id} registered as sync subscriber");
                    inner.subscribers.insert(id, sender);
                }
            }
            Ok(PeerFrame::Event(event)) => self.route_event(event).await,
            Err(err) => {
                tracing::error!("dropping unparseable frame from peer {id}: {err}");
            }
        }
    }

    async fn route_event(&self, event: WireEvent) {
        let inner = self.inner.lock().await;
        let Some(queue) = inner.queues.get(event.request_id()) else {
            // A late event from a racing executor after teardown; harmless.
            tracing::debug!(
                "no queue for request {}, dropping {} event",
                event.request_id(),
                event.name()
            );
            return;
        };
        match event {
            WireEvent::StreamClose { .. } => queue.enqueue(QueueItem::StreamEnd),
            other => queue.enqueue(QueueItem::Event(other)),
        }
    }

    /// Fan-out to every subscriber socket. Executors never receive broadcast
    /// traffic; a dead subscriber send is ignored.
    pub async fn broadcast(&self, notification: &SyncNotification) {
        let Ok(text) = serde_json::to_string(notification) else {
            return;
        };
        let inner = self.inner.lock().await;
        for sender in inner.subscribers.values() {
            let _ = sender.send(text.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueError;
    use std::time::Duration;

    fn sender() -> (FrameSender, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn sockets_default_to_executor_and_reclassify_one_way() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = sender();
        let id = registry.add_connection(tx).await;
        assert!(registry.has_active_connections().await);

        registry
            .handle_frame(id, r#"{"type":"REGISTER_SYNC_CLIENT"}"#)
            .await;
        assert!(!registry.has_active_connections().await);

        // Idempotent: a repeat registration is not an error.
        registry
            .handle_frame(id, r#"{"type":"REGISTER_SYNC_CLIENT"}"#)
            .await;

        registry
            .broadcast(&SyncNotification::Deleted {
                data_type: "session".into(),
                item_id: "s1".into(),
            })
            .await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("SYNC_DELETE_EVENT"));
    }

    #[tokio::test]
    async fn events_route_to_their_queue_and_stream_close_becomes_sentinel() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = sender();
        let id = registry.add_connection(tx).await;

        let queue = registry.create_message_queue("r1").await;
        registry
            .handle_frame(
                id,
                r#"{"event_type":"chunk","request_id":"r1","data":"hello"}"#,
            )
            .await;
        registry
            .handle_frame(id, r#"{"event_type":"stream_close","request_id":"r1"}"#)
            .await;

        let first = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(first, QueueItem::Event(WireEvent::Chunk { .. })));
        let second = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(second, QueueItem::StreamEnd));
    }

    #[tokio::test]
    async fn malformed_and_unroutable_frames_are_dropped() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = sender();
        let id = registry.add_connection(tx).await;
        let queue = registry.create_message_queue("r1").await;

        registry.handle_frame(id, "not json at all").await;
        registry
            .handle_frame(id, r#"{"event_type":"mystery","request_id":"r1"}"#)
            .await;
        registry
            .handle_frame(
                id,
                r#"{"event_type":"chunk","request_id":"other","data":"x"}"#,
            )
            .await;

        // None of the above may have reached r1's queue.
        assert_eq!(
            queue.dequeue(Duration::from_millis(20)).await.unwrap_err(),
            QueueError::Timeout
        );
    }

    #[tokio::test]
    async fn last_executor_disconnect_closes_all_queues() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        let first = registry.add_connection(tx1).await;
        let second = registry.add_connection(tx2).await;

        let q1 = registry.create_message_queue("r1").await;
        let q2 = registry.create_message_queue("r2").await;

        registry.remove_connection(first).await;
        assert!(!q1.is_closed(), "queues survive while an executor remains");

        registry.remove_connection(second).await;
        assert!(q1.is_closed());
        assert!(q2.is_closed());
        assert_eq!(
            q1.dequeue(Duration::from_millis(20)).await.unwrap_err(),
            QueueError::Closed
        );
    }

    #[tokio::test]
    async fn first_connection_is_oldest_and_stable() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = sender();
        let (tx2, _rx2) = sender();
        registry.add_connection(tx1).await;
        registry.add_connection(tx2).await;

        assert!(
            registry
                .send_to_executor(&serde_json::json!({"probe": true}))
                .await
        );
        assert!(rx1.recv().await.unwrap().contains("probe"));
    }
}
