use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};

use bounce_messages::WireEvent;
use tokio::sync::oneshot;

/// Upper bound on waiting for the first event of a request. Generous because
/// model generation can be slow to produce its first byte.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-chunk wait while streaming; a stall longer than this either triggers a
/// keepalive (event streams) or ends the response. Intentionally much shorter
/// than [`DEFAULT_DEQUEUE_TIMEOUT`].
pub const CHUNK_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// One unit handed from the routing layer to the forwarder. `stream_close`
/// frames are mapped to the [`QueueItem::StreamEnd`] sentinel before queueing.
#[derive(Debug, Clone)]
pub enum QueueItem {
    Event(WireEvent),
    StreamEnd,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue timeout")]
    Timeout,
    #[error("queue closed")]
    Closed,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<QueueItem>,
}

#[derive(Default)]
struct QueueInner {
    buffered: VecDeque<QueueItem>,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    closed: bool,
}

/// Async rendezvous between the registry (producer) and one forwarder
/// (consumer) for a single request.
///
/// An enqueue resolves the oldest parked waiter, or buffers if nobody is
/// waiting. A dequeue drains the oldest buffered event, or parks with a
/// timeout. Closing rejects every parked waiter exactly once and turns
/// further enqueues into silent no-ops, so a late message from a racing
/// executor never fails anything.
#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, item: QueueItem) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return;
        }
        let mut item = item;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.tx.send(item) {
                Ok(()) => return,
                // The waiter gave up (timed out) between parking and now;
                // hand the event to the next one in line.
                Err(returned) => item = returned,
            }
        }
        inner.buffered.push_back(item);
    }

    pub async fn dequeue(&self, wait: Duration) -> Result<QueueItem, QueueError> {
        let (waiter_id, mut rx) = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if let Some(item) = inner.buffered.pop_front() {
                return Ok(item);
            }
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        match tokio::time::timeout(wait, &mut rx).await {
            Ok(Ok(item)) => Ok(item),
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => {
                let removed = {
                    let mut inner = self.inner.lock().expect("queue lock poisoned");
                    match inner.waiters.iter().position(|w| w.id == waiter_id) {
                        Some(pos) => {
                            inner.waiters.remove(pos);
                            true
                        }
                        None => false,
                    }
                };
                if removed {
                    Err(QueueError::Timeout)
                } else {
                    // An enqueue (or close) won the race against the timer;
                    // the event, if any, is already in our channel.
                    rx.try_recv().map_err(|_| QueueError::Closed)
                }
            }
        }
    }

    /// Rejects all parked waiters, drops buffered events, and makes the queue
    /// permanently inert.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return;
        }
        inner.closed = true;
        // Dropping the senders resolves every parked dequeue with `Closed`.
        inner.waiters.clear();
        inner.buffered.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").closed
    }
}
