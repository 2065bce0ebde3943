//! Request serializer.
//!
//! Every operation that mutates an appliance runs through one process-wide
//! FIFO queue, one at a time. The head of the queue is the operation
//! currently executing; it is removed when that operation finishes,
//! whether it succeeded or not. Dropping a [`Ticket`] without executing it,
//! or abandoning `execute` mid-wait, gives up its place the same way.
//!
//! `create_member` bursts are coalesced: if a queued (not executing)
//! `create_member` for the same pool is the latest request for that pool,
//! the newer service snapshot replaces it in place instead of being
//! appended.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lbaas_core::LogicalService;
use tokio::sync::Notify;
use tracing::debug;

/// The only operation whose requests are coalesced.
pub const COALESCED_OPERATION: &str = "create_member";

/// Cap on the position-scaled poll interval.
const MAX_POLL_FACTOR: usize = 10;

struct Entry {
    id: u64,
    operation: String,
    pool_id: Option<String>,
    service: Option<LogicalService>,
    coalesced: u32,
}

/// The queue and its wake-up signal, shared with outstanding tickets.
struct Shared {
    queue: Mutex<VecDeque<Entry>>,
    turn: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|e| e.id != id);
        self.turn.notify_waiters();
    }
}

/// Handle to a queued request. Redeem it with [`RequestSerializer::execute`].
///
/// The request stays queued for as long as its ticket lives.
#[must_use]
pub struct Ticket {
    id: u64,
    shared: Arc<Shared>,
}

impl Ticket {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.shared.remove(self.id);
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket").field("id", &self.id).finish()
    }
}

#[derive(Debug)]
pub enum Submission {
    Queued(Ticket),
    /// Folded into the queued request `into`; nothing was appended.
    Coalesced { into: u64 },
}

pub struct RequestSerializer {
    shared: Arc<Shared>,
    poll: Duration,
    next_id: AtomicU64,
}

impl RequestSerializer {
    /// `poll` is the interval a waiter at position 1 re-checks the queue.
    pub fn new(poll: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                turn: Notify::new(),
            }),
            poll,
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.shared.lock()
    }

    /// Enqueue a request. Submission order is execution order.
    pub fn submit(
        &self,
        operation: &str,
        pool_id: Option<&str>,
        service: Option<LogicalService>,
    ) -> Submission {
        let mut queue = self.lock();

        if operation == COALESCED_OPERATION {
            if let Some(pool) = pool_id {
                // The latest request for this pool, never the executing head.
                let latest = queue
                    .iter_mut()
                    .skip(1)
                    .rev()
                    .find(|e| e.pool_id.as_deref() == Some(pool));
                if let Some(entry) = latest.filter(|e| e.operation == COALESCED_OPERATION) {
                    entry.service = service;
                    entry.coalesced += 1;
                    debug!(request_id = entry.id, %pool, coalesced = entry.coalesced, "create_member coalesced");
                    return Submission::Coalesced { into: entry.id };
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        queue.push_back(Entry {
            id,
            operation: operation.to_string(),
            pool_id: pool_id.map(str::to_string),
            service,
            coalesced: 0,
        });
        debug!(request_id = id, %operation, depth = queue.len(), "request queued");
        Submission::Queued(Ticket {
            id,
            shared: self.shared.clone(),
        })
    }

    /// Wait for the ticket to reach the head, run `f` with the latest
    /// snapshot for it, then remove it from the queue.
    ///
    /// The ticket is dropped on return or cancellation, which dequeues it.
    pub async fn execute<F, Fut, T>(&self, ticket: Ticket, f: F) -> T
    where
        F: FnOnce(Option<LogicalService>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.wait_turn(ticket.id).await;
        let snapshot = self
            .lock()
            .front_mut()
            .filter(|e| e.id == ticket.id)
            .and_then(|e| e.service.take());
        f(snapshot).await
    }

    /// Submit and execute in one step. `None` when the request was coalesced.
    pub async fn run<F, Fut, T>(
        &self,
        operation: &str,
        pool_id: Option<&str>,
        service: Option<LogicalService>,
        f: F,
    ) -> Option<T>
    where
        F: FnOnce(Option<LogicalService>) -> Fut,
        Fut: Future<Output = T>,
    {
        match self.submit(operation, pool_id, service) {
            Submission::Queued(ticket) => Some(self.execute(ticket, f).await),
            Submission::Coalesced { .. } => None,
        }
    }

    async fn wait_turn(&self, id: u64) {
        loop {
            let position = self.lock().iter().position(|e| e.id == id);
            let position = match position {
                Some(0) | None => return,
                Some(p) => p,
            };
            let delay = self.poll * position.min(MAX_POLL_FACTOR) as u32;
            tokio::select! {
                _ = self.shared.turn.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Queued requests, including the one executing.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// `(operation, pool_id)` of every queued request, head first.
    pub fn pending(&self) -> Vec<(String, Option<String>)> {
        self.lock()
            .iter()
            .map(|e| (e.operation.clone(), e.pool_id.clone()))
            .collect()
    }
}
