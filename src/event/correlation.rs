//! # Correlation Registry
//!
//! Thread-safe map from correlation id to the pending result slot of an in-flight
//! request. The request path registers a slot and receives a [`PendingResponse`]
//! future; an independent listener completes the slot when the matching response
//! envelope arrives.
//!
//! ## Guarantees
//!
//! - At most one live slot per id; registering a live id is rejected.
//! - A slot is removed exactly once, by whichever of completion, failure, deadline
//!   eviction, or caller cancellation happens first.
//! - Completions for unknown ids (late, duplicate, evicted) are dropped, logged, and
//!   counted in [`CorrelationRegistry::stale_completions`].
//! - Dropping a [`PendingResponse`] before it resolves evicts its slot.
//!
//! Each registry instance is owned by one operation (one result channel), so
//! unrelated request kinds can never resolve each other's slots.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tokio::{sync::oneshot, task::AbortHandle};
use tracing::{debug, warn};

use super::{envelope::ErrorKind, event_bus::EventError};

type RequestId = String;

/// Pending result slot of one in-flight request.
struct PendingSlot<R> {
    sender: oneshot::Sender<CorrelationResult<R>>,
    /// Distinguishes this slot from a later slot registered under the same id
    generation: u64,
    registered_at: Instant,
    /// Deadline task, aborted when the slot resolves first
    deadline: Option<AbortHandle>,
}

struct RegistryInner<R> {
    name: String,
    slots: DashMap<RequestId, PendingSlot<R>>,
    next_generation: AtomicU64,
    stale_completions: AtomicU64,
}

impl<R> RegistryInner<R> {
    fn resolve(&self, id: &str, result: CorrelationResult<R>) -> bool {
        match self.slots.remove(id) {
            Some((_, slot)) => {
                if let Some(deadline) = slot.deadline {
                    deadline.abort();
                }
                debug!(
                    registry = %self.name,
                    request_id = id,
                    elapsed_ms = slot.registered_at.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "Slot resolved"
                );
                if slot.sender.send(result).is_err() {
                    debug!(registry = %self.name, request_id = id, "Receiver already dropped");
                }
                true
            }
            None => {
                let count = self.stale_completions.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    registry = %self.name,
                    request_id = id,
                    stale_completions = count,
                    "Completion for unknown correlation id dropped"
                );
                false
            }
        }
    }

    /// Removes the slot only if it is still the one identified by `generation`.
    fn evict(&self, id: &str, generation: u64) -> Option<PendingSlot<R>> {
        self.slots
            .remove_if(id, |_, slot| slot.generation == generation)
            .map(|(_, slot)| slot)
    }
}

/// # Correlation Registry
///
/// Owns the pending slots of one operation. Cloning is cheap and yields a handle to
/// the same registry.
///
/// ```rust,no_run
/// # use promptbus::event::correlation::CorrelationRegistry;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry: CorrelationRegistry<String> = CorrelationRegistry::new("generate");
/// let pending = registry.register("req-1", None)?;
/// registry.complete("req-1", "done".to_string());
/// assert_eq!(pending.await?, "done");
/// # Ok(())
/// # }
/// ```
pub struct CorrelationRegistry<R> {
    inner: Arc<RegistryInner<R>>,
}

impl<R> Clone for CorrelationRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static> CorrelationRegistry<R> {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                name: name.to_string(),
                slots: DashMap::new(),
                next_generation: AtomicU64::new(0),
                stale_completions: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Creates a pending slot for `id` and returns the future it resolves.
    ///
    /// With `timeout`, an eviction is scheduled that fails the slot with
    /// [`CorrelationError::Timeout`] once the duration elapses.
    ///
    /// # Errors
    ///
    /// * `CorrelationError::DuplicateId` - `id` already has a live slot
    /// * `CorrelationError::NoRuntime` - a deadline was requested outside a Tokio runtime
    pub fn register(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> CorrelationResult<PendingResponse<R>> {
        let handle = match timeout {
            Some(_) => Some(
                tokio::runtime::Handle::try_current()
                    .map_err(|_| CorrelationError::NoRuntime(id.to_string()))?,
            ),
            None => None,
        };

        match self.inner.slots.entry(id.to_string()) {
            Entry::Occupied(_) => {
                warn!(
                    registry = %self.inner.name,
                    request_id = id,
                    "Correlation id already in flight"
                );
                Err(CorrelationError::DuplicateId(id.to_string()))
            }
            Entry::Vacant(vacant) => {
                let (sender, receiver) = oneshot::channel();
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let deadline = timeout.zip(handle).map(|(timeout, handle)| {
                    self.schedule_eviction(&handle, id, generation, timeout)
                });
                vacant.insert(PendingSlot {
                    sender,
                    generation,
                    registered_at: Instant::now(),
                    deadline,
                });
                debug!(registry = %self.inner.name, request_id = id, "Slot registered");
                Ok(PendingResponse {
                    id: id.to_string(),
                    generation,
                    receiver,
                    registry: Arc::downgrade(&self.inner),
                    finished: false,
                })
            }
        }
    }

    fn schedule_eviction(
        &self,
        handle: &tokio::runtime::Handle,
        id: &str,
        generation: u64,
        timeout: Duration,
    ) -> AbortHandle {
        let registry = Arc::downgrade(&self.inner);
        let id = id.to_string();
        handle
            .spawn(async move {
                tokio::time::sleep(timeout).await;
                let Some(inner) = registry.upgrade() else {
                    return;
                };
                if let Some(slot) = inner.evict(&id, generation) {
                    warn!(
                        registry = %inner.name,
                        request_id = %id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timed out; slot evicted"
                    );
                    let _ = slot.sender.send(Err(CorrelationError::Timeout {
                        request_id: id,
                        timeout_ms: timeout.as_millis() as u64,
                    }));
                }
            })
            .abort_handle()
    }

    /// Resolves the slot for `id` with `value` and removes it.
    ///
    /// Returns `false` when no slot exists; the completion is logged and counted.
    pub fn complete(&self, id: &str, value: R) -> bool {
        self.inner.resolve(id, Ok(value))
    }

    /// Fails the slot for `id` with `error` and removes it.
    ///
    /// Returns `false` when no slot exists; the completion is logged and counted.
    pub fn complete_exceptionally(&self, id: &str, error: CorrelationError) -> bool {
        self.inner.resolve(id, Err(error))
    }

    pub fn has_pending(&self, id: &str) -> bool {
        self.inner.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Completions that found no live slot since this registry was created.
    pub fn stale_completions(&self) -> u64 {
        self.inner.stale_completions.load(Ordering::Relaxed)
    }

    /// Fails every pending slot with [`CorrelationError::Cancelled`].
    ///
    /// Returns the ids that were cancelled.
    pub fn cancel_all(&self, reason: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .inner
            .slots
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.into_iter()
            .filter(|id| {
                self.inner.slots.contains_key(id)
                    && self.complete_exceptionally(
                        id,
                        CorrelationError::Cancelled {
                            request_id: id.clone(),
                            reason: reason.to_string(),
                        },
                    )
            })
            .collect()
    }

    /// Drains all slots. Their futures resolve with [`CorrelationError::ChannelClosed`].
    pub fn clear(&self) {
        let ids: Vec<String> = self
            .inner
            .slots
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            if let Some((_, slot)) = self.inner.slots.remove(&id) {
                if let Some(deadline) = slot.deadline {
                    deadline.abort();
                }
            }
        }
        debug!(registry = %self.inner.name, "Registry cleared");
    }
}

/// Future resolved by the registry for one correlation id.
///
/// Dropping it before resolution evicts the slot, so abandoned requests never leak.
pub struct PendingResponse<R> {
    id: RequestId,
    generation: u64,
    receiver: oneshot::Receiver<CorrelationResult<R>>,
    registry: Weak<RegistryInner<R>>,
    finished: bool,
}

impl<R> PendingResponse<R> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<R> Unpin for PendingResponse<R> {}

impl<R> Future for PendingResponse<R> {
    type Output = CorrelationResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.finished = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.finished = true;
                Poll::Ready(Err(CorrelationError::ChannelClosed(this.id.clone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<R> Drop for PendingResponse<R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            if let Some(slot) = inner.evict(&self.id, self.generation) {
                if let Some(deadline) = slot.deadline {
                    deadline.abort();
                }
                debug!(
                    registry = %inner.name,
                    request_id = %self.id,
                    "Caller dropped request; slot evicted"
                );
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("Request timed out: {request_id} after {timeout_ms}ms")]
    Timeout { request_id: RequestId, timeout_ms: u64 },

    #[error("Correlation id already in flight: {0}")]
    DuplicateId(RequestId),

    #[error("Request cancelled: {request_id}: {reason}")]
    Cancelled { request_id: RequestId, reason: String },

    #[error("Response channel closed: {0}")]
    ChannelClosed(RequestId),

    #[error("Remote {kind} for {request_id}: {message}")]
    HandlerFailure {
        request_id: RequestId,
        kind: ErrorKind,
        message: String,
    },

    #[error("Response conversion failed for {request_id}: {message}")]
    Conversion { request_id: RequestId, message: String },

    #[error("Deadline requested outside a Tokio runtime: {0}")]
    NoRuntime(RequestId),

    #[error("Publish failed: {0}")]
    Publish(#[from] EventError),
}

pub type CorrelationResult<T> = Result<T, CorrelationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_register_then_complete() {
        let registry = CorrelationRegistry::new("test");
        let pending = registry.register("a", None).unwrap();
        assert!(registry.has_pending("a"));

        assert!(registry.complete("a", 42));
        assert!(!registry.has_pending("a"));
        assert_eq!(pending.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_second_completion_is_counted_noop() {
        let registry = CorrelationRegistry::new("test");
        let pending = registry.register("a", None).unwrap();

        assert!(registry.complete("a", 1));
        assert!(!registry.complete("a", 2));
        assert!(!registry.complete_exceptionally(
            "a",
            CorrelationError::ChannelClosed("a".to_string())
        ));

        assert_eq!(pending.await.unwrap(), 1);
        assert_eq!(registry.stale_completions(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let registry: CorrelationRegistry<i32> = CorrelationRegistry::new("test");
        let _pending = registry.register("a", None).unwrap();
        assert!(matches!(
            registry.register("a", None),
            Err(CorrelationError::DuplicateId(id)) if id == "a"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_exceptionally() {
        let registry: CorrelationRegistry<i32> = CorrelationRegistry::new("test");
        let pending = registry.register("a", None).unwrap();
        registry.complete_exceptionally(
            "a",
            CorrelationError::HandlerFailure {
                request_id: "a".to_string(),
                kind: ErrorKind::HandlerFailure,
                message: "boom".to_string(),
            },
        );
        assert!(matches!(
            pending.await,
            Err(CorrelationError::HandlerFailure { message, .. }) if message == "boom"
        ));
    }

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let registry = CorrelationRegistry::new("test");
        let a = registry.register("a", None).unwrap();
        let b = registry.register("b", None).unwrap();

        registry.complete("b", "second");
        assert!(registry.has_pending("a"));
        assert_eq!(b.await.unwrap(), "second");

        registry.complete("a", "first");
        assert_eq!(a.await.unwrap(), "first");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_evicts_slot() {
        let registry: CorrelationRegistry<i32> = CorrelationRegistry::new("test");
        let pending = registry
            .register("a", Some(Duration::from_millis(50)))
            .unwrap();

        let result = pending.await;
        assert!(matches!(
            result,
            Err(CorrelationError::Timeout { ref request_id, timeout_ms: 50 }) if request_id == "a"
        ));
        assert!(!registry.has_pending("a"));

        // late response
        assert!(!registry.complete("a", 1));
        assert_eq!(registry.stale_completions(), 1);
    }

    #[tokio::test]
    async fn test_completion_before_deadline_wins() {
        let registry = CorrelationRegistry::new("test");
        let pending = registry
            .register("a", Some(Duration::from_millis(50)))
            .unwrap();
        registry.complete("a", 7);
        assert_eq!(pending.await.unwrap(), 7);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.stale_completions(), 0);
    }

    #[tokio::test]
    async fn test_stale_deadline_does_not_evict_new_slot() {
        let registry = CorrelationRegistry::new("test");
        let first = registry
            .register("a", Some(Duration::from_millis(50)))
            .unwrap();
        drop(first);
        assert!(!registry.has_pending("a"));

        let second = registry.register("a", None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.has_pending("a"));
        registry.complete("a", 2);
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dropped_future_evicts_slot() {
        let registry: CorrelationRegistry<i32> = CorrelationRegistry::new("test");
        let pending = registry.register("a", None).unwrap();
        drop(pending);
        assert!(!registry.has_pending("a"));
        assert!(!registry.complete("a", 1));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry: CorrelationRegistry<i32> = CorrelationRegistry::new("test");
        let a = registry.register("a", None).unwrap();
        let b = registry.register("b", None).unwrap();

        let mut cancelled = registry.cancel_all("shutdown");
        cancelled.sort();
        assert_eq!(cancelled, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(a.await, Err(CorrelationError::Cancelled { .. })));
        assert!(matches!(b.await, Err(CorrelationError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_clear_closes_pending() {
        let registry: CorrelationRegistry<i32> = CorrelationRegistry::new("test");
        let pending = registry.register("a", None).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert!(matches!(pending.await, Err(CorrelationError::ChannelClosed(_))));
    }

    #[test]
    fn test_deadline_requires_runtime() {
        let registry: CorrelationRegistry<i32> = CorrelationRegistry::new("test");
        assert!(matches!(
            registry.register("a", Some(Duration::from_secs(1))),
            Err(CorrelationError::NoRuntime(_))
        ));
        assert!(registry.register("a", None).is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_register_and_complete() {
        let registry: CorrelationRegistry<usize> = CorrelationRegistry::new("test");
        let mut waiters = Vec::new();
        for i in 0..64 {
            waiters.push(registry.register(&format!("id-{}", i), None).unwrap());
        }

        let completer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in (0..64).rev() {
                    registry.complete(&format!("id-{}", i), i);
                }
            })
        };

        for (i, waiter) in waiters.into_iter().enumerate() {
            assert_eq!(waiter.await.unwrap(), i);
        }
        completer.await.unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.stale_completions(), 0);
    }

    proptest! {
        #[test]
        fn prop_complete_resolves_exactly_once(id in "[a-z0-9-]{1,24}", value in any::<i64>()) {
            let registry = CorrelationRegistry::new("prop");
            let pending = registry.register(&id, None).unwrap();
            prop_assert!(registry.complete(&id, value));
            prop_assert!(!registry.complete(&id, value.wrapping_add(1)));
            let resolved = futures::executor::block_on(pending).unwrap();
            prop_assert_eq!(resolved, value);
            prop_assert_eq!(registry.stale_completions(), 1);
        }
    }
}
