//! # Request Manager
//!
//! The RequestManager provides a request-response pattern on top of the asynchronous
//! event bus. A caller publishes a typed request and receives a future that resolves
//! with the typed result, an explicit remote error, or a timeout.
//!
//! ## Key Features
//!
//! - **Request-Response Correlation**: one [`CorrelationRegistry`] per operation
//! - **Timeout Handling**: deadline eviction scheduled on registration
//! - **Response Awaiting**: [`PendingResponse`] is a plain future, no thread is parked
//! - **Cancellation**: dropping the future evicts the slot; shutdown cancels all waiters
//!
//! ## Protocol
//!
//! ```text
//! CREATED ──register+publish──▶ PUBLISHED ──ok response──▶ COMPLETED
//!                                   │ ├──error response──▶ FAILED
//!                                   │ └──deadline────────▶ TIMED_OUT
//! ```

use std::{marker::PhantomData, sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    correlation::{CorrelationError, CorrelationRegistry, CorrelationResult, PendingResponse},
    envelope::{MessageEnvelope, ResponsePayload},
    event_bus::{ChannelPair, EventBus},
};

/// Type alias for request correlation identifiers
type RequestId = String;

/// # Request Manager
///
/// Publishes `Req` payloads on an operation's request channel and resolves the
/// matching `Res` from its result channel.
pub struct RequestManager<Req, Res> {
    /// Reference to the event bus for publishing requests
    event_bus: Arc<EventBus>,
    channels: ChannelPair,
    /// Envelope `source` of outgoing requests
    requester: String,
    /// Envelope `destination` of outgoing requests
    responder: String,
    registry: CorrelationRegistry<Res>,
    /// Deadline applied when a request does not specify one; `None` disables it
    default_timeout: Option<Duration>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Res> RequestManager<Req, Res>
where
    Req: Serialize,
    Res: DeserializeOwned + Send + 'static,
{
    /// Creates a new RequestManager for one operation.
    ///
    /// ```rust,no_run
    /// use std::{sync::Arc, time::Duration};
    /// use promptbus::event_bus::{ChannelPair, EventBus};
    /// use promptbus::request_manager::RequestManager;
    /// let event_bus = Arc::new(EventBus::new(100));
    /// let manager: RequestManager<String, String> = RequestManager::new(
    ///     event_bus,
    ///     ChannelPair::for_operation("echo"),
    ///     "web",
    ///     "worker",
    ///     Some(Duration::from_secs(5)),
    /// );
    /// ```
    pub fn new(
        event_bus: Arc<EventBus>,
        channels: ChannelPair,
        requester: &str,
        responder: &str,
        default_timeout: Option<Duration>,
    ) -> Self {
        let registry = CorrelationRegistry::new(&channels.result);
        Self {
            event_bus,
            channels,
            requester: requester.to_string(),
            responder: responder.to_string(),
            registry,
            default_timeout,
            _request: PhantomData,
        }
    }

    pub fn registry(&self) -> &CorrelationRegistry<Res> {
        &self.registry
    }

    pub fn channels(&self) -> &ChannelPair {
        &self.channels
    }

    /// Publishes a request and returns the future of its response.
    ///
    /// # Errors
    ///
    /// * `CorrelationError::Publish` - serializing or publishing the request failed
    /// * `CorrelationError::NoRuntime` - called outside a Tokio runtime with a deadline
    pub async fn request(
        &self,
        message_type: &str,
        payload: &Req,
    ) -> CorrelationResult<PendingResponse<Res>> {
        self.request_with_timeout(message_type, payload, self.default_timeout)
            .await
    }

    #[instrument(skip(self, payload), fields(channel = %self.channels.request))]
    pub async fn request_with_timeout(
        &self,
        message_type: &str,
        payload: &Req,
        timeout: Option<Duration>,
    ) -> CorrelationResult<PendingResponse<Res>> {
        let request_id: RequestId = Uuid::new_v4().to_string();
        let envelope = MessageEnvelope {
            id: request_id.clone(),
            source: self.requester.clone(),
            destination: self.responder.clone(),
            message_type: message_type.to_string(),
            timestamp: chrono::Utc::now(),
            payload,
        }
        .into_wire()?;

        let pending = self.registry.register(&request_id, timeout)?;
        // 失敗時は pending のドロップでスロットが解放される
        self.event_bus
            .publish(&self.channels.request, envelope)
            .await?;
        debug!(request_id = %request_id, "Request published");
        Ok(pending)
    }

    /// Publishes a request and waits for its response.
    pub async fn call(&self, message_type: &str, payload: &Req) -> CorrelationResult<Res> {
        self.request(message_type, payload).await?.await
    }

    /// Resolves the registry slot addressed by a response envelope.
    ///
    /// Returns `false` when the id has no live slot (late, duplicate, or evicted).
    pub fn handle_response(&self, response: &MessageEnvelope) -> bool {
        let request_id = response.id.as_str();
        match response.decode::<ResponsePayload>() {
            Ok(ResponsePayload::Ok { value }) => match serde_json::from_value::<Res>(value) {
                Ok(result) => self.registry.complete(request_id, result),
                Err(e) => self.registry.complete_exceptionally(
                    request_id,
                    CorrelationError::Conversion {
                        request_id: request_id.to_string(),
                        message: e.to_string(),
                    },
                ),
            },
            Ok(ResponsePayload::Error { error }) => self.registry.complete_exceptionally(
                request_id,
                CorrelationError::HandlerFailure {
                    request_id: request_id.to_string(),
                    kind: error.kind,
                    message: error.message,
                },
            ),
            Err(e) => self.registry.complete_exceptionally(
                request_id,
                CorrelationError::Conversion {
                    request_id: request_id.to_string(),
                    message: format!("malformed response payload: {}", e),
                },
            ),
        }
    }

    /// Fails every waiting request with `CorrelationError::Cancelled`.
    pub fn cancel_waiting_requests(&self, reason: &str) -> Vec<RequestId> {
        let cancelled = self.registry.cancel_all(reason);
        if !cancelled.is_empty() {
            info!(
                channel = %self.channels.request,
                count = cancelled.len(),
                "Cancelled waiting requests"
            );
        }
        cancelled
    }
}

impl<Req, Res> RequestManager<Req, Res>
where
    Req: Serialize + 'static,
    Res: DeserializeOwned + Send + Sync + 'static,
{
    /// Subscribes to the result channel and spawns the listener that resolves slots.
    ///
    /// The subscription is taken before this returns.
    pub fn spawn_result_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.event_bus.subscribe(&self.channels.result);
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(response) => {
                        manager.handle_response(&response);
                    }
                    Err(e) if e.is_lagged() => {
                        warn!(
                            channel = %manager.channels.result,
                            error = %e,
                            "Result listener lagged"
                        );
                    }
                    Err(e) => {
                        info!(
                            channel = %manager.channels.result,
                            error = %e,
                            "Result listener stopped"
                        );
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::envelope::ErrorKind;
    use serde_json::{Value, json};

    // テスト用のヘルパー関数
    async fn setup(
        timeout: Option<Duration>,
    ) -> (Arc<EventBus>, Arc<RequestManager<Value, i64>>, JoinHandle<()>) {
        let event_bus = Arc::new(EventBus::new(16));
        let manager = Arc::new(RequestManager::new(
            event_bus.clone(),
            ChannelPair::for_operation("count"),
            "web",
            "worker",
            timeout,
        ));
        let listener = manager.spawn_result_listener();
        (event_bus, manager, listener)
    }

    #[tokio::test]
    async fn test_request_response_success() {
        let (event_bus, manager, listener) = setup(Some(Duration::from_secs(5))).await;
        let mut request_rx = event_bus.subscribe("count.request");

        let request_task = tokio::spawn({
            let manager = manager.clone();
            async move { manager.call("count", &json!({"n": 1})).await }
        });

        let request = request_rx.recv().await.unwrap();
        assert_eq!(request.source, "web");
        assert_eq!(request.destination, "worker");
        assert_eq!(request.payload, json!({"n": 1}));

        let response = request.reply(json!({"status": "ok", "value": 10}));
        event_bus.publish("count.result", response).await.unwrap();

        assert_eq!(request_task.await.unwrap().unwrap(), 10);
        assert!(manager.registry().is_empty());
        listener.abort();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (_, manager, listener) = setup(Some(Duration::from_millis(100))).await;

        let result = manager.call("count", &json!({})).await;

        assert!(matches!(result, Err(CorrelationError::Timeout { .. })));
        assert!(manager.registry().is_empty());
        listener.abort();
    }

    #[tokio::test]
    async fn test_error_response_fails_future() {
        let (event_bus, manager, listener) = setup(None).await;
        let mut request_rx = event_bus.subscribe("count.request");

        let pending = manager.request("count", &json!({})).await.unwrap();
        let request = request_rx.recv().await.unwrap();
        event_bus
            .publish(
                "count.result",
                request.reply(
                    ResponsePayload::error(ErrorKind::HandlerFailure, "boom")
                        .to_value()
                        .unwrap(),
                ),
            )
            .await
            .unwrap();

        assert!(matches!(
            pending.await,
            Err(CorrelationError::HandlerFailure { kind: ErrorKind::HandlerFailure, .. })
        ));
        listener.abort();
    }

    #[tokio::test]
    async fn test_wrong_result_type_fails_future() {
        let (_, manager, listener) = setup(None).await;
        let pending = manager.request("count", &json!({})).await.unwrap();
        let id = pending.id().to_string();

        let response = MessageEnvelope::builder()
            .id(&id)
            .source("worker")
            .destination("web")
            .message_type("count")
            .payload(json!({"status": "ok", "value": "ten"}))
            .build()
            .unwrap();
        assert!(manager.handle_response(&response));

        assert!(matches!(pending.await, Err(CorrelationError::Conversion { .. })));
        listener.abort();
    }

    #[tokio::test]
    async fn test_multiple_requests_complete_out_of_order() {
        let (event_bus, manager, listener) = setup(Some(Duration::from_secs(5))).await;
        let mut request_rx = event_bus.subscribe("count.request");

        let first = manager.request("count", &json!({"n": 1})).await.unwrap();
        let second = manager.request("count", &json!({"n": 2})).await.unwrap();
        let first_request = request_rx.recv().await.unwrap();
        let second_request = request_rx.recv().await.unwrap();

        event_bus
            .publish(
                "count.result",
                second_request.reply(json!({"status": "ok", "value": 2})),
            )
            .await
            .unwrap();
        assert_eq!(second.await.unwrap(), 2);
        assert!(manager.registry().has_pending(first.id()));

        event_bus
            .publish(
                "count.result",
                first_request.reply(json!({"status": "ok", "value": 1})),
            )
            .await
            .unwrap();
        assert_eq!(first.await.unwrap(), 1);
        listener.abort();
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let (_, manager, listener) = setup(None).await;

        // 作成して即ドロップ
        let pending = manager.request("count", &json!({})).await.unwrap();
        drop(pending);

        assert!(manager.registry().is_empty());
        listener.abort();
    }

    #[tokio::test]
    async fn test_cancel_waiting_requests() {
        let (_, manager, listener) = setup(None).await;
        let pending = manager.request("count", &json!({})).await.unwrap();

        let cancelled = manager.cancel_waiting_requests("shutdown");
        assert_eq!(cancelled, vec![pending.id().to_string()]);
        assert!(matches!(pending.await, Err(CorrelationError::Cancelled { .. })));
        listener.abort();
    }
}
