//! # Dispatcher
//!
//! Generic consumer for one request channel. Handlers are registered per envelope
//! `type`; the dispatcher converts the opaque payload into the handler's request type,
//! runs the handler, and hands the outcome to the [`Responder`].
//!
//! Every received request produces exactly one response envelope:
//!
//! | situation                         | response                      |
//! |-----------------------------------|-------------------------------|
//! | handler returned `Ok`             | `{"status":"ok", ...}`        |
//! | payload does not convert          | error `ConversionFailure`     |
//! | no handler for the `type`         | error `UnsupportedType`       |
//! | handler returned `Err` or panicked| error `HandlerFailure`        |
//!
//! Per-message failures never stop the listener loop.

use std::{future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{FutureExt, future::BoxFuture};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{
    envelope::{ErrorKind, MessageEnvelope, ResponsePayload},
    event_bus::{ChannelPair, EventBus, EventResult},
    responder::Responder,
};

/// Typed request handler for one envelope `type`.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn handle(&self, request: Self::Request) -> Result<Self::Response, HandlerError>;
}

/// Adapts an async closure into a [`RequestHandler`].
pub struct FnHandler<F, Req, Res> {
    f: F,
    _marker: PhantomData<fn(Req) -> Res>,
}

#[async_trait]
impl<F, Fut, Req, Res> RequestHandler for FnHandler<F, Req, Res>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, HandlerError>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
{
    type Request = Req;
    type Response = Res;

    async fn handle(&self, request: Req) -> Result<Res, HandlerError> {
        (self.f)(request).await
    }
}

// 型消去したハンドラ
type ErasedHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

fn erase<H: RequestHandler>(handler: H) -> ErasedHandler {
    let handler = Arc::new(handler);
    Arc::new(move |payload: Value| {
        let handler = handler.clone();
        async move {
            let request: H::Request = serde_json::from_value(payload)
                .map_err(|e| HandlerError::Conversion(e.to_string()))?;
            let response = handler.handle(request).await?;
            serde_json::to_value(response).map_err(|e| HandlerError::Failed(e.to_string()))
        }
        .boxed()
    })
}

/// # Dispatcher
///
/// Routes envelopes from one request channel to typed handlers and guarantees a
/// response for each of them.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use promptbus::event_bus::{ChannelPair, EventBus};
/// # use promptbus::event::dispatcher::{Dispatcher, HandlerError};
/// # async fn example() {
/// let bus = Arc::new(EventBus::new(100));
/// let dispatcher = Arc::new(Dispatcher::new(bus, ChannelPair::for_operation("echo"), 8));
/// dispatcher.register_fn("echo", |text: String| async move { Ok::<_, HandlerError>(text) });
/// let listener = dispatcher.spawn();
/// # listener.abort();
/// # }
/// ```
pub struct Dispatcher {
    event_bus: Arc<EventBus>,
    channels: ChannelPair,
    handlers: DashMap<String, ErasedHandler>,
    responder: Responder,
    concurrency: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(event_bus: Arc<EventBus>, channels: ChannelPair, concurrency: usize) -> Self {
        let responder = Responder::new(event_bus.clone(), &channels.result);
        Self {
            event_bus,
            channels,
            handlers: DashMap::new(),
            responder,
            concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn channels(&self) -> &ChannelPair {
        &self.channels
    }

    /// Installs `handler` for envelopes whose `type` is `message_type`, replacing any
    /// previous handler for that type.
    pub fn register<H: RequestHandler>(&self, message_type: &str, handler: H) {
        debug!(channel = %self.channels.request, message_type, "Register handler");
        self.handlers
            .insert(message_type.to_string(), erase(handler));
    }

    pub fn register_fn<F, Fut, Req, Res>(&self, message_type: &str, f: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, HandlerError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
    {
        self.register(
            message_type,
            FnHandler {
                f,
                _marker: PhantomData,
            },
        );
    }

    pub fn has_handler(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    /// Handles one request envelope and publishes its response.
    pub async fn dispatch(&self, request: MessageEnvelope) -> EventResult<()> {
        let handler = self
            .handlers
            .get(&request.message_type)
            .map(|entry| entry.value().clone());

        let outcome = match handler {
            Some(handler) => {
                // パニックもエラーレスポンスに変換する
                let invocation = tokio::spawn(handler(request.payload.clone()));
                match invocation.await {
                    Ok(result) => result,
                    Err(join_error) => Err(HandlerError::Failed(format!(
                        "handler aborted: {}",
                        join_error
                    ))),
                }
            }
            None => Err(HandlerError::UnsupportedType(request.message_type.clone())),
        };

        self.responder.respond(&request, outcome).await
    }

    /// Subscribes to the request channel and spawns the listener loop.
    ///
    /// The subscription is taken before this returns, so no request published after
    /// the call is missed. Abort the returned handle to stop listening.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.event_bus.subscribe(&self.channels.request);
        let dispatcher = self.clone();
        tokio::spawn(async move {
            info!(channel = %dispatcher.channels.request, "Dispatcher listening");
            loop {
                let request = match receiver.recv().await {
                    Ok(request) => request,
                    Err(e) if e.is_lagged() => {
                        warn!(
                            channel = %dispatcher.channels.request,
                            error = %e,
                            "Dispatcher lagged"
                        );
                        continue;
                    }
                    Err(e) => {
                        info!(
                            channel = %dispatcher.channels.request,
                            error = %e,
                            "Dispatcher stopped"
                        );
                        break;
                    }
                };

                let permit = match dispatcher.concurrency.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let worker = dispatcher.clone();
                tokio::spawn(async move {
                    let request_id = request.id.clone();
                    if let Err(e) = worker.dispatch(request).await {
                        error!(request_id = %request_id, error = %e, "Failed to publish response");
                    }
                    drop(permit);
                });
            }
        })
    }
}

/// Worker-side failure. Always converted into an error response payload.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Request conversion failed: {0}")]
    Conversion(String),

    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("No handler for type: {0}")]
    UnsupportedType(String),
}

impl HandlerError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        HandlerError::Failed(message.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Conversion(_) => ErrorKind::ConversionFailure,
            HandlerError::Failed(_) => ErrorKind::HandlerFailure,
            HandlerError::UnsupportedType(_) => ErrorKind::UnsupportedType,
        }
    }

    pub fn into_payload(self) -> ResponsePayload {
        ResponsePayload::error(self.kind(), self.to_string())
    }
}
