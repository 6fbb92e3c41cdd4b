//! # Cross-Process Request/Response
//!
//! Callers dispatch work to a worker pool over a message bus and receive typed results
//! through futures. Components are connected only through the bus and the per-operation
//! correlation registries.
//!
//! ## Architecture Overview
//!
//! - **EventBus**: named broadcast channels, one request/result pair per operation
//! - **MessageEnvelope**: id/source/destination/type/timestamp/payload wire unit
//! - **CorrelationRegistry**: id → pending slot, with deadline eviction
//! - **RequestManager**: publishes requests and resolves slots from the result channel
//! - **Dispatcher**: consumes a request channel and routes to typed handlers
//! - **Responder**: publishes the response envelope for every handled request
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐  x.request  ┌──────────┐  x.request  ┌────────────┐
//! │RequestManager│───────────▶│ EventBus │────────────▶│ Dispatcher │
//! └──────▲──────┘             └──────────┘             └─────┬──────┘
//!        │ complete(id)            ▲                         │ handler
//!  ┌─────┴─────┐   x.result        │       x.result    ┌─────▼─────┐
//!  │ Registry  │◀──────────────────┴───────────────────│ Responder │
//!  └───────────┘                                       └───────────┘
//! ```
//!
//! ## Request-Response Example
//!
//! ```rust,no_run
//! # use std::{sync::Arc, time::Duration};
//! # use promptbus::event_bus::{ChannelPair, EventBus};
//! # use promptbus::event::dispatcher::{Dispatcher, HandlerError};
//! # use promptbus::request_manager::RequestManager;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = Arc::new(EventBus::new(100));
//! let channels = ChannelPair::for_operation("echo");
//!
//! let dispatcher = Arc::new(Dispatcher::new(event_bus.clone(), channels.clone(), 8));
//! dispatcher.register_fn("echo", |text: String| async move { Ok::<_, HandlerError>(text) });
//! dispatcher.spawn();
//!
//! let manager = Arc::new(RequestManager::<String, String>::new(
//!     event_bus.clone(),
//!     channels,
//!     "web",
//!     "worker",
//!     Some(Duration::from_secs(5)),
//! ));
//! manager.spawn_result_listener();
//!
//! let echoed = manager.call("echo", &"hello".to_string()).await?;
//! assert_eq!(echoed, "hello");
//! # Ok(())
//! # }
//! ```

pub mod correlation;
pub mod dispatcher;
pub mod envelope;
pub mod event_bus;
pub mod request_manager;
pub mod responder;
