use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    binding::ArgumentBinder,
    config::SystemConfig,
    dispatcher::Dispatcher,
    event_bus::{ChannelPair, EventBus},
    prompt::{PromptAssembler, PromptRegistry},
    request_manager::RequestManager,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SystemError {
    #[error("System is shut down")]
    ShutDown,
    #[error("Operation '{operation}' already has a request manager with other payload types")]
    TypeMismatch { operation: String },
    #[error("Operation '{operation}' already sends to '{existing}', not '{requested}'")]
    DestinationMismatch {
        operation: String,
        existing: String,
        requested: String,
    },
}

pub type SystemResult<T> = Result<T, SystemError>;

struct ManagerEntry {
    manager: Arc<dyn Any + Send + Sync>,
    destination: String,
    cancel: Box<dyn Fn(&str) -> usize + Send + Sync>,
    listener: JoinHandle<()>,
}

/// Wires the bus, per-operation request managers and dispatchers, and the prompt
/// assembler from one [`SystemConfig`].
pub struct System {
    config: SystemConfig,
    event_bus: Arc<EventBus>,
    managers: DashMap<String, ManagerEntry>,
    dispatchers: DashMap<String, (Arc<Dispatcher>, JoinHandle<()>)>,
    prompts: Arc<PromptRegistry>,
    assembler: Arc<PromptAssembler>,
    shut_down: AtomicBool,
}

impl System {
    pub fn new(config: &SystemConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let assembler =
            PromptAssembler::new().with_binder(ArgumentBinder::from(&config.binding));

        Self {
            config: config.clone(),
            event_bus,
            managers: DashMap::new(),
            dispatchers: DashMap::new(),
            prompts: Arc::new(PromptRegistry::new()),
            assembler: Arc::new(assembler),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn prompts(&self) -> Arc<PromptRegistry> {
        self.prompts.clone()
    }

    pub fn assembler(&self) -> Arc<PromptAssembler> {
        self.assembler.clone()
    }

    fn ensure_running(&self) -> SystemResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(SystemError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Returns the request manager for `operation`, creating it and spawning its
    /// result listener on first use. Must be called inside a Tokio runtime.
    ///
    /// An operation has one manager, so later calls must ask for the same payload types
    /// and `destination` as the first one.
    pub fn request_manager<Req, Res>(
        &self,
        operation: &str,
        destination: &str,
    ) -> SystemResult<Arc<RequestManager<Req, Res>>>
    where
        Req: Serialize + 'static,
        Res: DeserializeOwned + Send + Sync + 'static,
    {
        self.ensure_running()?;

        let entry = self.managers.entry(operation.to_string()).or_insert_with(|| {
            let manager = Arc::new(RequestManager::<Req, Res>::new(
                self.event_bus.clone(),
                ChannelPair::for_operation(operation),
                &self.config.node_name,
                destination,
                self.config.correlation_timeout(),
            ));
            let listener = manager.spawn_result_listener();
            let cancel_target = manager.clone();
            debug!(operation, destination, "Created request manager");
            ManagerEntry {
                manager,
                destination: destination.to_string(),
                cancel: Box::new(move |reason| {
                    cancel_target.cancel_waiting_requests(reason).len()
                }),
                listener,
            }
        });

        if entry.destination != destination {
            return Err(SystemError::DestinationMismatch {
                operation: operation.to_string(),
                existing: entry.destination.clone(),
                requested: destination.to_string(),
            });
        }

        entry
            .manager
            .clone()
            .downcast::<RequestManager<Req, Res>>()
            .map_err(|_| SystemError::TypeMismatch {
                operation: operation.to_string(),
            })
    }

    /// Returns the dispatcher consuming `operation`'s request channel, creating and
    /// spawning it on first use. Must be called inside a Tokio runtime.
    pub fn dispatcher(&self, operation: &str) -> SystemResult<Arc<Dispatcher>> {
        self.ensure_running()?;

        let entry = self
            .dispatchers
            .entry(operation.to_string())
            .or_insert_with(|| {
                let dispatcher = Arc::new(Dispatcher::new(
                    self.event_bus.clone(),
                    ChannelPair::for_operation(operation),
                    self.config.listener_concurrency,
                ));
                let listener = dispatcher.spawn();
                debug!(operation, "Created dispatcher");
                (dispatcher, listener)
            });
        Ok(entry.0.clone())
    }

    /// Cancels every waiting request and stops all listeners.
    ///
    /// Returns the number of requests cancelled.
    pub fn shutdown(&self) -> SystemResult<usize> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Err(SystemError::ShutDown);
        }

        let mut cancelled = 0;
        for entry in self.managers.iter() {
            cancelled += (entry.cancel)("system shutdown");
            entry.listener.abort();
        }
        for entry in self.dispatchers.iter() {
            entry.1.abort();
        }
        self.managers.clear();
        self.dispatchers.clear();

        info!(cancelled, "System shut down");
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{correlation::CorrelationError, dispatcher::HandlerError};
    use std::time::Duration;

    fn config() -> SystemConfig {
        SystemConfig {
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_system() {
        let system = System::new(&config());
        let dispatcher = system.dispatcher("echo").unwrap();
        dispatcher.register_fn("upper", |text: String| async move {
            Ok::<_, HandlerError>(text.to_uppercase())
        });

        let manager = system
            .request_manager::<String, String>("echo", "worker")
            .unwrap();
        let result = manager.call("upper", &"hello".to_string()).await.unwrap();
        assert_eq!(result, "HELLO");
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_components_are_reused_per_operation() {
        let system = System::new(&config());
        let first = system.request_manager::<String, String>("echo", "worker").unwrap();
        let second = system.request_manager::<String, String>("echo", "worker").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let mismatch = system.request_manager::<String, i64>("echo", "worker");
        assert_eq!(
            mismatch.err(),
            Some(SystemError::TypeMismatch {
                operation: "echo".to_string()
            })
        );

        let elsewhere = system.request_manager::<String, String>("echo", "other-worker");
        assert_eq!(
            elsewhere.err(),
            Some(SystemError::DestinationMismatch {
                operation: "echo".to_string(),
                existing: "worker".to_string(),
                requested: "other-worker".to_string(),
            })
        );

        let d1 = system.dispatcher("echo").unwrap();
        let d2 = system.dispatcher("echo").unwrap();
        assert!(Arc::ptr_eq(&d1, &d2));
    }

    #[tokio::test]
    async fn test_zero_buffer_size_does_not_break_the_bus() {
        let system = System::new(&SystemConfig {
            event_buffer_size: 0,
            ..config()
        });
        let dispatcher = system.dispatcher("ops").unwrap();
        dispatcher.register_fn("echo", |text: String| async move {
            Ok::<_, HandlerError>(text)
        });
        let manager = system
            .request_manager::<String, String>("ops", "worker")
            .unwrap();
        assert_eq!(manager.call("echo", &"hi".to_string()).await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_waiting_requests() {
        let system = System::new(&config());
        let manager = system
            .request_manager::<String, String>("silent", "nobody")
            .unwrap();
        let pending = manager.request("noop", &"x".to_string()).await.unwrap();

        assert_eq!(system.shutdown().unwrap(), 1);
        assert!(matches!(
            pending.await,
            Err(CorrelationError::Cancelled { .. })
        ));

        assert_eq!(system.shutdown(), Err(SystemError::ShutDown));
        assert!(system.dispatcher("echo").is_err());
    }
}
