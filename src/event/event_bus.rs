//! # Event Bus Implementation
//!
//! In-process stand-in for the message bus. Every logical operation owns a pair of
//! named channels (`<operation>.request` / `<operation>.result`); each channel is a
//! Tokio broadcast channel so several listeners may observe the same traffic.
//!
//! ## Design Decisions
//!
//! The implementation uses Tokio's broadcast channel rather than MPSC channels to:
//!
//! 1. Allow multiple subscribers to receive the same envelope
//! 2. Handle backpressure through the channel capacity
//! 3. Support non-blocking publish operations
//!
//! Channels are created lazily on first publish or subscribe. No ordering is implied
//! across channels.

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use super::envelope::MessageEnvelope;

/// Names of the request and result channels of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelPair {
    pub request: String,
    pub result: String,
}

impl ChannelPair {
    /// `answer-feedback` → `answer-feedback.request` / `answer-feedback.result`
    pub fn for_operation(operation: &str) -> Self {
        Self {
            request: format!("{}.request", operation),
            result: format!("{}.result", operation),
        }
    }
}

struct Channel {
    sender: broadcast::Sender<MessageEnvelope>,
    /// Keeps the channel open while nobody is subscribed
    _internal_receiver: broadcast::Receiver<MessageEnvelope>,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity);
        Self {
            sender,
            _internal_receiver: receiver,
        }
    }
}

/// # EventBus
///
/// Named-channel broadcast bus carrying [`MessageEnvelope`]s with opaque JSON payloads.
///
/// ## Capacity and Backpressure
///
/// Each channel buffers up to `capacity` envelopes. Slow receivers lag and skip
/// envelopes instead of blocking publishers.
pub struct EventBus {
    channels: DashMap<String, Channel>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given per-channel buffer capacity (at least 1).
    ///
    /// ```rust,no_run
    /// use promptbus::event_bus::EventBus;
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<MessageEnvelope> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| Channel::new(self.capacity))
            .sender
            .clone()
    }

    /// Subscribes to a channel. Only envelopes published after this call are received.
    pub fn subscribe(&self, channel: &str) -> EnvelopeReceiver {
        EnvelopeReceiver::new(channel, self.sender(channel).subscribe())
    }

    /// Publishes an envelope to every subscriber of `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SendFailed`] if the channel is closed.
    pub async fn publish(&self, channel: &str, envelope: MessageEnvelope) -> EventResult<()> {
        self.sync_publish(channel, envelope)
    }

    /// Publishes without awaiting; same behavior as [`EventBus::publish`].
    pub fn sync_publish(&self, channel: &str, envelope: MessageEnvelope) -> EventResult<()> {
        debug_envelope("Publishing", channel, &envelope);
        self.sender(channel)
            .send(envelope)
            .map_err(|e| EventError::SendFailed {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn queue_size(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.sender.len())
            .unwrap_or_default()
    }

    /// Number of subscribers, not counting the internal keep-alive receiver.
    pub fn subscribers_size(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.sender.receiver_count().saturating_sub(1))
            .unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub fn debug_envelope(prefix: &str, channel: &str, envelope: &MessageEnvelope) {
    debug!(
        channel,
        id = %envelope.id,
        source = %envelope.source,
        destination = %envelope.destination,
        message_type = %envelope.message_type,
        "{} envelope",
        prefix
    );
}

pub struct EnvelopeReceiver {
    channel: String,
    pub receiver: broadcast::Receiver<MessageEnvelope>,
}

impl EnvelopeReceiver {
    pub fn new(channel: &str, receiver: broadcast::Receiver<MessageEnvelope>) -> Self {
        Self {
            channel: channel.to_string(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receives the next envelope. On lag the receiver resubscribes and reports how many
    /// envelopes were skipped; callers should keep receiving after a `Lagged` error.
    pub async fn recv(&mut self) -> EventResult<MessageEnvelope> {
        match self.receiver.recv().await {
            Ok(envelope) => Ok(envelope),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                channel: self.channel.clone(),
                message: e.to_string(),
            }),
        }
    }
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Envelope send failed on {channel}: {message}")]
    SendFailed { channel: String, message: String },

    #[error("Envelope receive failed on {channel}: {message}")]
    ReceiveFailed { channel: String, message: String },

    #[error("Receiver lagged: {count}")]
    Lagged { count: u64 },

    #[error("Envelope codec error: {message}")]
    Codec { message: String },

    #[error("envelope builder failed: {0}")]
    EnvelopeBuilderFailed(String),
}

impl EventError {
    /// Lag is recoverable; every other receive error ends a listener loop.
    pub fn is_lagged(&self) -> bool {
        matches!(self, EventError::Lagged { .. })
    }
}

pub type EventResult<T> = Result<T, EventError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(message_type: &str) -> MessageEnvelope {
        MessageEnvelope::builder()
            .source("web")
            .destination("worker")
            .message_type(message_type)
            .payload(json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn test_channel_pair_naming() {
        let pair = ChannelPair::for_operation("answer-feedback");
        assert_eq!(pair.request, "answer-feedback.request");
        assert_eq!(pair.result, "answer-feedback.result");
    }

    #[tokio::test]
    async fn test_initial_publish_success() {
        let bus = EventBus::new(16);
        assert!(bus.publish("ops.request", envelope("test")).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_capacity_is_raised_to_one() {
        let bus = EventBus::new(0);
        assert_eq!(bus.capacity(), 1);
        let mut rx = bus.subscribe("ops.request");
        bus.publish("ops.request", envelope("test")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().message_type, "test");
    }

    #[tokio::test]
    async fn test_basic_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe("ops.request");

        bus.publish("ops.request", envelope("test")).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.message_type, "test");
        assert_eq!(rx.channel(), "ops.request");
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = EventBus::new(16);
        let mut request_rx = bus.subscribe("ops.request");
        let mut result_rx = bus.subscribe("ops.result");

        bus.publish("ops.result", envelope("result")).await.unwrap();
        bus.publish("ops.request", envelope("request")).await.unwrap();

        assert_eq!(request_rx.recv().await.unwrap().message_type, "request");
        assert_eq!(result_rx.recv().await.unwrap().message_type, "result");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe("ops.request");
        let mut rx2 = bus.subscribe("ops.request");
        assert_eq!(bus.subscribers_size("ops.request"), 2);

        bus.publish("ops.request", envelope("test")).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap().message_type, "test");
        assert_eq!(rx2.recv().await.unwrap().message_type, "test");
    }

    #[tokio::test]
    async fn test_lagged_receiver_recovers() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe("ops.request");

        for i in 0..5 {
            bus.publish("ops.request", envelope(&format!("test_{}", i)))
                .await
                .unwrap();
        }

        let err = rx.recv().await.unwrap_err();
        assert!(err.is_lagged());

        bus.publish("ops.request", envelope("after")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().message_type, "after");
    }
}
