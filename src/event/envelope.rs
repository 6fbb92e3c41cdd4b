//! # Message Envelope
//!
//! Wire-level unit exchanged over the bus. Every request and every response travels
//! inside a [`MessageEnvelope`]; the envelope carries the correlation id that joins a
//! response to the request that caused it.
//!
//! ## Wire Format
//!
//! ```text
//! {"id": "...", "source": "...", "destination": "...", "type": "...",
//!  "timestamp": "2024-05-01T12:00:00Z", "payload": <opaque>}
//! ```
//!
//! Responses always carry a [`ResponsePayload`], never an empty payload, so the waiting
//! caller resolves deterministically even when the worker failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use super::event_bus::{EventError, EventResult};

/// Envelope around an opaque payload.
///
/// `P` defaults to [`serde_json::Value`], which is what the bus carries. Typed
/// envelopes are converted with [`MessageEnvelope::into_wire`] and
/// [`MessageEnvelope::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope<P = Value> {
    /// Correlation id, unique among in-flight requests
    pub id: String,
    /// Logical sender
    pub source: String,
    /// Logical receiver
    pub destination: String,
    /// Sub-kind tag used to pick a handler on a shared channel
    #[serde(rename = "type")]
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: P,
}

impl MessageEnvelope<Value> {
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new()
    }

    /// Converts the opaque payload into a typed value.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        P::deserialize(&self.payload)
    }

    /// Builds the response envelope: same id and type, endpoints swapped.
    pub fn reply(&self, payload: Value) -> MessageEnvelope {
        MessageEnvelope {
            id: self.id.clone(),
            source: self.destination.clone(),
            destination: self.source.clone(),
            message_type: self.message_type.clone(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn to_json(&self) -> EventResult<String> {
        serde_json::to_string(self).map_err(|e| EventError::Codec {
            message: e.to_string(),
        })
    }

    pub fn from_json(json: &str) -> EventResult<Self> {
        serde_json::from_str(json).map_err(|e| EventError::Codec {
            message: e.to_string(),
        })
    }
}

impl<P: Serialize> MessageEnvelope<P> {
    /// Serializes a typed payload into the opaque form carried by the bus.
    pub fn into_wire(self) -> EventResult<MessageEnvelope> {
        let payload = serde_json::to_value(&self.payload).map_err(|e| EventError::Codec {
            message: e.to_string(),
        })?;
        Ok(MessageEnvelope {
            id: self.id,
            source: self.source,
            destination: self.destination,
            message_type: self.message_type,
            timestamp: self.timestamp,
            payload,
        })
    }
}

#[derive(Default, Clone)]
pub struct EnvelopeBuilder {
    id: Option<String>,
    source: Option<String>,
    destination: Option<String>,
    message_type: Option<String>,
    payload: Option<Value>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }

    pub fn message_type(mut self, message_type: &str) -> Self {
        self.message_type = Some(message_type.to_string());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the envelope. A missing id is replaced by a fresh UUID v4.
    pub fn build(self) -> EventResult<MessageEnvelope> {
        Ok(MessageEnvelope {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            source: self.source.ok_or(EventError::EnvelopeBuilderFailed(
                "source is required".to_string(),
            ))?,
            destination: self.destination.ok_or(EventError::EnvelopeBuilderFailed(
                "destination is required".to_string(),
            ))?,
            message_type: self.message_type.ok_or(EventError::EnvelopeBuilderFailed(
                "type is required".to_string(),
            ))?,
            timestamp: Utc::now(),
            payload: self.payload.unwrap_or(Value::Null),
        })
    }
}

/// Kind of failure reported in an error response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum ErrorKind {
    /// Domain handler returned an error or panicked
    HandlerFailure,
    /// Request payload did not match the handler's declared request type
    ConversionFailure,
    /// No handler registered for the envelope's type
    UnsupportedType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

/// Payload of every response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponsePayload {
    Ok { value: Value },
    Error { error: ErrorPayload },
}

impl ResponsePayload {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ResponsePayload::Error {
            error: ErrorPayload {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ResponsePayload::Ok { .. })
    }

    pub fn to_value(&self) -> EventResult<Value> {
        serde_json::to_value(self).map_err(|e| EventError::Codec {
            message: e.to_string(),
        })
    }
}
