//! Worker-side half of the response path: turns a handler outcome into a response
//! envelope on the operation's result channel.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{
    dispatcher::HandlerError,
    envelope::{MessageEnvelope, ResponsePayload},
    event_bus::{EventBus, EventResult},
};

/// Publishes response envelopes for one result channel.
///
/// Every request gets exactly one response: a success payload or a well-formed error
/// payload, never an empty one.
#[derive(Clone)]
pub struct Responder {
    event_bus: Arc<EventBus>,
    result_channel: String,
}

impl Responder {
    pub fn new(event_bus: Arc<EventBus>, result_channel: &str) -> Self {
        Self {
            event_bus,
            result_channel: result_channel.to_string(),
        }
    }

    pub fn result_channel(&self) -> &str {
        &self.result_channel
    }

    /// Builds the response for `request` and publishes it.
    pub async fn respond(
        &self,
        request: &MessageEnvelope,
        outcome: Result<Value, HandlerError>,
    ) -> EventResult<()> {
        let payload = match outcome {
            Ok(value) => ResponsePayload::Ok { value },
            Err(e) => {
                warn!(
                    request_id = %request.id,
                    message_type = %request.message_type,
                    error = %e,
                    "Handler failed; publishing error response"
                );
                e.into_payload()
            }
        };
        let response = request.reply(payload.to_value()?);
        debug!(request_id = %response.id, ok = payload.is_ok(), "Responding");
        self.event_bus.publish(&self.result_channel, response).await
    }
}
