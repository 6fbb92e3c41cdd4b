use thiserror::Error;

use crate::binding::BindError;
use crate::correlation::CorrelationError;
use crate::dispatcher::HandlerError;
use crate::event_bus::EventError;
use crate::prompt::PromptError;
use crate::system::SystemError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("System error: {0}")]
    System(#[from] SystemError),
    // event error
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
    #[error("Binding error: {0}")]
    Bind(#[from] BindError),
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
