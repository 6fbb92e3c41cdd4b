//! # promptbus: Correlated Request/Response and Prompt Assembly
//!
//! promptbus lets a caller dispatch work to a worker pool over a message bus and
//! receive a typed result through a future, and assembles the outbound payload from
//! heterogeneous data sources before it is sent.
//!
//! ## Components
//!
//! ### 1. Cross-process request/response ([`event`])
//! - Envelopes and the wire codec ([`envelope`])
//! - Named request/result channels ([`event_bus`])
//! - Per-operation correlation registries with deadlines ([`correlation`])
//! - Request publishing and result resolution ([`request_manager`])
//! - Typed handler dispatch and responses ([`dispatcher`], [`responder`])
//!
//! ### 2. Argument binding ([`binding`])
//! Resolves schema-declared arguments from ordered sources through explicit paths,
//! aliases, naming-convention variants and deep search, then coerces them to the
//! declared types.
//!
//! ### 3. Prompt assembly ([`prompt`])
//! Merges defaults, validates against the prompt's JSON schema, renders logic-less
//! templates and bundles a [`prompt::RenderedRequest`].
//!
//! ### 4. Wiring ([`system`], [`config`])
//! [`system::System`] builds every component from a [`config::SystemConfig`].
//!
//! ## Pipeline
//!
//! ```text
//! sources → Binder → Assembler → RequestManager → bus → Dispatcher → handler
//!                                      ▲                                │
//!                                      └──────── bus ◀── Responder ◀────┘
//! ```

pub mod binding;
pub mod config;
pub mod error;
pub mod event;
pub mod prompt;
pub mod system;

// Re-exports
pub use error::*;
pub use event::*;

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        // テストの前に一度だけ tracing を初期化する
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
