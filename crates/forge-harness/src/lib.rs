//! Provider-agnostic async model harness with a builder-first API.
//!
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Builder-first usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use forge_harness::prelude::*;
//! use forge_harness::vendors::openai::{OpenAiCompatConfig, OpenAiCompatProvider};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let key = std::env::var("GROQ_API_KEY").unwrap_or_default();
//! let harness = Harness::builder()
//!     .register_provider(Arc::new(OpenAiCompatProvider::new(OpenAiCompatConfig::groq(key))?))
//!     .build()?;
//!
//! let output = harness
//!     .session(SessionConfig::named("demo"))
//!     .run(ModelRef::new("groq", "moonshotai/kimi-k2-instruct-0905"))
//!     .system_prompt("Answer briefly.")
//!     .user_text("Say hello")
//!     .max_output_tokens(64)
//!     .collect_output()
//!     .await?;
//!
//! println!("{} ({:?})", output.text(), output.finish_reason);
//! # Ok(())
//! # }
//! ```

/// Conversation messages, output content and finish reasons.
pub mod content;
/// Public error types used by the harness API.
pub mod errors;
/// Harness entry point and builder.
pub mod harness;
/// Model and provider identifiers plus generic run options.
pub mod model;
/// Common imports for typical usage.
pub mod prelude;
/// Provider adapter contracts used by vendor integrations.
pub mod provider;
/// Run builder, streaming handle, and cancellation handle.
pub mod run;
/// Session configuration and session handle.
pub mod session;
/// Normalized public stream events.
pub mod stream;
/// Vendor-specific integrations and extension traits.
pub mod vendors;

pub use content::{FinishReason, Message, OutputPart, Role, RunOutput};
pub use errors::{HarnessError, ProviderError, RunFailure};
pub use harness::{Harness, HarnessBuilder};
pub use model::{ModelRef, ProviderId, RunOptions};
pub use provider::{
    ProviderAdapter, ProviderEvent, ProviderEventStream, ProviderRequest, ProviderResponseMeta,
    ProviderStreamHandle,
};
pub use run::{AbortHandle, RunBuilder, RunStream};
pub use session::{Session, SessionConfig};
pub use stream::StreamEvent;
