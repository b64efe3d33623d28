//! Streaming generation and recovery pipeline.
//!
//! Raw model deltas are scanned for block markers, assembled into artifacts,
//! continued when the backend cuts output off, audited for truncation and
//! missing imports, and repaired with narrowly scoped follow-up generations.
//!
//! ```no_run
//! use forge_core::{EventSink, GenerationPipeline, GenerationRequest, PipelineConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_env()?;
//! let backends = forge_core::backends::harness_from_env(config.timeouts.per_call())?;
//! let pipeline = GenerationPipeline::builder()
//!     .harness(backends.harness)
//!     .config(config)
//!     .build()?;
//!
//! let (sink, mut events) = EventSink::channel(256);
//! let run = tokio::spawn(async move {
//!     pipeline
//!         .run(GenerationRequest::new("qwen3-coder", "A todo app"), sink)
//!         .await
//! });
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! run.await?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod assembler;
pub mod auditor;
pub mod autofix;
pub mod backends;
pub mod config;
pub mod continuation;
pub mod edit_scope;
pub mod error;
pub mod events;
pub mod issue;
pub mod judge;
pub mod observability;
pub mod packages;
pub mod pipeline;
pub mod prompts;
pub mod router;
pub mod scanner;
#[cfg(test)]
mod testing;

pub use artifact::{Artifact, ArtifactKind, ArtifactSet};
pub use assembler::{AssemblyEvent, StreamState, assemble_text};
pub use auditor::{AuditContext, Auditor};
pub use config::PipelineConfig;
pub use edit_scope::{EditIntentAnalyzer, EditScope, FileManifestProvider};
pub use error::{ConfigError, PipelineError, RouteError};
pub use events::{EventSink, GenerationResult, PipelineEvent};
pub use issue::{Issue, IssueType, Severity};
pub use judge::{CompletenessJudge, TruncationReason, Verdict};
pub use observability::init_observability;
pub use pipeline::{GenerationOutcome, GenerationPipeline, GenerationRequest};
pub use router::{ProviderRouter, RetryPolicy, RouteTable};
