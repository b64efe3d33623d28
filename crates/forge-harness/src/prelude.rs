//! Common imports for typical harness usage.
pub use crate::{
    AbortHandle, FinishReason, Harness, HarnessBuilder, HarnessError, Message, ModelRef,
    OutputPart, ProviderId, RunBuilder, RunOutput, RunStream, Session, SessionConfig,
    StreamEvent,
};
