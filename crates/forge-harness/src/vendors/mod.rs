/// Anthropic Messages API adapter.
pub mod anthropic;
/// OpenAI-compatible chat completions adapter and `RunBuilder` extensions.
pub mod openai;
pub(crate) mod sse;
