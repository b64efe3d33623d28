//! Anthropic Messages API integration.
mod adapter;
mod config;
pub(crate) mod transport;

pub use adapter::AnthropicProvider;
pub use config::{ANTHROPIC_BASE_URL, ANTHROPIC_VERSION, AnthropicConfig};
