use std::sync::Arc;

use forge_harness::prelude::*;
use forge_harness::vendors::anthropic::{AnthropicConfig, AnthropicProvider};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    let key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    let harness = Harness::builder()
        .register_provider(Arc::new(AnthropicProvider::new(AnthropicConfig::new(key))?))
        .build()?;

    let output = harness
        .session(SessionConfig::named("collect"))
        .run(ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
        .system_prompt("You are a concise assistant. Reply with a short sentence.")
        .user_text("Say hello")
        .max_output_tokens(64)
        .collect_output()
        .await?;

    println!("{}", output.text());
    if output.was_length_limited() {
        eprintln!("output was cut at the token limit");
    }
    Ok(())
}
