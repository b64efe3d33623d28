use std::sync::Arc;

use forge_harness::prelude::*;
use forge_harness::vendors::openai::{OpenAiCompatConfig, OpenAiCompatProvider};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    let key = std::env::var("GROQ_API_KEY").unwrap_or_default();
    let harness = Harness::builder()
        .register_provider(Arc::new(OpenAiCompatProvider::new(OpenAiCompatConfig::groq(key))?))
        .build()?;

    let mut run = harness
        .session(SessionConfig::named("stream"))
        .run(ModelRef::new("groq", "moonshotai/kimi-k2-instruct-0905"))
        .system_prompt("Wrap every file you write in <file path=\"...\"> tags.")
        .user_text("Write a one-line src/index.css that sets a dark background.")
        .max_output_tokens(256)
        .start_stream()
        .await?;

    while let Some(event) = run.next_event().await {
        match event {
            StreamEvent::OutputDelta { text, .. } => print!("{text}"),
            StreamEvent::Completed { output, .. } => {
                println!();
                eprintln!("finish reason: {:?}", output.finish_reason);
            }
            StreamEvent::Error { error, .. } => eprintln!("run error: {error}"),
            StreamEvent::RunStarted { .. } => {}
        }
    }

    let _ = run.finish().await?;
    Ok(())
}
