//! forge: runs one generation request and prints progress events as JSON lines.
//!
//! Backend credentials and `FORGE_*` tuning come from the environment (a
//! `.env` file in the working directory is loaded first). Logs go to stderr or
//! to `FORGE_JSON_LOG_PATH`, so stdout carries only events.

use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context as _, bail};
use clap::Parser;
use forge_core::{
    Artifact, ArtifactKind, EventSink, GenerationOutcome, GenerationPipeline, GenerationRequest,
    PipelineConfig, RouteTable,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "forge", version, about)]
struct Cli {
    /// What to build or change. Ignored when --request is given.
    instructions: Option<String>,

    /// Model id; the route table picks the backend from it.
    #[arg(long, short, env = "FORGE_MODEL", default_value = "qwen3-coder")]
    model: String,

    /// Treat the instructions as an edit of an existing app.
    #[arg(long)]
    edit: bool,

    /// Pre-formatted conversation summary sent as context.
    #[arg(long)]
    summary: Option<String>,

    /// Full request as a JSON file (instructions, is_edit, edit_scope, ...).
    #[arg(long, conflicts_with = "instructions")]
    request: Option<PathBuf>,

    /// Write closed files of the result under this directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Event channel capacity.
    #[arg(long, default_value_t = 256)]
    buffer: usize,
}

impl Cli {
    fn generation_request(&self) -> anyhow::Result<GenerationRequest> {
        if let Some(path) = self.request.as_deref() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading request file {}", path.display()))?;
            let request: GenerationRequest = serde_json::from_str(&raw)
                .with_context(|| format!("parsing request file {}", path.display()))?;
            return Ok(request);
        }
        let Some(instructions) = self.instructions.as_deref().filter(|s| !s.trim().is_empty()) else {
            bail!("pass instructions or --request <file>");
        };
        let mut request = GenerationRequest::new(self.model.clone(), instructions);
        request.is_edit = self.edit;
        request.conversation_summary = self.summary.clone();
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    forge_core::init_observability();
    let cli = Cli::parse();

    let request = cli.generation_request()?;
    let config = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let backends = forge_core::backends::harness_from_env(config.timeouts.per_call())
        .context("registering backends")?;
    let pipeline = GenerationPipeline::builder()
        .harness(backends.harness)
        .route_table(RouteTable::default_table(backends.gemini_configured))
        .config(config)
        .build()
        .context("building pipeline")?;

    let (sink, mut events) = EventSink::channel(cli.buffer);
    let run = tokio::spawn(async move { pipeline.run(request, sink).await });

    let stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        let line = serde_json::to_string(&event).context("encoding event")?;
        let mut out = stdout.lock();
        writeln!(out, "{line}").context("writing event")?;
        out.flush().context("writing event")?;
    }

    match run.await.context("generation task panicked")? {
        GenerationOutcome::Complete(result) => {
            if let Some(dir) = cli.out_dir.as_deref() {
                let written = write_files(dir, &result.artifacts)?;
                info!(dir = %dir.display(), written, "files written");
            }
            Ok(())
        }
        GenerationOutcome::Fatal { message } => bail!("generation failed: {message}"),
    }
}

/// Writes every closed File artifact under `dir`. Returns the count written.
fn write_files(dir: &Path, artifacts: &[Artifact]) -> anyhow::Result<usize> {
    let mut written = 0;
    for artifact in artifacts {
        if artifact.kind != ArtifactKind::File || !artifact.closed {
            continue;
        }
        let Some(relative) = artifact.path().and_then(safe_relative) else {
            tracing::warn!(path = artifact.path().unwrap_or("-"), "skipping file with unsafe path");
            continue;
        };
        let target = dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&target, &artifact.body)
            .with_context(|| format!("writing {}", target.display()))?;
        written += 1;
    }
    Ok(written)
}

/// `path` as a relative path that cannot leave the output directory.
fn safe_relative(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    let safe = candidate
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (safe && !path.is_empty()).then(|| candidate.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_build_a_request() {
        let cli = Cli::parse_from(["forge", "--edit", "-m", "anthropic/claude-sonnet-4", "make it blue"]);
        let request = cli.generation_request().expect("request");
        assert_eq!(request.model_id, "anthropic/claude-sonnet-4");
        assert_eq!(request.instructions, "make it blue");
        assert!(request.is_edit);
    }

    #[test]
    fn missing_instructions_is_an_error() {
        let cli = Cli::parse_from(["forge"]);
        assert!(cli.generation_request().is_err());
    }

    #[test]
    fn only_closed_files_inside_the_directory_are_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut open = Artifact::file("src/open.js", "const a = (");
        open.closed = false;
        let artifacts = vec![
            Artifact::file("src/App.jsx", "export default function App() {}"),
            Artifact::file("../escape.js", "nope"),
            open,
        ];
        let written = write_files(dir.path(), &artifacts).expect("write");
        assert_eq!(written, 1);
        let app = std::fs::read_to_string(dir.path().join("src/App.jsx")).expect("app");
        assert_eq!(app, "export default function App() {}");
        assert!(!dir.path().join("src/open.js").exists());
    }
}
