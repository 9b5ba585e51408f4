//! themeboard runner binary.
//!
//! Processes one input through the engine and prints the result as JSON.
//!
//! # Usage
//!
//! ```bash
//! themeboard [--config quality.yml] [--themes themes.json] [--stream] <text>
//! ```
//!
//! Without `--themes` the bundled catalog in `data/themes.json` is used.
//! With `--stream` one JSON line is printed per stream event.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: tracing filter (default: "info,themeboard=debug"). Logs go
//!   to stderr.

use anyhow::{bail, Context, Result};
use themeboard::streaming::StreamEvent;
use themeboard::{Engine, EngineConfig, ThemeCatalog};

const DEFAULT_CATALOG: &str = include_str!("../../data/themes.json");

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    themes: Option<String>,
    stream: bool,
    text: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(iter.next().context("--config needs a path")?),
            "--themes" => args.themes = Some(iter.next().context("--themes needs a path")?),
            "--stream" => args.stream = true,
            "-h" | "--help" => {
                println!("usage: themeboard [--config quality.yml] [--themes themes.json] [--stream] <text>");
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
            _ => args.text.push(arg),
        }
    }
    if args.text.is_empty() {
        bail!("missing input text (see --help)");
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,themeboard=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path).with_context(|| format!("loading config {path}"))?,
        None => EngineConfig::default(),
    };
    let catalog = match &args.themes {
        Some(path) => ThemeCatalog::from_json_file(path).with_context(|| format!("loading themes {path}"))?,
        None => ThemeCatalog::from_json(DEFAULT_CATALOG).context("parsing bundled themes")?,
    };
    tracing::info!("loaded {} themes", catalog.len());

    let engine = Engine::new(config, catalog).context("building engine")?;
    let text = args.text.join(" ");

    if args.stream {
        let mut rx = engine.process_streaming(text);
        while let Some(event) = rx.recv().await {
            println!("{}", serde_json::to_string(&event)?);
            if let StreamEvent::Error { message } = &event {
                tracing::error!("stream ended with error: {}", message);
            }
        }
    } else {
        let result = engine.process(&text).await;
        if result.partial {
            tracing::warn!("partial result for request {}", result.request_id);
        }
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
