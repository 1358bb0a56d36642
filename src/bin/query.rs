//! One-shot ranked search over a JSON corpus.
//!
//! ```text
//! ragchat-query <corpus.json> <query...> [--config <path>] [--max <n>] [--source <name>]...
//! ```
//!
//! Prints the enhanced search response as JSON on stdout. All tracing
//! output goes to stderr.

use std::path::PathBuf;

use anyhow::{Context, bail};
use ragchat::corpus::load_corpus;
use ragchat::{AppConfig, SearchServices};
use ragchat_search::EnhancedSearchRequest;

struct Args {
    corpus: PathBuf,
    query: String,
    config: Option<PathBuf>,
    max_results: Option<usize>,
    sources: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut max_results = None;
    let mut sources = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--max" => {
                let raw = args.next().context("--max needs a number")?;
                max_results = Some(raw.parse::<usize>().with_context(|| format!("invalid --max {raw}"))?);
            }
            "--source" => sources.push(args.next().context("--source needs a name")?),
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    let Some(corpus) = positional.next().map(PathBuf::from) else {
        bail!("usage: ragchat-query <corpus.json> <query...> [--config <path>] [--max <n>] [--source <name>]");
    };
    let words: Vec<String> = positional.collect();
    if words.is_empty() {
        bail!("missing query");
    }
    Ok(Args {
        corpus,
        query: words.join(" "),
        config,
        max_results,
        sources,
    })
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    match explicit {
        Some(path) => AppConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => {
            let path = AppConfig::default_config_path();
            if path.exists() {
                AppConfig::from_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))
            } else {
                Ok(AppConfig::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = load_config(args.config)?;
    let backends = load_corpus(&args.corpus)
        .with_context(|| format!("loading corpus from {}", args.corpus.display()))?;

    let services = SearchServices::start(&config, backends).map_err(|e| {
        tracing::error!(error = %e, "search services failed to start");
        anyhow::anyhow!("startup failed: {e}")
    })?;

    let request = EnhancedSearchRequest {
        query: args.query,
        sources: args.sources,
        max_results: args.max_results,
        ..Default::default()
    };
    let response = services.search(&request).await;
    services.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
