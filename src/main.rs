//! Netsieve - Entry point.
//!
//! Loads the configured filter lists and user rules, then answers requests
//! read from stdin, one per line:
//!
//! ```text
//! GET https://ads.example.com/banner.png https://news.example.com/ [main]
//! ```
//!
//! Each answer is printed as the decision followed by the substitute
//! response, if any.

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use http::Method;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use netsieve::blocklist::ConfigCatalog;
use netsieve::config::Config;
use netsieve::request::WebRequest;
use netsieve::rules::{JsonRuleRepository, MemoryRuleRepository, RuleRepository};
use netsieve::FilterEngine;

/// Parse a `METHOD URL PAGE_URL [main]` line.
fn parse_line(line: &str) -> Result<(WebRequest, String)> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(url), Some(page_url)) = (parts.next(), parts.next(), parts.next())
    else {
        bail!("expected `METHOD URL PAGE_URL [main]`");
    };
    let is_main_frame = match parts.next() {
        None => false,
        Some("main") => true,
        Some(other) => bail!("unexpected trailing token {other:?}"),
    };

    let mut request = WebRequest::get(url, is_main_frame);
    request.method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method {method:?}"))?;
    Ok((request, page_url.to_string()))
}

/// Answer requests from stdin until EOF.
async fn serve<R: RuleRepository>(engine: Arc<FilterEngine<ConfigCatalog, R>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (request, page_url) = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(err) => {
                eprintln!("error: {err}");
                continue;
            }
        };

        let evaluation = engine.evaluate(&request, &page_url).await;
        match evaluation.response {
            Some(response) => println!(
                "{} {} {} {} ({} bytes)",
                evaluation.decision.kind(),
                request.url,
                response.status,
                response.mime_type,
                response.body.len()
            ),
            None => println!("{} {} pass", evaluation.decision.kind(), request.url),
        }
    }
    Ok(())
}

async fn run_with<R: RuleRepository>(config: Config, repository: R) -> Result<()> {
    let engine = FilterEngine::new(&config, ConfigCatalog::new(&config.lists), repository)
        .context("Failed to create filter engine")?;
    let engine = Arc::new(engine);

    let result = engine.start().await.context("Failed to load filter lists")?;
    info!(
        from_cache = result.from_cache,
        rebuilt = result.rebuilt.len(),
        failed = result.failed_lists.len(),
        filters = engine.filter_count(),
        "engine ready"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down...");
        }
        result = serve(Arc::clone(&engine)) => result?,
    }

    engine
        .user_rules()
        .flush()
        .await
        .context("Failed to persist user rules")?;
    info!("Shutdown complete.");
    Ok(())
}

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("config.toml"));
    let config = Config::load(config_path.as_ref()).context("Failed to load configuration")?;

    // Initialize metrics (must be done early, before any metrics are recorded)
    netsieve::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    info!("Starting netsieve...");
    info!("Cache directory: {}", config.cache_dir().display());
    info!("Filter lists configured: {}", config.lists.len());

    match config.user_rules.path.clone() {
        Some(path) => {
            info!("User rules: {}", path.display());
            run_with(config, JsonRuleRepository::new(path)).await
        }
        None => {
            info!("User rules kept in memory only");
            run_with(config, MemoryRuleRepository::new()).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    run().await
}
