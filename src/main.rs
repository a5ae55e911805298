//! Zentinel sed filter CLI entry point.
//!
//! Applies a route's response filter to a body read from stdin.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_filter_sed::{
    Filter, FilterAction, Message, MessageContext, RouteConfig, RouteTable, Sed, SedConfig,
};

#[derive(Parser, Debug)]
#[command(name = "zentinel-filter-sed")]
#[command(author, version, about = "Regex substitution filter for Zentinel response bodies")]
struct Args {
    /// Route configuration file path (YAML or JSON)
    #[arg(short, long, env = "SED_FILTER_CONFIG")]
    config: Option<PathBuf>,

    /// Route whose filter is applied (defaults to the only route)
    #[arg(short, long)]
    route: Option<String>,

    /// Ad-hoc pattern, used instead of a configuration file
    #[arg(short, long, requires = "replacement", conflicts_with = "config")]
    pattern: Option<String>,

    /// Ad-hoc replacement template
    #[arg(long, requires = "pattern")]
    replacement: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

fn print_example_config() {
    let example = r#"# Sed Filter Configuration Example
version: "1"

settings:
  # What to do when the response body cannot be read: forward | reject
  on_read_error: forward
  # Status returned with on_read_error: reject
  reject_status: 502

routes:
  # Rewrite internal host names in response bodies
  - id: "rewrite-hosts"
    description: "Replace internal host names"
    filter:
      name: sed
      args: ['internal\.local', 'example.com']

  # Wrap every number in brackets
  - id: "bracket-numbers"
    filter:
      name: sed
      args: ['(\d+)', '[$1]']
"#;
    println!("{}", example);
}

fn load_config(path: &Path) -> Result<RouteConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(config)
}

/// Resolve the filter to run from CLI arguments.
fn select_filter(args: &Args) -> Result<Arc<dyn Filter>> {
    if let (Some(pattern), Some(replacement)) = (&args.pattern, &args.replacement) {
        let sed = Sed::new(&SedConfig::new(pattern.as_str(), replacement.as_str()))
            .context("Invalid pattern")?;
        return Ok(Arc::new(sed));
    }

    let Some(config_path) = &args.config else {
        bail!("Either --config or --pattern/--replacement is required");
    };

    let table = RouteTable::new(load_config(config_path)?)
        .with_context(|| format!("Invalid configuration: {}", config_path.display()))?;

    let route = match &args.route {
        Some(route) => route.clone(),
        None => match table.route_ids().as_slice() {
            [only] => only.to_string(),
            ids => bail!("--route is required, available routes: {:?}", ids),
        },
    };

    table
        .filter(&route)
        .with_context(|| format!("Unknown route: {}", route))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if args.example_config {
        print_example_config();
        return Ok(());
    }

    let filter = select_filter(&args)?;

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .context("Failed to read stdin")?;

    let mut ctx = MessageContext::for_response(Message::with_body(input));

    if let FilterAction::Reject { status, reason } = filter.response(&mut ctx).await {
        bail!("Response rejected with status {}: {}", status, reason);
    }

    let output = ctx
        .response
        .take_body()
        .read_to_end()
        .await
        .context("Failed to read transformed body")?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await?;
    stdout.flush().await?;

    info!(bytes = output.len(), "Wrote transformed body");

    Ok(())
}
