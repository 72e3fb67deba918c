//! cloud-usage - fetch cloud billing and usage data into a search index

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cloud_usage::{Config, Pipeline};

/// Fetch cloud billing & usage data
#[derive(Parser, Debug)]
#[command(name = "cloud-usage")]
#[command(author, version, about = "Fetch cloud billing & usage data")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,

    /// Delete and recreate the output index before ingesting
    #[arg(short, long)]
    reset: bool,
}

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{level},hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,rustls=warn"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(
                path = %args.config.display(),
                error = %e,
                "Could not load configuration"
            );
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match Pipeline::connect(config, args.reset).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Could not prepare output store");
            return ExitCode::FAILURE;
        }
    };

    match pipeline.run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            ExitCode::FAILURE
        }
    }
}
