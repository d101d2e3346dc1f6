//! Command-line entry point: dial a store, run the conformance suite and
//! print the report.
//!
//! # Exit Codes
//!
//! - 0: every step passed
//! - 1: at least one step failed
//! - 2: configuration or connection error

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use storecheck::{Connection, ConnectionConfig, Report, Runner, requirements};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "storecheck")]
#[command(version, about = "Conformance test harness for remote entity stores")]
struct Args {
    /// Store endpoint, `host:port`
    endpoint: Option<String>,

    /// Access token for the vendor/app pair
    #[arg(long, env = "STORECHECK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, default_value = "storecheck")]
    vendor: String,

    #[arg(long, default_value = "conformance")]
    app: String,

    /// Dial plain TCP instead of TLS
    #[arg(long)]
    insecure: bool,

    /// Run only the named requirement (repeatable)
    #[arg(long = "only", value_name = "NAME")]
    only: Vec<String>,

    /// List the requirements in execution order and exit
    #[arg(long)]
    list: bool,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    request_timeout: u64,

    /// Idle timeout in seconds
    #[arg(long, default_value_t = 120)]
    idle_timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    if args.list {
        for requirement in requirements::all() {
            println!("{}", requirement.name());
        }
        return ExitCode::SUCCESS;
    }

    match run(args).await {
        Ok(report) if report.passed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(err) => {
            error!("{:#}", err);
            eprintln!("storecheck: {:#}", err);
            ExitCode::from(2)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn config_from(args: &Args) -> Result<ConnectionConfig> {
    let Some(endpoint) = args.endpoint.as_deref() else {
        bail!("missing store endpoint (host:port)");
    };
    let Some(token) = args.token.as_deref() else {
        bail!("missing access token (--token or STORECHECK_TOKEN)");
    };

    let config = ConnectionConfig::from_endpoint(endpoint)
        .map_err(anyhow::Error::msg)?
        .vendor(&args.vendor)
        .app(&args.app)
        .access_token(token)
        .insecure(args.insecure)
        .connect_timeout(Duration::from_secs(args.connect_timeout))
        .request_timeout(Duration::from_secs(args.request_timeout))
        .idle_timeout(Duration::from_secs(args.idle_timeout));
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

async fn run(args: Args) -> Result<Report> {
    let config = config_from(&args)?;
    let connection = Connection::dial(config)
        .await
        .context("failed to connect to the store")?;

    let runner = Runner::new(connection.clone(), requirements::all()).only(args.only.clone());
    let unknown = runner.unknown_filters();
    if !unknown.is_empty() {
        if let Err(err) = connection.close().await {
            warn!("closing connection: {}", err);
        }
        bail!("unknown requirement(s): {}", unknown.join(", "));
    }

    let Some(report) = runner.run_until(shutdown_signal()).await else {
        bail!("interrupted");
    };

    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print!("{}", report.render_text()),
    }
    info!(total = report.total, failed = report.failed, "run complete");
    Ok(report)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "unable to install ctrl+c handler");
        std::future::pending::<()>().await;
    }
}
