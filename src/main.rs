/// Main entry point for the NIFTY options paper-trading engine.
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use nifty_oi_engine::config::{load_config, load_credentials, DetectedBroker};
use nifty_oi_engine::runner::{Runner, RunnerPaths};
use nifty_oi_engine::EngineError;

struct Args {
    broker: String,
    config_path: PathBuf,
    credentials_path: PathBuf,
}

fn parse_args() -> Result<Args, String> {
    let mut broker = "auto".to_string();
    let mut config_path = PathBuf::from("config/config.toml");
    let mut credentials_path = PathBuf::from("config/credentials.toml");

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--broker" => {
                broker = iter.next().ok_or("--broker requires a value")?;
            }
            "--config" => {
                config_path = iter.next().ok_or("--config requires a value")?.into();
            }
            "--credentials" => {
                credentials_path = iter.next().ok_or("--credentials requires a value")?.into();
            }
            "--help" | "-h" => {
                return Err(
                    "usage: nifty-oi-engine [--broker {zerodha,angelone,auto}] [--config <path>] [--credentials <path>]"
                        .to_string(),
                );
            }
            other => return Err(format!("unrecognized argument: {other}")),
        }
    }

    if !matches!(broker.as_str(), "zerodha" | "angelone" | "auto") {
        return Err(format!("--broker must be one of zerodha, angelone, auto (got {broker})"));
    }

    Ok(Args {
        broker,
        config_path,
        credentials_path,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter("nifty_oi_engine=info").init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };

    info!("🚀 Starting NIFTY OI-unwinding paper-trading engine...");

    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(EngineError::Shutdown(reason)) => {
            info!("👋 Shut down cleanly: {}", reason);
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            error!("💀 Startup aborted ({}): {}", e.error_code(), e);
            ExitCode::from(e.exit_code().unwrap_or(1) as u8)
        }
    }
}

async fn run(args: Args) -> Result<(), EngineError> {
    let config = load_config(&args.config_path)?;
    let credentials = load_credentials(&args.credentials_path)?;

    let forced_broker = match args.broker.as_str() {
        "zerodha" => Some(DetectedBroker::Zerodha),
        "angelone" => Some(DetectedBroker::AngelOne),
        _ => None,
    };

    let data_dir = PathBuf::from("data");
    let log_dir = PathBuf::from("logs");
    let paths = RunnerPaths {
        token_file: data_dir.join("tokens.json"),
        cache_file: data_dir.join("contracts.json"),
        state_dir: data_dir.join("state"),
        log_dir: log_dir.clone(),
        event_log_file: log_dir.join("events.log"),
    };

    let runner = Arc::new(Runner::bootstrap(config, &credentials, forced_broker, paths).await?);
    runner.run().await
}
