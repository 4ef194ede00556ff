use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use greenh2::config::Args;
use greenh2::server::{self, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = args.validate() {
        error!("Invalid configuration: {}", e);
        process::exit(1);
    }

    info!("greenh2 v{} starting", env!("CARGO_PKG_VERSION"));

    let state = match AppState::init(args).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {}", e);
            process::exit(1);
        }
    };

    let server_state = Arc::clone(&state);
    tokio::select! {
        result = server::run(server_state) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            if let Some(ref scheduler) = state.scheduler {
                scheduler.stop_all();
            }
        }
    }
}
