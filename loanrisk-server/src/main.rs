use std::sync::Arc;

use clap::Parser;
use loanrisk_core::{create_model, EventLog, LoanRiskConfig, RiskModel};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use loanrisk_server::http::{start_http_server, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "loanrisk.toml")]
    config: String,

    /// Load the model, report its status and exit.
    #[arg(long)]
    check_model: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match LoanRiskConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins; the configured level is the fallback
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let model: Option<Arc<dyn RiskModel>> = match create_model(&config.model) {
        Ok(m) => {
            tracing::info!(
                backend = m.name(),
                path = %config.model.resolved_path().display(),
                "Model loaded"
            );
            Some(Arc::from(m))
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                backend = %config.model.backend,
                "Model failed to load; /predict will answer 500 until restart"
            );
            None
        }
    };

    if args.check_model {
        if model.is_some() {
            println!("✅ Model loaded ({})", config.model.backend);
            return Ok(());
        }
        println!("❌ Model not loaded ({})", config.model.resolved_path().display());
        std::process::exit(1);
    }

    let event_log = Arc::new(EventLog::from_config(&config.event_log));
    tracing::info!(path = %event_log.path().display(), "Event log ready");

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState {
        config,
        model,
        event_log,
    });
    start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
