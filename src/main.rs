//! DIFFER: Autonomous digit-differ tick trading engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects to the venue, and runs the engine until a risk stop, a fatal
//! session error, or Ctrl+C. The process exit code reflects how the
//! session ended.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, Instrument};

use differ::config::AppConfig;
use differ::dashboard::{self, routes::DashboardState};
use differ::engine::Engine;
use differ::notify::{ChannelNotifier, FanoutNotifier, LogNotifier};
use differ::venue::ws::WsConnector;

const BANNER: &str = r#"
 ____  ___ _____ _____ _____ ____
|  _ \|_ _|  ___|  ___| ____|  _ \
| | | || || |_  | |_  |  _| | |_) |
| |_| || ||  _| |  _| | |___|  _ <
|____/|___|_|   |_|   |_____|_| \_\

  Digit-differ tick trading engine
  v0.1.0
"#;

#[derive(Parser)]
#[command(name = "differ")]
#[command(about = "Autonomous digit-differ tick trading engine")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    init_logging(cli.log_json);

    let cfg = AppConfig::load(&cli.config)?;
    let token = cfg
        .api_token()
        .with_context(|| format!("API token not available from ${}", cfg.venue.token_env))?;

    println!("{BANNER}");
    let session_id = uuid::Uuid::new_v4();
    info!(
        %session_id,
        config = %cli.config,
        instruments = ?cfg.instrument_ids(),
        base_stake = %cfg.stake.base,
        stop_loss = %cfg.risk.stop_loss,
        take_profit = %cfg.risk.take_profit,
        "DIFFER starting up"
    );

    // -- Initialise components -------------------------------------------

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let connector = WsConnector::new(cfg.venue_url(), events_tx);

    let mut notifier = FanoutNotifier::new().with(LogNotifier);
    let dashboard_feed = if cfg.dashboard.enabled {
        let (sink, rx) = ChannelNotifier::channel();
        notifier = notifier.with(sink);
        Some((cfg.dashboard.port, rx))
    } else {
        None
    };

    let engine = Engine::new(cfg, token, Box::new(connector), Box::new(notifier));

    if let Some((port, rx)) = dashboard_feed {
        let state = Arc::new(DashboardState::new(engine.status()));
        dashboard::spawn_dashboard(state, port, rx);
    }

    // -- Run ---------------------------------------------------------------

    info!("Entering engine loop. Press Ctrl+C to stop.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let report = engine
        .run(events_rx, shutdown)
        .instrument(info_span!("session", %session_id))
        .await;

    println!("{report}");
    info!(exit = %report.exit, code = report.exit.exit_code(), "DIFFER shut down.");
    std::process::exit(report.exit.exit_code());
}

/// Initialise the `tracing` subscriber.
fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("differ=info"));

    let json_logging = json || std::env::var("DIFFER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
