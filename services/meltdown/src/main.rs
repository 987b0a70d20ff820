use anyhow::Context;
use clap::Parser;
use meltdown_execution::{run_deadlines, RngCrashSource};
use meltdown_service::{router, AppState, ServiceConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 9124)]
    port: u16,

    /// JSON file holding participant balances (created on first write).
    #[arg(long, default_value = "data/users.json")]
    data_path: PathBuf,

    /// Seed for reproducible crash draws (entropy when omitted).
    #[arg(long)]
    crash_seed: Option<u64>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = ServiceConfig::from_env().context("invalid meltdown configuration")?;
    let crash = match args.crash_seed {
        Some(seed) => {
            info!(seed, "using seeded crash draws");
            RngCrashSource::seeded(seed)
        }
        None => RngCrashSource::from_entropy(),
    };

    let (state, deadlines) = AppState::build(&config, &args.data_path, crash).await?;
    tokio::spawn(run_deadlines(state.controller.clone(), deadlines));

    let app = router(state);
    let addr = SocketAddr::new(args.host, args.port);
    info!(
        %addr,
        data_path = %args.data_path.display(),
        registration_ms = config.phases.registration_ms,
        investment_ms = config.phases.investment_ms,
        round_ms = config.phases.round_ms,
        admin_token = config.admin_token.is_some(),
        "meltdown service listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
