use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpesa_settlement::adapters::{InMemoryAccountRepository, InMemoryTransactionRepository};
use mpesa_settlement::cli::{self, Cli, Commands};
use mpesa_settlement::config::Config;
use mpesa_settlement::mpesa::{DarajaClient, PaymentGateway};
use mpesa_settlement::services::{Ledger, Reconciler, SettlementService};
use mpesa_settlement::{create_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(environment = %config.environment, "starting settlement service");

    if config.callback_gate.secret.is_none() {
        tracing::error!("MPESA_CALLBACK_SECRET is not set; every payment callback will be refused");
    }

    let gateway: Arc<dyn PaymentGateway> = Arc::new(DarajaClient::new(config.gateway.clone())?);
    tracing::info!("M-Pesa client initialized with URL: {}", config.gateway.base_url);

    let ledger = Arc::new(Ledger::new(
        Arc::new(InMemoryAccountRepository::new()),
        Arc::new(InMemoryTransactionRepository::new()),
        config.account_currency.clone(),
    ));
    let settlement = Arc::new(SettlementService::new(Arc::clone(&ledger), Arc::clone(&gateway)));

    let _reconciler = Reconciler::new(Arc::clone(&ledger), config.reservation_stale_after)
        .spawn(config.reconcile_interval);

    let app = create_app(
        AppState { settlement, gateway },
        config.callback_gate.clone(),
        config.request_log,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
