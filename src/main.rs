use clap::Parser;
use gophermart_accrual::accrual::AccrualClient;
use gophermart_accrual::cli::{self, Cli, Commands, DbCommands};
use gophermart_accrual::config::{Config, LogFormat};
use gophermart_accrual::services::OrderProcessor;
use gophermart_accrual::{create_app, db, run_server, startup, AppState};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command {
        Some(Commands::Config) => cli::handle_config_validate(&config),
        Some(Commands::Db(DbCommands::Migrate)) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_db_migrate(&pool).await
        }
        Some(Commands::Balance { user_id }) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_balance(&pool, user_id).await
        }
        Some(Commands::Withdraw {
            user_id,
            order,
            amount,
        }) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_withdraw(&pool, user_id, &order, amount).await
        }
        Some(Commands::Withdrawals { user_id }) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_withdrawals(&pool, user_id).await
        }
        Some(Commands::Serve) | None => serve(config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let report = startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.is_valid() {
        anyhow::bail!("Startup validation failed");
    }

    let client = AccrualClient::with_timeout(config.accrual_address.clone(), config.accrual_timeout());
    tracing::info!("Accrual client initialized with URL: {}", client.base_url());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = OrderProcessor::connect(config.pipeline(), pool.clone(), client).await?;
    let pipeline = processor.start(shutdown_rx.clone());

    let app = create_app(AppState::new(pool));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let mut server = tokio::spawn(run_server(addr, app, shutdown_rx));

    let early_exit = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut server => Some(result),
    };
    if early_exit.is_some() {
        tracing::error!("HTTP server stopped before shutdown was requested");
    }
    let _ = shutdown_tx.send(true);

    pipeline.stopped().await;
    match early_exit {
        Some(result) => result??,
        None => server.await??,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
