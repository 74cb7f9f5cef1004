use clap::{Parser, Subcommand};
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::services::LedgerService;

#[derive(Parser)]
#[command(name = "gophermart-accrual")]
#[command(about = "Gophermart loyalty backend - order accrual processor and ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the accrual pipeline and the operational HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Show a user's balance
    Balance {
        #[arg(value_name = "USER_ID")]
        user_id: Uuid,
    },

    /// Withdraw points from a user's balance against an order number
    Withdraw {
        #[arg(value_name = "USER_ID")]
        user_id: Uuid,
        #[arg(value_name = "ORDER")]
        order: String,
        #[arg(value_name = "AMOUNT")]
        amount: BigDecimal,
    },

    /// List a user's withdrawals, newest first
    Withdrawals {
        #[arg(value_name = "USER_ID")]
        user_id: Uuid,
    },

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_db_migrate(pool: &PgPool) -> anyhow::Result<()> {
    tracing::info!("Running database migrations...");
    crate::db::run_migrations(pool).await?;
    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_balance(pool: &PgPool, user_id: Uuid) -> anyhow::Result<()> {
    let balance = LedgerService::new(pool.clone()).get_balance(user_id).await?;

    println!("Balance of {}:", user_id);
    println!("  Current:   {}", balance.current);
    println!("  Withdrawn: {}", balance.withdrawn);
    Ok(())
}

pub async fn handle_withdraw(
    pool: &PgPool,
    user_id: Uuid,
    order: &str,
    amount: BigDecimal,
) -> anyhow::Result<()> {
    let balance = LedgerService::new(pool.clone())
        .withdraw(user_id, order, amount.clone())
        .await?;

    println!("✓ Withdrew {} against order {}", amount, order);
    println!("  Current:   {}", balance.current);
    println!("  Withdrawn: {}", balance.withdrawn);
    Ok(())
}

pub async fn handle_withdrawals(pool: &PgPool, user_id: Uuid) -> anyhow::Result<()> {
    let withdrawals = LedgerService::new(pool.clone())
        .list_withdrawals(user_id)
        .await?;

    if withdrawals.is_empty() {
        println!("No withdrawals found");
        return Ok(());
    }

    println!("{:<24} {:<14} {:<20}", "Order", "Sum", "Processed at");
    println!("{}", "-".repeat(60));
    for w in withdrawals {
        println!(
            "{:<24} {:<14} {:<20}",
            w.order_number,
            w.amount.to_string(),
            w.processed_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Accrual Address: {}", config.accrual_address);
    println!("  Workers: {}", config.accrual_workers);
    println!("  Poll Interval: {}s", config.accrual_poll_interval_secs);
    println!("  Batch Size: {}", config.accrual_batch_size);

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
