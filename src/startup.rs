use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub migrations: bool,
    pub accrual: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// The accrual system is allowed to be down at startup; the pipeline
    /// keeps retrying every poll cycle.
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.migrations
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Migrations Applied:    {}", status(self.migrations));
        println!("Accrual System:        {}", status(self.accrual));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        migrations: true,
        accrual: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.migrations = false;
        report.errors.push(format!("Database: {}", e));
    } else if let Err(e) = validate_migrations(pool).await {
        report.migrations = false;
        report.errors.push(format!("Migrations: {:#}", e));
    }

    if let Err(e) = validate_accrual(&config.accrual_address).await {
        report.accrual = false;
        report.errors.push(format!("Accrual: {:#}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    config.validate()
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;
    Ok(())
}

async fn validate_migrations(pool: &PgPool) -> Result<()> {
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

/// Any HTTP answer counts as reachable; only transport failures are reported.
async fn validate_accrual(address: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    client
        .get(address)
        .send()
        .await
        .context("Failed to connect to accrual system")?;

    Ok(())
}
