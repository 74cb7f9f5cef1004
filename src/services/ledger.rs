use sqlx::types::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::ledger;
use crate::db::models::{Balance, Transaction, TransactionType};
use crate::error::AppError;
use crate::validation::{round_amount, validate_luhn, validate_positive_amount};

#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_balance(&self, user_id: Uuid) -> Result<Balance, AppError> {
        ledger::get_balance(&self.pool, user_id, false).await
    }

    pub async fn list_withdrawals(&self, user_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        ledger::list_transactions(&self.pool, user_id, &[TransactionType::Withdrawal]).await
    }

    /// Debits `amount` from the user's balance against `order_number`.
    ///
    /// Insufficient funds are `InsufficientBalance` and leave no ledger entry.
    /// The balance table's `current >= 0` check backs the in-transaction comparison.
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: BigDecimal,
    ) -> Result<Balance, AppError> {
        validate_luhn(order_number)?;
        let amount = round_amount(&amount);
        validate_positive_amount(&amount)?;

        let mut tx = self.pool.begin().await?;

        let balance = ledger::get_balance(&mut *tx, user_id, true).await?;
        if balance.current < amount {
            tracing::info!(
                user_id = %user_id,
                order_number = %order_number,
                requested = %amount,
                current = %balance.current,
                "Withdrawal rejected, insufficient balance"
            );
            return Err(AppError::InsufficientBalance);
        }

        let entry = ledger::create_transaction(
            &mut *tx,
            &Transaction::new(
                user_id,
                order_number.to_string(),
                TransactionType::Withdrawal,
                amount,
            ),
        )
        .await?;
        let balance = ledger::update_balance(&mut *tx, &entry).await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            order_number = %order_number,
            amount = %entry.amount,
            "Withdrawal applied"
        );

        Ok(balance)
    }
}
