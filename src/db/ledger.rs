//! Ledger store: balances and the append-only transaction log.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::models::{Balance, Transaction, TransactionType};
use crate::error::{is_check_violation, is_foreign_key_violation, is_unique_violation, AppError};

pub async fn create_balance<'e, E>(executor: E, user_id: Uuid) -> Result<Balance, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Balance>(
        r#"
        INSERT INTO balances (id, user_id, current, withdrawn)
        VALUES ($1, $2, 0, 0)
        RETURNING id, user_id, current, withdrawn
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .fetch_one(executor)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Validation(format!("balance for user {} already exists", user_id))
        } else if is_foreign_key_violation(&e) {
            AppError::UserNotFound(user_id.to_string())
        } else {
            AppError::Database(e)
        }
    })
}

/// Reads a user's balance; `lock` takes the row `FOR UPDATE`.
pub async fn get_balance<'e, E>(executor: E, user_id: Uuid, lock: bool) -> Result<Balance, AppError>
where
    E: PgExecutor<'e>,
{
    let query = if lock {
        "SELECT id, user_id, current, withdrawn FROM balances WHERE user_id = $1 FOR UPDATE"
    } else {
        "SELECT id, user_id, current, withdrawn FROM balances WHERE user_id = $1"
    };

    sqlx::query_as::<_, Balance>(query)
        .bind(user_id)
        .fetch_one(executor)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::UserNotFound(user_id.to_string()),
            other => AppError::Database(other),
        })
}

/// Appends a ledger entry. A second entry for the same `(type, order_number)`
/// is rejected by the table's unique constraint as `TransactionExists`.
pub async fn create_transaction<'e, E>(executor: E, tx: &Transaction) -> Result<Transaction, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (id, processed_at, user_id, order_number, type, amount)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, processed_at, user_id, order_number, type, amount
        "#,
    )
    .bind(tx.id)
    .bind(tx.processed_at)
    .bind(tx.user_id)
    .bind(&tx.order_number)
    .bind(tx.kind.as_str())
    .bind(&tx.amount)
    .fetch_one(executor)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::TransactionExists(tx.order_number.clone())
        } else if is_foreign_key_violation(&e) {
            AppError::UserNotFound(tx.user_id.to_string())
        } else {
            AppError::Database(e)
        }
    })
}

/// Applies a ledger entry to the owner's balance. A withdrawal that would take
/// `current` below zero trips the `current >= 0` check and surfaces as
/// `InsufficientBalance`.
pub async fn update_balance<'e, E>(executor: E, tx: &Transaction) -> Result<Balance, AppError>
where
    E: PgExecutor<'e>,
{
    let query = match tx.kind {
        TransactionType::Accrual => {
            r#"
            UPDATE balances
            SET current = current + $2
            WHERE user_id = $1
            RETURNING id, user_id, current, withdrawn
            "#
        }
        TransactionType::Withdrawal => {
            r#"
            UPDATE balances
            SET current = current - $2, withdrawn = withdrawn + $2
            WHERE user_id = $1
            RETURNING id, user_id, current, withdrawn
            "#
        }
    };

    sqlx::query_as::<_, Balance>(query)
        .bind(tx.user_id)
        .bind(&tx.amount)
        .fetch_one(executor)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::UserNotFound(tx.user_id.to_string()),
            e if is_check_violation(&e) => AppError::InsufficientBalance,
            other => AppError::Database(other),
        })
}

/// Lists a user's ledger entries of the given types, newest first.
pub async fn list_transactions<'e, E>(
    executor: E,
    user_id: Uuid,
    types: &[TransactionType],
) -> Result<Vec<Transaction>, AppError>
where
    E: PgExecutor<'e>,
{
    let types: Vec<&str> = types.iter().map(TransactionType::as_str).collect();

    let rows = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT id, processed_at, user_id, order_number, type, amount
        FROM transactions
        WHERE user_id = $1 AND type = ANY($2)
        ORDER BY processed_at DESC
        "#,
    )
    .bind(user_id)
    .bind(types)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

pub async fn count_transactions<'e, E>(
    executor: E,
    order_number: &str,
    kind: TransactionType,
) -> Result<i64, AppError>
where
    E: PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM transactions WHERE order_number = $1 AND type = $2",
    )
    .bind(order_number)
    .bind(kind.as_str())
    .fetch_one(executor)
    .await?;

    Ok(count)
}
