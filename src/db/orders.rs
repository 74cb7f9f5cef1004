//! Order store queries.
//!
//! Every function takes any Postgres executor so the same query runs against the
//! pool or inside an open transaction (`&mut *tx`).

use sqlx::types::BigDecimal;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::models::{Order, OrderStatus};
use crate::error::AppError;

fn not_found(number: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |e| match e {
        sqlx::Error::RowNotFound => AppError::OrderNotFound(number.to_string()),
        other => AppError::Database(other),
    }
}

/// Registers an order in status `new`.
///
/// Registering a number the same user already owns returns the stored order;
/// a number owned by someone else is `OrderNumberTaken`.
pub async fn create_order<'e, E>(executor: E, number: &str, user_id: Uuid) -> Result<Order, AppError>
where
    E: PgExecutor<'e>,
{
    let order = Order::new(number.to_string(), user_id);

    let stored = sqlx::query_as::<_, Order>(
        r#"
        WITH inserted AS (
            INSERT INTO orders (id, uploaded_at, modified_at, number, user_id, status, accrual)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (number) DO NOTHING
            RETURNING *
        )
        SELECT * FROM inserted
        UNION ALL
        SELECT * FROM orders WHERE number = $4 AND NOT EXISTS (SELECT 1 FROM inserted)
        "#,
    )
    .bind(order.id)
    .bind(order.uploaded_at)
    .bind(order.modified_at)
    .bind(&order.number)
    .bind(order.user_id)
    .bind(order.status.as_str())
    .bind(&order.accrual)
    .fetch_one(executor)
    .await
    .map_err(|e| {
        if crate::error::is_foreign_key_violation(&e) {
            AppError::UserNotFound(user_id.to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    if stored.user_id != user_id {
        return Err(AppError::OrderNumberTaken(number.to_string()));
    }

    Ok(stored)
}

pub async fn list_orders<'e, E>(
    executor: E,
    statuses: &[OrderStatus],
    limit: i64,
) -> Result<Vec<Order>, AppError>
where
    E: PgExecutor<'e>,
{
    let statuses: Vec<&str> = statuses.iter().map(OrderStatus::as_str).collect();

    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE status = ANY($1)
        ORDER BY uploaded_at ASC
        LIMIT $2
        "#,
    )
    .bind(statuses)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(orders)
}

pub async fn list_user_orders<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<Order>, AppError>
where
    E: PgExecutor<'e>,
{
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE user_id = $1 ORDER BY uploaded_at DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    Ok(orders)
}

/// Reads one order. With `lock` the row is held `FOR UPDATE` until the
/// surrounding transaction ends.
pub async fn get_order<'e, E>(executor: E, number: &str, lock: bool) -> Result<Order, AppError>
where
    E: PgExecutor<'e>,
{
    let query = if lock {
        "SELECT * FROM orders WHERE number = $1 FOR UPDATE"
    } else {
        "SELECT * FROM orders WHERE number = $1"
    };

    sqlx::query_as::<_, Order>(query)
        .bind(number)
        .fetch_one(executor)
        .await
        .map_err(not_found(number))
}

/// Sets whichever of `status` / `accrual` is given. `modified_at` only moves
/// when something actually changes.
pub async fn update_order<'e, E>(
    executor: E,
    number: &str,
    status: Option<OrderStatus>,
    accrual: Option<&BigDecimal>,
) -> Result<Order, AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = COALESCE($2::text, status),
            accrual = COALESCE($3::numeric, accrual),
            modified_at = CASE
                WHEN $2::text IS NULL AND $3::numeric IS NULL THEN modified_at
                ELSE NOW()
            END
        WHERE number = $1
        RETURNING *
        "#,
    )
    .bind(number)
    .bind(status.map(|s| s.as_str()))
    .bind(accrual)
    .fetch_one(executor)
    .await
    .map_err(not_found(number))
}

/// Moves an order from `from` to `to` only if it is still in `from`.
/// Returns `None` when the order was in any other state.
pub async fn transition_order<'e, E>(
    executor: E,
    number: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<Option<Order>, AppError>
where
    E: PgExecutor<'e>,
{
    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = $3, modified_at = NOW()
        WHERE number = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(number)
    .bind(from.as_str())
    .bind(to.as_str())
    .fetch_optional(executor)
    .await?;

    Ok(order)
}
