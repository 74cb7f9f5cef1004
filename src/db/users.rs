use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::ledger;
use crate::db::models::User;
use crate::error::{is_unique_violation, AppError};

/// Creates a user together with its zero balance in one transaction.
pub async fn create_user(pool: &PgPool, username: &str) -> Result<User, AppError> {
    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, username, created_at)
        VALUES ($1, $2, $3)
        RETURNING id, username, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(username)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Validation(format!("username {} is already taken", username))
        } else {
            AppError::Database(e)
        }
    })?;

    ledger::create_balance(&mut *tx, user.id).await?;

    tx.commit().await?;
    Ok(user)
}
