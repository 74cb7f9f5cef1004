use async_trait::async_trait;
use sqlx::types::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Order, OrderStatus, Transaction, TransactionType};
use crate::db::{ledger, orders};
use crate::error::AppError;
use crate::ports::OrderRepository;
use crate::validation::{round_amount, validate_non_negative_amount, validate_order_number};

#[derive(Clone)]
pub struct OrderService {
    pool: PgPool,
}

impl OrderService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_order(&self, number: &str, user_id: Uuid) -> Result<Order, AppError> {
        validate_order_number(number)?;
        orders::create_order(&self.pool, number, user_id).await
    }

    pub async fn get_order(&self, number: &str) -> Result<Order, AppError> {
        orders::get_order(&self.pool, number, false).await
    }

    pub async fn list_user_orders(&self, user_id: Uuid) -> Result<Vec<Order>, AppError> {
        orders::list_user_orders(&self.pool, user_id).await
    }

    /// Moves an order into a terminal status and credits its accrual.
    ///
    /// Runs as one database transaction. The order row is locked first, then
    /// the owner's balance row when there is something to credit. A terminal
    /// order aborts with `OrderAlreadyProcessed` and nothing is written.
    pub async fn finalize(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<BigDecimal>,
    ) -> Result<Order, AppError> {
        if !status.is_terminal() {
            return Err(AppError::Validation(format!(
                "can't finalize order {} with non-terminal status {}",
                number, status
            )));
        }
        if let Some(amount) = &accrual {
            validate_non_negative_amount(amount)?;
        }

        // Only processed orders carry an accrual, at stored precision.
        let accrual = match status {
            OrderStatus::Processed => accrual.as_ref().map(round_amount),
            _ => None,
        };
        let credit = accrual
            .as_ref()
            .filter(|amount| *amount > &BigDecimal::from(0))
            .cloned();

        let mut tx = self.pool.begin().await?;

        let order = orders::get_order(&mut *tx, number, true).await?;
        if order.status.is_terminal() {
            return Err(AppError::OrderAlreadyProcessed(number.to_string()));
        }

        if let Some(amount) = credit {
            ledger::get_balance(&mut *tx, order.user_id, true).await?;

            let entry = ledger::create_transaction(
                &mut *tx,
                &Transaction::new(
                    order.user_id,
                    order.number.clone(),
                    TransactionType::Accrual,
                    amount,
                ),
            )
            .await?;
            ledger::update_balance(&mut *tx, &entry).await?;
        }

        let order = orders::update_order(&mut *tx, number, Some(status), accrual.as_ref()).await?;

        tx.commit().await?;

        tracing::info!(
            order_number = %order.number,
            user_id = %order.user_id,
            status = %order.status,
            accrual = ?order.accrual,
            "Order finalized"
        );

        Ok(order)
    }

    pub async fn mark_processing(&self, number: &str) -> Result<Option<Order>, AppError> {
        orders::transition_order(&self.pool, number, OrderStatus::New, OrderStatus::Processing)
            .await
    }
}

#[async_trait]
impl OrderRepository for OrderService {
    async fn list_orders(&self, statuses: &[OrderStatus], limit: i64) -> Result<Vec<Order>, AppError> {
        orders::list_orders(&self.pool, statuses, limit).await
    }

    async fn finalize(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<BigDecimal>,
    ) -> Result<Order, AppError> {
        OrderService::finalize(self, number, status, accrual).await
    }

    async fn mark_processing(&self, number: &str) -> Result<Option<Order>, AppError> {
        OrderService::mark_processing(self, number).await
    }
}
