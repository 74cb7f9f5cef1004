//! Traits at the seams of the order-accrual pipeline.
//! The pipeline only sees these; Postgres and HTTP implementations live elsewhere.

use async_trait::async_trait;
use sqlx::types::BigDecimal;

use crate::accrual::{AccrualClient, AccrualError, OrderAccrual};
use crate::db::models::{Order, OrderStatus};
use crate::error::AppError;

/// Where accrual outcomes come from.
#[async_trait]
pub trait AccrualSource: Send + Sync {
    async fn get_order_accrual(&self, number: &str) -> Result<OrderAccrual, AccrualError>;
}

/// Order operations the pipeline drives.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn list_orders(&self, statuses: &[OrderStatus], limit: i64) -> Result<Vec<Order>, AppError>;

    /// Applies a terminal status and, for a positive accrual, credits the
    /// owner's balance. Either everything is applied or nothing is.
    /// An order that is already terminal yields `OrderAlreadyProcessed`.
    async fn finalize(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<BigDecimal>,
    ) -> Result<Order, AppError>;

    /// Moves a `new` order to `processing`; `None` if it was in any other state.
    async fn mark_processing(&self, number: &str) -> Result<Option<Order>, AppError>;
}

#[async_trait]
impl AccrualSource for AccrualClient {
    async fn get_order_accrual(&self, number: &str) -> Result<OrderAccrual, AccrualError> {
        AccrualClient::get_order_accrual(self, number).await
    }
}
