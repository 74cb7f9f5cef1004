use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::accrual::{AccrualError, AccrualStatus, OrderAccrual};
use crate::db::models::{Order, OrderStatus};
use crate::error::AppError;
use crate::ports::{AccrualSource, OrderRepository};
use crate::services::backoff::RateLimitGate;
use crate::services::shutdown::wait_for_shutdown;

/// What a worker did with one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finalized(OrderStatus),
    AlreadyProcessed,
    MarkedProcessing,
    /// Still pending remotely and already `processing` locally.
    Unchanged,
    RateLimited(Duration),
    /// Left untouched for a later poll cycle.
    Failed,
}

/// Resolves a single queued order against the accrual service.
#[derive(Clone)]
pub struct Worker {
    source: Arc<dyn AccrualSource>,
    repo: Arc<dyn OrderRepository>,
    gate: Arc<RateLimitGate>,
}

impl Worker {
    pub fn new(
        source: Arc<dyn AccrualSource>,
        repo: Arc<dyn OrderRepository>,
        gate: Arc<RateLimitGate>,
    ) -> Self {
        Self { source, repo, gate }
    }

    pub async fn process(&self, order: &Order) -> Outcome {
        match self.source.get_order_accrual(&order.number).await {
            Ok(accrual) => self.apply(order, accrual).await,
            Err(AccrualError::NoContent(_)) => {
                info!(order_number = %order.number, "No content for order, marking invalid");
                self.finalize(order, OrderStatus::Invalid, None).await
            }
            Err(AccrualError::RetryAfter(retry_after)) => {
                info!(
                    order_number = %order.number,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded, pausing workers"
                );
                self.gate.defer(retry_after);
                Outcome::RateLimited(retry_after)
            }
            Err(e) => {
                error!(order_number = %order.number, error = %e, "Unknown error from accrual service");
                Outcome::Failed
            }
        }
    }

    async fn apply(&self, order: &Order, accrual: OrderAccrual) -> Outcome {
        if accrual.order_number != order.number {
            warn!(
                order_number = %order.number,
                answered_for = %accrual.order_number,
                "Accrual service answered for a different order"
            );
            return Outcome::Failed;
        }

        match accrual.status {
            AccrualStatus::Processed | AccrualStatus::Invalid => {
                self.finalize(order, accrual.status.order_status(), accrual.accrual)
                    .await
            }
            AccrualStatus::Registered | AccrualStatus::Processing => {
                if order.status != OrderStatus::New {
                    return Outcome::Unchanged;
                }
                match self.repo.mark_processing(&order.number).await {
                    Ok(Some(_)) => {
                        debug!(order_number = %order.number, "Order is processing");
                        Outcome::MarkedProcessing
                    }
                    Ok(None) => Outcome::Unchanged,
                    Err(e) => {
                        error!(order_number = %order.number, error = %e, "Failed to mark order as processing");
                        Outcome::Failed
                    }
                }
            }
        }
    }

    async fn finalize(
        &self,
        order: &Order,
        status: OrderStatus,
        accrual: Option<sqlx::types::BigDecimal>,
    ) -> Outcome {
        match self.repo.finalize(&order.number, status, accrual).await {
            Ok(_) => Outcome::Finalized(status),
            Err(AppError::OrderAlreadyProcessed(_)) => {
                debug!(order_number = %order.number, "Order already processed, skipping");
                Outcome::AlreadyProcessed
            }
            Err(e) => {
                error!(
                    order_number = %order.number,
                    status = %status,
                    error = %e,
                    "Failed to finalize order"
                );
                Outcome::Failed
            }
        }
    }
}

/// Fixed-size pool of workers draining the shared order queue.
pub struct Consumer {
    workers: usize,
    worker: Worker,
}

impl Consumer {
    pub fn new(workers: usize, worker: Worker) -> Self {
        Self { workers, worker }
    }

    /// Spawns the workers; the returned handle completes when all have stopped.
    pub fn spawn(self, queue: mpsc::Receiver<Order>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let queue = Arc::new(Mutex::new(queue));

        let handles: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    self.worker.clone(),
                    queue.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        tokio::spawn(async move {
            for result in join_all(handles).await {
                if let Err(e) = result {
                    error!(error = %e, "Accrual worker panicked");
                }
            }
            debug!("Consumer stopped");
        })
    }
}

async fn run_worker(
    id: usize,
    worker: Worker,
    queue: Arc<Mutex<mpsc::Receiver<Order>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if !worker.gate.wait(&mut shutdown).await {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            order = async { queue.lock().await.recv().await } => order,
        };

        let Some(order) = next else {
            debug!(worker = id, "Order queue closed");
            break;
        };

        // Another worker may have hit the rate limit while this one was idle.
        if !worker.gate.wait(&mut shutdown).await {
            break;
        }

        debug!(worker = id, order_number = %order.number, "Processing order");
        let outcome = worker.process(&order).await;
        debug!(worker = id, order_number = %order.number, outcome = ?outcome, "Order processed");
    }

    debug!(worker = id, "Worker stopped");
}
