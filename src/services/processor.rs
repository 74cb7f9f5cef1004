use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::accrual::AccrualClient;
use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::ports::{AccrualSource, OrderRepository};
use crate::services::backoff::RateLimitGate;
use crate::services::consumer::{Consumer, Worker};
use crate::services::order::OrderService;
use crate::services::producer::Producer;

/// Order-accrual pipeline: one producer, a fixed pool of workers, one queue.
pub struct OrderProcessor {
    config: PipelineConfig,
    source: Arc<dyn AccrualSource>,
    repo: Arc<dyn OrderRepository>,
}

/// Completion signal of a started pipeline.
pub struct PipelineHandle {
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Resolves once the producer and every worker have stopped.
    pub async fn stopped(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Order processor supervisor failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl OrderProcessor {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn AccrualSource>,
        repo: Arc<dyn OrderRepository>,
    ) -> Self {
        Self {
            config,
            source,
            repo,
        }
    }

    /// Builds the pipeline over Postgres, refusing to if the database is unreachable.
    pub async fn connect(
        config: PipelineConfig,
        pool: PgPool,
        client: AccrualClient,
    ) -> Result<Self, AppError> {
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self::new(
            config,
            Arc::new(client),
            Arc::new(OrderService::new(pool)),
        ))
    }

    /// Spawns producer and workers. They run until `shutdown` flips to `true`
    /// (or its sender is dropped).
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> PipelineHandle {
        let (tx, rx) = mpsc::channel(self.config.workers.max(1));
        let gate = Arc::new(RateLimitGate::new());

        let producer = Producer::new(
            self.repo.clone(),
            self.config.poll_interval,
            self.config.batch_size,
        )
        .spawn(tx, shutdown.clone());

        let worker = Worker::new(self.source.clone(), self.repo.clone(), gate);
        let consumer = Consumer::new(self.config.workers, worker).spawn(rx, shutdown);

        info!(
            workers = self.config.workers,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Order processor started"
        );

        let task = tokio::spawn(async move {
            if let Err(e) = producer.await {
                error!(error = %e, "Order producer panicked");
            }
            if let Err(e) = consumer.await {
                error!(error = %e, "Order consumer panicked");
            }
            info!("Order processor stopped");
        });

        PipelineHandle { task }
    }
}
