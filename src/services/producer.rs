use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::db::models::{Order, OrderStatus};
use crate::ports::OrderRepository;
use crate::services::shutdown::wait_for_shutdown;

/// Polls storage for unresolved orders and feeds them to the workers.
///
/// Holds no state between ticks: every tick reads `new` and `processing`
/// orders fresh, so an order left untouched is simply found again.
pub struct Producer {
    repo: Arc<dyn OrderRepository>,
    interval: Duration,
    batch_size: i64,
}

impl Producer {
    pub fn new(repo: Arc<dyn OrderRepository>, interval: Duration, batch_size: i64) -> Self {
        Self {
            repo,
            interval,
            batch_size,
        }
    }

    pub fn spawn(self, out: mpsc::Sender<Order>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(out, shutdown))
    }

    pub async fn run(self, out: mpsc::Sender<Order>, mut shutdown: watch::Receiver<bool>) {
        debug!(
            interval_secs = self.interval.as_secs_f64(),
            batch_size = self.batch_size,
            "Starting producer"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    debug!("Producer stopped by shutdown");
                    return;
                }
                _ = ticker.tick() => {}
            }

            debug!("Producer tick: fetching orders");

            let orders = match self
                .repo
                .list_orders(&OrderStatus::PENDING, self.batch_size)
                .await
            {
                Ok(orders) => orders,
                Err(e) => {
                    error!(error = %e, "Failed to list orders");
                    continue;
                }
            };

            for order in orders {
                let number = order.number.clone();
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => {
                        debug!("Producer stopped by shutdown while sending orders");
                        return;
                    }
                    sent = out.send(order) => {
                        if sent.is_err() {
                            debug!("Order queue closed, producer stopping");
                            return;
                        }
                        debug!(order_number = %number, "Order queued");
                    }
                }
            }
        }
    }
}
