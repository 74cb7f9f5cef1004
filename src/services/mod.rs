pub mod backoff;
pub mod consumer;
pub mod ledger;
pub mod order;
pub mod processor;
pub mod producer;
pub mod shutdown;

pub use backoff::RateLimitGate;
pub use consumer::{Consumer, Outcome, Worker};
pub use ledger::LedgerService;
pub use order::OrderService;
pub use processor::{OrderProcessor, PipelineHandle};
pub use producer::Producer;
