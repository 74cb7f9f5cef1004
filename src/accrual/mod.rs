pub mod client;

pub use client::{AccrualClient, AccrualError, AccrualStatus, OrderAccrual};
