use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use std::time::Duration;
use thiserror::Error;

use crate::db::models::OrderStatus;

pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum AccrualError {
    #[error("no accrual registered for order {0}")]
    NoContent(String),
    #[error("rate limited, retry after {}s", .0.as_secs())]
    RetryAfter(Duration),
    #[error("unexpected response from accrual service: {0}")]
    Unknown(String),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),
}

impl AccrualError {
    /// Only transport faults and server errors count against the circuit breaker.
    fn trips_breaker(&self) -> bool {
        matches!(self, AccrualError::Request(_) | AccrualError::Unknown(_))
    }
}

/// Order status as reported by the accrual service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl AccrualStatus {
    /// Maps the remote status onto the local order lifecycle.
    pub fn order_status(&self) -> OrderStatus {
        match self {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Body of a `200` answer from `GET /api/orders/{number}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAccrual {
    #[serde(rename = "order")]
    pub order_number: String,
    #[serde(deserialize_with = "deserialize_status")]
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<BigDecimal>,
}

fn deserialize_status<'de, D>(deserializer: D) -> Result<AccrualStatus, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.to_ascii_uppercase().as_str() {
        "REGISTERED" => Ok(AccrualStatus::Registered),
        "PROCESSING" => Ok(AccrualStatus::Processing),
        "INVALID" => Ok(AccrualStatus::Invalid),
        "PROCESSED" => Ok(AccrualStatus::Processed),
        other => Err(serde::de::Error::custom(format!(
            "unknown accrual status: {}",
            other
        ))),
    }
}

/// HTTP client for the external accrual service.
#[derive(Clone)]
pub struct AccrualClient {
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl AccrualClient {
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Every call is bounded by `timeout`, independent of the caller's lifetime.
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, timeout, 5, 30)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs.saturating_mul(2)),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        AccrualClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            circuit_breaker,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    /// Asks the accrual service about one order.
    pub async fn get_order_accrual(&self, number: &str) -> Result<OrderAccrual, AccrualError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        let client = self.client.clone();
        let number = number.to_string();

        let result = self
            .circuit_breaker
            .call_with(AccrualError::trips_breaker, async move {
                let response = client.get(&url).send().await?;
                read_response(&number, response).await
            })
            .await;

        match result {
            Ok(accrual) => Ok(accrual),
            Err(FailsafeError::Rejected) => Err(AccrualError::CircuitOpen(
                "accrual service circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

async fn read_response(number: &str, response: Response) -> Result<OrderAccrual, AccrualError> {
    match response.status() {
        StatusCode::OK => {
            let accrual = response.json::<OrderAccrual>().await.map_err(|e| {
                tracing::warn!(order_number = %number, error = %e, "Failed to decode accrual response");
                AccrualError::Unknown(format!("invalid body for order {}: {}", number, e))
            })?;
            tracing::debug!(
                order_number = %accrual.order_number,
                status = ?accrual.status,
                accrual = ?accrual.accrual,
                "Accrual response"
            );
            Ok(accrual)
        }
        StatusCode::NO_CONTENT => Err(AccrualError::NoContent(number.to_string())),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            tracing::warn!(retry_after_secs = retry_after.as_secs(), "Accrual service throttled");
            Err(AccrualError::RetryAfter(retry_after))
        }
        status => {
            tracing::warn!(order_number = %number, status_code = status.as_u16(), "Failed to get order accrual");
            Err(AccrualError::Unknown(format!(
                "unknown status code {} for order {}",
                status, number
            )))
        }
    }
}

/// `Retry-After` is read as whole seconds; anything unparseable means 60s.
pub fn parse_retry_after(header: Option<&str>) -> Duration {
    header
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accrual_client_creation() {
        let client = AccrualClient::new("http://localhost:3000/".to_string());
        assert_eq!(client.base_url(), "http://localhost:3000");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn test_circuit_breaker_with_huge_reset_timeout() {
        let client = AccrualClient::with_circuit_breaker(
            "http://localhost:3000".to_string(),
            DEFAULT_TIMEOUT,
            5,
            u64::MAX,
        );
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("5")), Duration::from_secs(5));
        assert_eq!(parse_retry_after(Some(" 12 ")), Duration::from_secs(12));
        assert_eq!(parse_retry_after(Some("soon")), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(None), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn test_accrual_status_mapping() {
        assert_eq!(AccrualStatus::Registered.order_status(), OrderStatus::Processing);
        assert_eq!(AccrualStatus::Processing.order_status(), OrderStatus::Processing);
        assert_eq!(AccrualStatus::Invalid.order_status(), OrderStatus::Invalid);
        assert_eq!(AccrualStatus::Processed.order_status(), OrderStatus::Processed);
    }

    #[test]
    fn test_order_accrual_decodes_lowercase_status() {
        let body: OrderAccrual =
            serde_json::from_str(r#"{"order":"111","status":"processed","accrual":7.5}"#).unwrap();
        assert_eq!(body.status, AccrualStatus::Processed);
        assert_eq!(body.accrual, Some("7.5".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_get_order_accrual_processed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/orders/4242424242424242")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"order":"4242424242424242","status":"PROCESSED","accrual":100.50}"#)
            .create_async()
            .await;

        let client = AccrualClient::new(server.url());
        let accrual = client.get_order_accrual("4242424242424242").await.unwrap();

        assert_eq!(accrual.order_number, "4242424242424242");
        assert_eq!(accrual.status, AccrualStatus::Processed);
        assert_eq!(accrual.accrual, Some("100.50".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_get_order_accrual_invalid_without_amount() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/orders/79927398713")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"order":"79927398713","status":"INVALID"}"#)
            .create_async()
            .await;

        let client = AccrualClient::new(server.url());
        let accrual = client.get_order_accrual("79927398713").await.unwrap();

        assert_eq!(accrual.status, AccrualStatus::Invalid);
        assert!(accrual.accrual.is_none());
    }

    #[tokio::test]
    async fn test_get_order_accrual_no_content() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/orders/111")
            .with_status(204)
            .create_async()
            .await;

        let client = AccrualClient::new(server.url());
        let result = client.get_order_accrual("111").await;

        assert!(matches!(result, Err(AccrualError::NoContent(n)) if n == "111"));
    }

    #[tokio::test]
    async fn test_get_order_accrual_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/orders/111")
            .with_status(429)
            .with_header("Retry-After", "5")
            .create_async()
            .await;

        let client = AccrualClient::new(server.url());
        let result = client.get_order_accrual("111").await;

        assert!(matches!(result, Err(AccrualError::RetryAfter(d)) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_get_order_accrual_rate_limited_bad_header() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/orders/111")
            .with_status(429)
            .with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT")
            .create_async()
            .await;

        let client = AccrualClient::new(server.url());
        let result = client.get_order_accrual("111").await;

        assert!(matches!(result, Err(AccrualError::RetryAfter(d)) if d == DEFAULT_RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_get_order_accrual_server_error_is_unknown() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/orders/111")
            .with_status(500)
            .create_async()
            .await;

        let client = AccrualClient::new(server.url());
        let result = client.get_order_accrual("111").await;

        assert!(matches!(result, Err(AccrualError::Unknown(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_open_circuit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/orders/111")
            .with_status(429)
            .with_header("Retry-After", "1")
            .expect(3)
            .create_async()
            .await;

        let client =
            AccrualClient::with_circuit_breaker(server.url(), DEFAULT_TIMEOUT, 2, 30);
        for _ in 0..3 {
            let result = client.get_order_accrual("111").await;
            assert!(matches!(result, Err(AccrualError::RetryAfter(_))));
        }
        assert_eq!(client.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/orders/111")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let client =
            AccrualClient::with_circuit_breaker(server.url(), DEFAULT_TIMEOUT, 2, 30);
        for _ in 0..2 {
            let _ = client.get_order_accrual("111").await;
        }

        let result = client.get_order_accrual("111").await;
        assert!(matches!(result, Err(AccrualError::CircuitOpen(_))));
    }
}
