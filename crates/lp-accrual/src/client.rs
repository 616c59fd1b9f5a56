use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ConstantBuilder};
use reqwest::{header, Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use lp_schemas::UpstreamStatus;

use crate::{AccrualError, AccrualReply, AccrualSource};

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct AccrualConfig {
    /// Base URL, e.g. `http://localhost:8081`.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Retries after the first attempt.
    pub retry_count: usize,

    /// Wait between retries.
    pub retry_wait: Duration,

    /// Upper bound on any single wait, including `Retry-After`.
    pub retry_max_wait: Duration,

    /// Wait after a 429 without a usable `Retry-After`.
    pub rate_limit_delay: Duration,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            timeout: Duration::from_secs(5),
            retry_count: 3,
            retry_wait: Duration::from_secs(1),
            retry_max_wait: Duration::from_secs(5),
            rate_limit_delay: Duration::from_secs(2),
        }
    }
}

impl AccrualConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct WireReply {
    order: String,
    status: String,
    #[serde(default)]
    accrual: Option<Decimal>,
}

/// reqwest-backed [`AccrualSource`].
pub struct AccrualClient {
    http: Client,
    config: AccrualConfig,
}

impl AccrualClient {
    pub fn new(config: AccrualConfig) -> Result<Self, AccrualError> {
        if config.base_url.trim().is_empty() {
            return Err(AccrualError::Config("base url is empty".to_string()));
        }
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn order_url(&self, number: &str) -> String {
        format!(
            "{}/api/orders/{}",
            self.config.base_url.trim_end_matches('/'),
            number
        )
    }

    /// Delay before the next attempt after `err`, given the backoff's own delay.
    fn wait_for(&self, err: &AccrualError, backoff_delay: Duration) -> Duration {
        let wait = match err {
            AccrualError::RateLimited { retry_after } => {
                retry_after.unwrap_or(self.config.rate_limit_delay)
            }
            _ => backoff_delay,
        };
        wait.min(self.config.retry_max_wait)
    }

    async fn query_once(&self, number: &str) -> Result<Option<AccrualReply>, AccrualError> {
        let response = self.http.get(self.order_url(number)).send().await?;
        decode(number, response).await
    }
}

#[async_trait]
impl AccrualSource for AccrualClient {
    async fn query(&self, number: &str) -> Result<Option<AccrualReply>, AccrualError> {
        let mut backoff = ConstantBuilder::default()
            .with_delay(self.config.retry_wait)
            .with_max_times(self.config.retry_count)
            .build();

        let mut attempt = 1usize;
        loop {
            let err = match self.query_once(number).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            let Some(delay) = backoff.next() else {
                return Err(err);
            };
            let wait = self.wait_for(&err, delay);
            warn!(
                order = number,
                attempt,
                max_retries = self.config.retry_count,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "accrual query failed, retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

async fn decode(number: &str, response: Response) -> Result<Option<AccrualReply>, AccrualError> {
    let status = response.status();
    match status {
        StatusCode::OK => {}
        StatusCode::NO_CONTENT => {
            debug!(order = number, "order not registered upstream");
            return Ok(None);
        }
        StatusCode::TOO_MANY_REQUESTS => {
            return Err(AccrualError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        other => return Err(AccrualError::Status(other)),
    }

    let wire: WireReply = response
        .json()
        .await
        .map_err(|e| AccrualError::Decode(e.to_string()))?;

    if wire.order != number {
        return Err(AccrualError::Decode(format!(
            "reply for order {} while asking for {}",
            wire.order, number
        )));
    }
    let status = UpstreamStatus::parse(&wire.status)
        .map_err(|e| AccrualError::Decode(e.to_string()))?;
    if let Some(a) = wire.accrual {
        if a < Decimal::ZERO {
            return Err(AccrualError::Decode(format!("negative accrual {a}")));
        }
    }

    Ok(Some(AccrualReply {
        order: wire.order,
        status,
        accrual: wire.accrual,
    }))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    parse_retry_after(response.headers().get(header::RETRY_AFTER)?.to_str().ok()?)
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AccrualClient {
        AccrualClient::new(AccrualConfig::default().with_base_url("http://accrual:8081/")).unwrap()
    }

    #[test]
    fn order_url_joins_without_double_slash() {
        assert_eq!(
            client().order_url("12345678903"),
            "http://accrual:8081/api/orders/12345678903"
        );
    }

    #[test]
    fn retry_after_accepts_delta_seconds_only() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-1"), None);
    }

    #[test]
    fn waits_are_capped() {
        let c = client();
        let limited = AccrualError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(c.wait_for(&limited, Duration::from_secs(1)), Duration::from_secs(5));

        let no_header = AccrualError::RateLimited { retry_after: None };
        assert_eq!(c.wait_for(&no_header, Duration::from_secs(1)), Duration::from_secs(2));

        let server = AccrualError::Status(StatusCode::BAD_GATEWAY);
        assert_eq!(c.wait_for(&server, Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let err = AccrualClient::new(AccrualConfig::default().with_base_url(" ")).err();
        assert!(matches!(err, Some(AccrualError::Config(_))));
    }
}
