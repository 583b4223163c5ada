//! Riot API request execution
//!
//! Wraps every upstream call in the shared rate gate: sleep the governor's
//! computed wait, issue the request, feed the response headers back into
//! the governor, then classify the status. Soft failures are retried with
//! Retry-After-aware backoff; on a retry the backoff delay and the fresh
//! rate-limit wait compose by taking their maximum.

use crate::config::Config;
use crate::error::ApiError;
use crate::services::rate_limiter::RateLimitObservation;
use crate::services::{BackoffSequencer, RateGovernor};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client bound to the shared rate governor
pub struct RiotClient {
    client: Client,
    governor: Arc<RateGovernor>,
    backoff_base: Duration,
    max_retries: u32,
}

impl RiotClient {
    pub fn new(config: &Config, governor: Arc<RateGovernor>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut token =
            HeaderValue::from_str(&config.api_token).context("Invalid RIOT_API_TOKEN value")?;
        token.set_sensitive(true);
        headers.insert("X-Riot-Token", token);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            governor,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            max_retries: config.max_retries,
        })
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Issue one GET and return the parsed JSON body.
    ///
    /// `endpoint` is the templated method path used as the quota scope key,
    /// `url` the fully expanded request URL. The call blocks through the
    /// governor wait before every attempt; a fresh call incurs only the
    /// rate-limit wait.
    pub async fn get_json(
        &self,
        routing_value: &str,
        endpoint: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError> {
        let mut backoff = BackoffSequencer::new(self.backoff_base);
        let mut backoff_wait = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            let rate_wait = self.governor.wait_before(routing_value, endpoint).await;
            let wait = rate_wait.max(backoff_wait);
            if wait > Duration::ZERO {
                debug!("Waiting {:?} before {} call", wait, endpoint);
                tokio::time::sleep(wait).await;
            }

            let err = match self.client.get(url).query(query).send().await {
                Ok(response) => {
                    let status = response.status();
                    let headers = response.headers().clone();

                    if let Some(observation) = RateLimitObservation::from_headers(&headers) {
                        self.governor
                            .record_response(routing_value, &observation, Some(endpoint))
                            .await;
                    }

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| ApiError::from_network_error(&e));
                    }

                    let body = response.text().await.unwrap_or_default();
                    ApiError::from_response(status.as_u16(), &headers, &body)
                }
                Err(e) => ApiError::from_network_error(&e),
            };

            attempt += 1;
            if self.gives_up(&err, attempt) {
                return Err(err);
            }

            backoff_wait = backoff.next_delay(err.retry_after_hint().map(Duration::from_secs));
            warn!(
                "{} attempt {}/{} failed ({}), retrying in at least {:?}",
                endpoint, attempt, self.max_retries, err, backoff_wait
            );
        }
    }

    /// Whether to stop retrying. Quota exhaustion is never surfaced to
    /// the caller as a failure, so only network errors count toward the
    /// retry ceiling.
    fn gives_up(&self, err: &ApiError, attempt: u32) -> bool {
        if !err.is_retryable() {
            return true;
        }
        if matches!(err, ApiError::QuotaExceeded { .. }) {
            return false;
        }
        attempt > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            api_token: "RGAPI-test".into(),
            database_path: "sqlite::memory:".into(),
            initial_timestamp: chrono::Utc::now(),
            end_timestamp: chrono::Utc::now(),
            page_size: 20,
            watermark_staleness_days: 3,
            backoff_base_ms: 100,
            max_retries: 2,
            request_timeout_secs: 5,
            followed_players: Vec::new(),
            followed_leagues: Vec::new(),
        }
    }

    #[test]
    fn test_client_builds() {
        let governor = Arc::new(RateGovernor::new());
        assert!(RiotClient::new(&test_config(), governor).is_ok());
    }

    #[test]
    fn test_client_rejects_unprintable_token() {
        let mut config = test_config();
        config.api_token = "bad\ntoken".into();
        let governor = Arc::new(RateGovernor::new());
        assert!(RiotClient::new(&config, governor).is_err());
    }

    #[test]
    fn test_quota_exhaustion_never_exhausts_retries() {
        let governor = Arc::new(RateGovernor::new());
        let client = RiotClient::new(&test_config(), governor).unwrap();
        let err = ApiError::QuotaExceeded { retry_after: Some(5) };
        // max_retries is 2; a 429 streak keeps retrying anyway
        assert!(!client.gives_up(&err, 3));
        assert!(!client.gives_up(&err, 1000));
    }

    #[test]
    fn test_network_errors_hit_the_ceiling() {
        let governor = Arc::new(RateGovernor::new());
        let client = RiotClient::new(&test_config(), governor).unwrap();
        let err = ApiError::Network("timed out".into());
        assert!(!client.gives_up(&err, 2));
        assert!(client.gives_up(&err, 3));
    }

    #[test]
    fn test_non_retryable_gives_up_immediately() {
        let governor = Arc::new(RateGovernor::new());
        let client = RiotClient::new(&test_config(), governor).unwrap();
        assert!(client.gives_up(&ApiError::NotFound, 1));
    }
}
