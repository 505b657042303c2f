//! HTTP transport for the stats API.
//!
//! `Transport` is the seam between the typed client and the network: it takes
//! a path relative to the API base (query string included) and returns the raw
//! body. Failures are never retried here; they abort the run.

use std::num::NonZeroU32;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use tracing::debug;

use crate::config::Config;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str) -> Result<String>;
}

pub struct HttpTransport {
    base_url: String,
    http_client: reqwest::Client,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let quota = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| anyhow!("requests_per_minute must be greater than zero"))?;
        let rate_limiter = RateLimiter::direct(Quota::per_minute(quota));

        // No timeout unless configured: a stalled upstream stalls the run.
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(5);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout).connect_timeout(timeout);
        }
        let http_client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            http_client,
            rate_limiter,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str) -> Result<String> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;

        if !status.is_success() {
            return Err(anyhow!(
                "Stats API error for {} (status {}): {}",
                path,
                status,
                body
            ));
        }

        debug!("GET {} returned {} bytes", path, body.len());
        Ok(body)
    }
}
