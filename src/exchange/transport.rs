//! Shared HTTP transport for exchange clients: one reqwest client (optionally
//! behind a proxy), one rate limiter per quota, retries with backoff.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ExchangeError;
use crate::exchange::retry::{retry_async, RetryConfig};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::rate_limit::RateLimiter;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub proxy_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            proxy_url: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Cheap to clone; clones share the client and the limiter.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
}

impl HttpTransport {
    pub fn new(cfg: &TransportConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(cfg.timeout)
            .pool_max_idle_per_host(50);
        if let Some(url) = &cfg.proxy_url {
            let proxy = reqwest::Proxy::all(url).context("invalid proxy url")?;
            builder = builder.proxy(proxy);
        }
        Ok(Self {
            client: builder.build().context("building http client")?,
            limiter,
            retry: cfg.retry.clone(),
        })
    }

    /// GET `url` with `query`, decoding the JSON body. Every attempt takes a
    /// limiter token first.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let body = retry_async(
            &self.retry,
            url,
            |e: &ExchangeError| e.is_retryable(),
            || self.get_once(url, query),
        )
        .await?;
        serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(format!("{}: {}", url, e)))
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> Result<String, ExchangeError> {
        self.limiter.acquire().await;
        let resp = self.client.get(url).query(query).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            log(
                Level::Debug,
                Domain::Market,
                "http_error",
                obj(&[
                    ("url", v_str(url)),
                    ("status", v_num(status.as_u16() as f64)),
                ]),
            );
            return Err(ExchangeError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
