use crate::config::Settings;
use crate::pricing::PriceLookup;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PATH: &str = "/v1/prices/close";
const DEFAULT_RETRIES: u32 = 3;
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePriceResponse {
    pub ticker: String,
    pub as_of_date: NaiveDate,
    pub close: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HttpJsonPriceLookup {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
}

impl HttpJsonPriceLookup {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_price_provider_base_url()?.to_string();
        let api_key = settings.price_provider_api_key.clone();

        let timeout_secs = std::env::var("PRICE_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("PRICE_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let path = std::env::var("PRICE_PROVIDER_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build price provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
            retries,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, ticker: &str, as_of: NaiveDate) -> Result<Option<f64>> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[("ticker", ticker.to_string()), ("as_of_date", as_of.to_string())])
            .send()
            .await
            .context("price provider request failed")?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = res
            .text()
            .await
            .context("failed to read price provider response")?;
        if !status.is_success() {
            anyhow::bail!("price provider HTTP {status}: {text}");
        }

        parse_close(&text, ticker)
    }
}

#[async_trait::async_trait]
impl PriceLookup for HttpJsonPriceLookup {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn lookup(&self, ticker: &str, as_of: NaiveDate) -> Result<Option<f64>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(ticker, as_of).await {
                Ok(price) => return Ok(price),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = backoff_for(attempt);
                    tracing::warn!(
                        attempt,
                        ticker,
                        %as_of,
                        ?backoff,
                        error = %err,
                        "price lookup failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Doubles per attempt, capped at `MAX_BACKOFF_SHIFT` doublings.
fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT))
}

fn parse_close(text: &str, ticker: &str) -> Result<Option<f64>> {
    let parsed = serde_json::from_str::<ClosePriceResponse>(text)
        .with_context(|| format!("price provider response is not valid JSON: {text}"))?;

    anyhow::ensure!(
        parsed.ticker.eq_ignore_ascii_case(ticker),
        "price provider ticker mismatch: expected {ticker}, got {}",
        parsed.ticker
    );

    Ok(parsed.close)
}
