use chrono::NaiveDate;

pub mod http;

pub use http::HttpJsonPriceLookup;

/// Source of realized prices used to score predictions.
///
/// `Ok(None)` means the provider has no price for that ticker/date. Callers
/// treat it the same as an error: the record is retried on a later run.
#[async_trait::async_trait]
pub trait PriceLookup: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Close price on `as_of`, or the closest earlier session the provider has.
    async fn lookup(&self, ticker: &str, as_of: NaiveDate) -> anyhow::Result<Option<f64>>;
}
