use crate::domain::prediction::{ConfidenceInterval, PredictedRange, PredictionRecord};
use crate::pricing::PriceLookup;
use crate::scoring::metrics::{self, round_metric};
use crate::storage::{PredictionStore, PredictionWriter, StoredPrediction};
use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub total_predictions: usize,
    pub scored_predictions: usize,
    pub newly_scored: usize,
    pub pending: usize,
    pub lookup_failures: usize,
    pub persist_failures: usize,
    pub directional_accuracy: Option<f64>,
    pub mae: Option<f64>,
    pub mape: Option<f64>,
    pub bias: Option<f64>,
    pub range_accuracy: Option<f64>,
    pub mean_signed_error: Option<f64>,
    pub predictions: Vec<PredictionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub ticker: String,
    pub prediction_date: NaiveDate,
    pub horizon_days: u32,
    pub target_date: NaiveDate,
    pub current_price: f64,
    pub predicted_range: PredictedRange,
    pub confidence_interval: ConfidenceInterval,
    pub actual_price: Option<f64>,
    pub scored: bool,
    pub abs_error: Option<f64>,
}

impl From<&PredictionRecord> for PredictionOutcome {
    fn from(r: &PredictionRecord) -> Self {
        let actual_price = r.scored_price();
        Self {
            ticker: r.ticker.clone(),
            prediction_date: r.prediction_date,
            horizon_days: r.horizon_days,
            target_date: r.target_date,
            current_price: r.current_price,
            predicted_range: r.predicted_range,
            confidence_interval: r.confidence_interval,
            actual_price,
            scored: r.scored,
            abs_error: actual_price.map(|a| round_metric((r.predicted_range.mid - a).abs())),
        }
    }
}

enum Attempt {
    NotDue,
    AlreadyScored,
    Scored,
    LookupFailed,
    PersistFailed,
}

/// Reconciles due predictions against realized prices and reports accuracy.
pub struct ScoringEngine {
    store: PredictionStore,
    writer: PredictionWriter,
    prices: Arc<dyn PriceLookup>,
}

impl ScoringEngine {
    pub fn new(store: PredictionStore, writer: PredictionWriter, prices: Arc<dyn PriceLookup>) -> Self {
        Self {
            store,
            writer,
            prices,
        }
    }

    /// Scores every due, unscored record matching `ticker`, then computes the
    /// aggregate over all scored records matching `ticker`.
    ///
    /// A failed lookup or write only affects that record; it stays unscored
    /// and is retried on the next run.
    pub async fn score(&self, ticker: Option<&str>, today: NaiveDate) -> anyhow::Result<ScoreReport> {
        let store = self.store.clone();
        let filter = ticker.map(str::to_string);
        let entries = tokio::task::spawn_blocking(move || store.load(filter.as_deref()))
            .await
            .context("prediction listing task panicked")??;

        let mut records = Vec::with_capacity(entries.len());
        let mut newly_scored = 0;
        let mut pending = 0;
        let mut lookup_failures = 0;
        let mut persist_failures = 0;

        for stored in entries {
            let (record, attempt) = self.try_score(stored, today).await;
            match attempt {
                Attempt::Scored => newly_scored += 1,
                Attempt::NotDue => pending += 1,
                Attempt::LookupFailed => lookup_failures += 1,
                Attempt::PersistFailed => persist_failures += 1,
                Attempt::AlreadyScored => {}
            }
            records.push(record);
        }

        let aggregate = metrics::compute(&records);
        let scored_predictions = records.iter().filter(|r| r.scored).count();

        tracing::info!(
            ticker = ticker.unwrap_or("*"),
            %today,
            provider = self.prices.provider_name(),
            total = records.len(),
            scored_predictions,
            newly_scored,
            pending,
            lookup_failures,
            persist_failures,
            "scoring run finished"
        );

        Ok(ScoreReport {
            total_predictions: records.len(),
            scored_predictions,
            newly_scored,
            pending,
            lookup_failures,
            persist_failures,
            directional_accuracy: aggregate.directional_accuracy,
            mae: aggregate.mae,
            mape: aggregate.mape,
            bias: aggregate.bias,
            range_accuracy: aggregate.range_accuracy,
            mean_signed_error: aggregate.mean_signed_error,
            predictions: records.iter().map(PredictionOutcome::from).collect(),
        })
    }

    /// Returns the record as it should be reported: scored only if the new
    /// state reached disk.
    async fn try_score(&self, stored: StoredPrediction, today: NaiveDate) -> (PredictionRecord, Attempt) {
        let StoredPrediction { path, record } = stored;

        if record.scored {
            return (record, Attempt::AlreadyScored);
        }
        if record.target_date > today {
            return (record, Attempt::NotDue);
        }

        let price = match self.prices.lookup(&record.ticker, record.target_date).await {
            Ok(Some(p)) if p.is_finite() && p >= 0.0 => p,
            Ok(Some(p)) => {
                tracing::warn!(ticker = %record.ticker, target_date = %record.target_date, price = p, "implausible price from provider; skipping");
                return (record, Attempt::LookupFailed);
            }
            Ok(None) => {
                tracing::warn!(ticker = %record.ticker, target_date = %record.target_date, "no price available; skipping");
                return (record, Attempt::LookupFailed);
            }
            Err(err) => {
                tracing::warn!(ticker = %record.ticker, target_date = %record.target_date, error = %err, "price lookup failed; skipping");
                return (record, Attempt::LookupFailed);
            }
        };

        let mut updated = record.clone();
        if let Err(err) = updated.mark_scored(price) {
            tracing::warn!(ticker = %record.ticker, error = %err, "could not mark prediction scored");
            return (record, Attempt::LookupFailed);
        }

        let writer = self.writer.clone();
        let to_write = updated.clone();
        let written = tokio::task::spawn_blocking(move || writer.write(&to_write)).await;

        match written {
            Ok(Ok(_)) => {
                tracing::info!(
                    ticker = %updated.ticker,
                    target_date = %updated.target_date,
                    actual_price = price,
                    path = %path.display(),
                    "prediction scored"
                );
                (updated, Attempt::Scored)
            }
            Ok(Err(err)) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to persist scored prediction");
                (record, Attempt::PersistFailed)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "persist task panicked");
                (record, Attempt::PersistFailed)
            }
        }
    }
}
