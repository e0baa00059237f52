use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Model weights must add up to 1.0 within this tolerance.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

const FILE_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedRange {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    #[serde(rename = "ci_5")]
    pub p5: f64,
    #[serde(rename = "ci_25")]
    pub p25: f64,
    #[serde(rename = "ci_75")]
    pub p75: f64,
    #[serde(rename = "ci_95")]
    pub p95: f64,
}

/// A forecast as handed over by the forecasting caller, before it becomes a
/// persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrediction {
    pub ticker: String,
    pub prediction_date: NaiveDate,
    pub horizon_days: u32,
    pub current_price: f64,
    pub predicted_range: PredictedRange,
    pub confidence_interval: ConfidenceInterval,
    pub model_weights: BTreeMap<String, f64>,
    pub key_factors: Vec<String>,
}

/// One persisted forecast for one ticker over one horizon.
///
/// Field names are the on-disk names and must stay stable so archived files
/// remain readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub ticker: String,
    pub prediction_date: NaiveDate,
    pub horizon_days: u32,
    pub target_date: NaiveDate,
    pub current_price: f64,
    pub predicted_range: PredictedRange,
    pub confidence_interval: ConfidenceInterval,
    pub model_weights: BTreeMap<String, f64>,
    pub key_factors: Vec<String>,
    #[serde(default)]
    pub actual_price: Option<f64>,
    #[serde(default)]
    pub scored: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("ticker must be non-empty")]
    EmptyTicker,
    #[error("ticker contains characters not allowed in a file name: {0:?}")]
    InvalidTicker(String),
    #[error("horizon_days must be >= 1")]
    NonPositiveHorizon,
    #[error("target date overflows the calendar ({prediction_date} + {horizon_days}d)")]
    DateOverflow {
        prediction_date: NaiveDate,
        horizon_days: u32,
    },
    #[error("target_date mismatch: expected {expected}, got {actual}")]
    TargetDateMismatch {
        expected: NaiveDate,
        actual: NaiveDate,
    },
    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },
    #[error("current_price must be > 0 (got {0})")]
    NonPositivePrice(f64),
    #[error("predicted_range must satisfy low <= mid <= high (got {low}/{mid}/{high})")]
    RangeOrder { low: f64, mid: f64, high: f64 },
    #[error("confidence_interval must be non-decreasing (got {p5}/{p25}/{p75}/{p95})")]
    IntervalOrder { p5: f64, p25: f64, p75: f64, p95: f64 },
    #[error("model_weights must be non-empty")]
    NoModelWeights,
    #[error("weight for model {model:?} must be within [0, 1] (got {weight})")]
    WeightOutOfRange { model: String, weight: f64 },
    #[error("model_weights must sum to ~1.0 (got {0})")]
    WeightSum(f64),
    #[error("key_factors must not contain blank entries")]
    BlankKeyFactor,
    #[error("scored record has no actual_price")]
    ScoredWithoutActual,
    #[error("actual_price is set on an unscored record")]
    ActualWithoutScored,
    #[error("actual_price must be finite and >= 0 (got {0})")]
    InvalidActualPrice(f64),
    #[error("record is already scored")]
    AlreadyScored,
}

impl NewPrediction {
    /// Normalizes the ticker, derives `target_date` and validates the result.
    pub fn into_record(self) -> Result<PredictionRecord, RecordError> {
        let ticker = self.ticker.trim().to_ascii_uppercase();
        let target_date = target_date_for(self.prediction_date, self.horizon_days)?;

        let key_factors = self
            .key_factors
            .into_iter()
            .map(|f| f.trim().to_string())
            .collect();

        let record = PredictionRecord {
            ticker,
            prediction_date: self.prediction_date,
            horizon_days: self.horizon_days,
            target_date,
            current_price: self.current_price,
            predicted_range: self.predicted_range,
            confidence_interval: self.confidence_interval,
            model_weights: self.model_weights,
            key_factors,
            actual_price: None,
            scored: false,
        };
        record.validate()?;
        Ok(record)
    }
}

impl PredictionRecord {
    pub fn validate(&self) -> Result<(), RecordError> {
        validate_ticker(&self.ticker)?;

        let expected = target_date_for(self.prediction_date, self.horizon_days)?;
        if self.target_date != expected {
            return Err(RecordError::TargetDateMismatch {
                expected,
                actual: self.target_date,
            });
        }

        ensure_finite("current_price", self.current_price)?;
        if self.current_price <= 0.0 {
            return Err(RecordError::NonPositivePrice(self.current_price));
        }

        let PredictedRange { low, mid, high } = self.predicted_range;
        ensure_finite("predicted_range.low", low)?;
        ensure_finite("predicted_range.mid", mid)?;
        ensure_finite("predicted_range.high", high)?;
        if !(low <= mid && mid <= high) {
            return Err(RecordError::RangeOrder { low, mid, high });
        }

        let ConfidenceInterval { p5, p25, p75, p95 } = self.confidence_interval;
        ensure_finite("confidence_interval.ci_5", p5)?;
        ensure_finite("confidence_interval.ci_25", p25)?;
        ensure_finite("confidence_interval.ci_75", p75)?;
        ensure_finite("confidence_interval.ci_95", p95)?;
        if !(p5 <= p25 && p25 <= p75 && p75 <= p95) {
            return Err(RecordError::IntervalOrder { p5, p25, p75, p95 });
        }

        validate_weights(&self.model_weights)?;

        if self.key_factors.iter().any(|f| f.trim().is_empty()) {
            return Err(RecordError::BlankKeyFactor);
        }

        match (self.scored, self.actual_price) {
            (true, None) => return Err(RecordError::ScoredWithoutActual),
            (false, Some(_)) => return Err(RecordError::ActualWithoutScored),
            (_, Some(actual)) => validate_actual_price(actual)?,
            (false, None) => {}
        }

        Ok(())
    }

    /// The unscored -> scored transition. This is the only in-place update a
    /// record ever receives.
    pub fn mark_scored(&mut self, actual_price: f64) -> Result<(), RecordError> {
        if self.scored {
            return Err(RecordError::AlreadyScored);
        }
        validate_actual_price(actual_price)?;
        self.actual_price = Some(actual_price);
        self.scored = true;
        Ok(())
    }

    /// Canonical file name for the (ticker, prediction_date, horizon) key.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}d{FILE_SUFFIX}",
            self.ticker,
            self.prediction_date.format("%Y-%m-%d"),
            self.horizon_days
        )
    }

    /// Scored records only; `None` until the scoring transition happened.
    pub fn scored_price(&self) -> Option<f64> {
        if self.scored {
            self.actual_price
        } else {
            None
        }
    }
}

pub fn target_date_for(
    prediction_date: NaiveDate,
    horizon_days: u32,
) -> Result<NaiveDate, RecordError> {
    if horizon_days == 0 {
        return Err(RecordError::NonPositiveHorizon);
    }
    prediction_date
        .checked_add_days(Days::new(u64::from(horizon_days)))
        .ok_or(RecordError::DateOverflow {
            prediction_date,
            horizon_days,
        })
}

pub(crate) fn is_record_file_name(name: &str) -> bool {
    name.ends_with(FILE_SUFFIX) && !name.starts_with('.')
}

fn validate_ticker(ticker: &str) -> Result<(), RecordError> {
    if ticker.trim().is_empty() {
        return Err(RecordError::EmptyTicker);
    }
    let bad_char = |c: char| c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\');
    // A leading dot would make the record file hidden from listing.
    if ticker.chars().any(bad_char) || ticker.starts_with('.') {
        return Err(RecordError::InvalidTicker(ticker.to_string()));
    }
    Ok(())
}

fn validate_weights(weights: &BTreeMap<String, f64>) -> Result<(), RecordError> {
    if weights.is_empty() {
        return Err(RecordError::NoModelWeights);
    }

    let mut sum = 0.0;
    for (model, &weight) in weights {
        if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
            return Err(RecordError::WeightOutOfRange {
                model: model.clone(),
                weight,
            });
        }
        sum += weight;
    }

    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(RecordError::WeightSum(sum));
    }
    Ok(())
}

fn validate_actual_price(price: f64) -> Result<(), RecordError> {
    if !price.is_finite() || price < 0.0 {
        return Err(RecordError::InvalidActualPrice(price));
    }
    Ok(())
}

fn ensure_finite(field: &'static str, value: f64) -> Result<(), RecordError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(RecordError::NonFinite { field })
    }
}
