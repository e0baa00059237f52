use crate::domain::prediction::PredictionRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Decimal places every reported metric is rounded to.
pub const METRIC_DECIMALS: i32 = 4;

/// Aggregate accuracy over scored records. A metric is `None` when no record
/// qualifies for its denominator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub directional_accuracy: Option<f64>,
    pub mae: Option<f64>,
    pub mape: Option<f64>,
    pub bias: Option<f64>,
    pub range_accuracy: Option<f64>,
    pub mean_signed_error: Option<f64>,
}

/// Unscored records are ignored.
pub fn compute<'a, I>(records: I) -> AccuracyMetrics
where
    I: IntoIterator<Item = &'a PredictionRecord>,
{
    let mut scored = 0usize;
    let mut direction_hits = 0usize;
    let mut direction_total = 0usize;
    let mut abs_error_sum = 0.0;
    let mut signed_error_sum = 0.0;
    let mut pct_error_sum = 0.0;
    let mut rel_bias_sum = 0.0;
    let mut nonzero_actual = 0usize;
    let mut in_range = 0usize;

    for record in records {
        let Some(actual) = record.scored_price() else {
            continue;
        };
        scored += 1;

        let mid = record.predicted_range.mid;
        let current = record.current_price;

        let predicted_move = direction(mid - current);
        let actual_move = direction(actual - current);
        if predicted_move != Ordering::Equal && actual_move != Ordering::Equal {
            direction_total += 1;
            if predicted_move == actual_move {
                direction_hits += 1;
            }
        }

        let error = mid - actual;
        abs_error_sum += error.abs();
        signed_error_sum += error;

        if actual != 0.0 {
            nonzero_actual += 1;
            pct_error_sum += error.abs() / actual;
            rel_bias_sum += error / actual;
        }

        let range = &record.predicted_range;
        if range.low <= actual && actual <= range.high {
            in_range += 1;
        }
    }

    AccuracyMetrics {
        directional_accuracy: ratio(direction_hits as f64, direction_total),
        mae: ratio(abs_error_sum, scored),
        mape: ratio(pct_error_sum, nonzero_actual),
        bias: ratio(rel_bias_sum, nonzero_actual),
        range_accuracy: ratio(in_range as f64, scored),
        mean_signed_error: ratio(signed_error_sum, scored),
    }
}

pub fn round_metric(value: f64) -> f64 {
    let scale = 10f64.powi(METRIC_DECIMALS);
    (value * scale).round() / scale
}

fn ratio(numerator: f64, denominator: usize) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    Some(round_metric(numerator / denominator as f64))
}

fn direction(delta: f64) -> Ordering {
    delta.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::fixtures::{record, scored};
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    fn scored_record(ticker: &str, current: f64, mid: f64, actual: f64) -> PredictionRecord {
        scored(record(ticker, day(), 30, current, mid), actual)
    }

    #[test]
    fn empty_input_reports_no_data() {
        assert_eq!(compute(&Vec::<PredictionRecord>::new()), AccuracyMetrics::default());
    }

    #[test]
    fn unscored_records_do_not_count() {
        let pending = record("AAPL", day(), 30, 190.0, 200.0);
        assert_eq!(compute([&pending]), AccuracyMetrics::default());
    }

    #[test]
    fn errors_cancel_in_signed_error_but_not_in_mae() {
        let records = [
            scored_record("XYZ", 95.0, 100.0, 110.0),
            scored_record("XYZ", 95.0, 100.0, 90.0),
        ];
        let m = compute(&records);

        assert_eq!(m.mae, Some(10.0));
        assert_eq!(m.mean_signed_error, Some(0.0));
        // (-10/110 + 10/90) / 2
        assert_eq!(m.bias, Some(0.0101));
        // (10/110 + 10/90) / 2
        assert_eq!(m.mape, Some(0.101));
        // Predicted up both times; only the first went up.
        assert_eq!(m.directional_accuracy, Some(0.5));
        // Range is [95, 105].
        assert_eq!(m.range_accuracy, Some(0.0));
    }

    #[test]
    fn directional_accuracy_depends_on_current_price() {
        let records = [
            scored_record("XYZ", 105.0, 100.0, 110.0),
            scored_record("XYZ", 105.0, 100.0, 90.0),
        ];
        // Predicted down both times; only the second went down.
        assert_eq!(compute(&records).directional_accuracy, Some(0.5));

        let records = [
            scored_record("AAPL", 190.0, 200.0, 195.0),
            scored_record("MSFT", 400.0, 420.0, 410.0),
        ];
        assert_eq!(compute(&records).directional_accuracy, Some(1.0));
    }

    #[test]
    fn unchanged_price_is_excluded_from_direction() {
        let flat = scored_record("AAPL", 190.0, 200.0, 190.0);
        let m = compute([&flat]);
        assert_eq!(m.directional_accuracy, None);
        assert_eq!(m.mae, Some(10.0));

        let hit = scored_record("MSFT", 400.0, 420.0, 410.0);
        assert_eq!(compute([&flat, &hit]).directional_accuracy, Some(1.0));
    }

    #[test]
    fn flat_prediction_is_excluded_from_direction() {
        let r = scored_record("AAPL", 200.0, 200.0, 210.0);
        assert_eq!(compute([&r]).directional_accuracy, None);
    }

    #[test]
    fn zero_actual_price_is_excluded_from_ratio_metrics() {
        let zero = scored_record("DEAD", 5.0, 4.0, 0.0);
        let m = compute([&zero]);
        assert_eq!(m.mape, None);
        assert_eq!(m.bias, None);
        assert_eq!(m.mae, Some(4.0));
        assert_eq!(m.directional_accuracy, Some(1.0));

        let other = scored_record("AAPL", 190.0, 200.0, 198.0);
        let m = compute([&zero, &other]);
        assert_eq!(m.mape, Some(round_metric(2.0 / 198.0)));
        assert_eq!(m.bias, Some(round_metric(2.0 / 198.0)));
    }

    #[test]
    fn range_accuracy_uses_low_and_high_inclusive() {
        // Range is [190, 210] around mid 200.
        let mut inside = scored_record("AAPL", 190.0, 200.0, 0.0);
        inside.actual_price = Some(inside.predicted_range.high);
        let outside = scored_record("AAPL", 190.0, 200.0, 230.0);
        assert_eq!(compute([&inside, &outside]).range_accuracy, Some(0.5));
    }

    #[test]
    fn rounds_to_four_places() {
        assert_eq!(round_metric(0.123_449), 0.1234);
        assert_eq!(round_metric(0.123_451), 0.1235);
        assert_eq!(round_metric(2.0 / 3.0), 0.6667);
    }
}
