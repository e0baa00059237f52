pub mod engine;
pub mod metrics;

pub use engine::{PredictionOutcome, ScoreReport, ScoringEngine};
pub use metrics::AccuracyMetrics;
