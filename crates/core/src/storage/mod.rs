pub mod rotation;
pub mod store;
pub mod writer;

pub use rotation::Rotator;
pub use store::{Entry, PredictionStore, StoredPrediction};
pub use writer::{PredictionWriter, WriteError};
