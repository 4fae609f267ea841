//! Adaptive bitrate: throughput estimation and variant selection.

mod controller;
mod estimator;
mod types;

pub use controller::{AbrController, ChoiceReason, VariantChoice};
pub use estimator::{BitrateEstimator, BitrateSeed};
pub use types::{AbrOptions, QualitySelection};
