//! Congestion-aware switch ports: CONGA leaves and telemetry-aggregating spines.

pub mod dre;
pub mod leaf;
pub mod spine;
pub mod table;

use crate::units::{Microsecs, Nanosecs};

/// Tuning shared by every leaf's congestion estimators and tables.
#[derive(
    Debug, Clone, Copy, PartialEq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize,
)]
#[serde(default)]
pub struct CongaParams {
    /// EWMA smoothing factor for the local rate estimators.
    #[builder(default = 0.1)]
    pub alpha: f64,
    /// Minimum spacing between two estimator updates.
    #[builder(default = Microsecs::new(50).into_ns(), setter(into))]
    pub update_interval: Nanosecs,
    /// Age after which a table entry is no longer visible.
    #[builder(default = Microsecs::new(500).into_ns(), setter(into))]
    pub entry_timeout: Nanosecs,
}

impl Default for CongaParams {
    fn default() -> Self {
        Self::builder().build()
    }
}
