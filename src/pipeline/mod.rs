// src/pipeline/mod.rs

pub mod associate;
pub mod classify;
pub mod mapper;
pub mod odometry;
pub mod processing;

use serde::{Deserialize, Serialize};

pub use associate::AssociationSettings;
pub use classify::StationarySettings;
pub use odometry::{OdometryEstimator, OdometrySettings};
pub use processing::{PipelineError, RadarPipeline};

/// Settings for all pipeline stages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub association: AssociationSettings,
    pub stationary: StationarySettings,
    pub odometry: OdometrySettings,
}
