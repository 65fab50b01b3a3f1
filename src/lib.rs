//! radar-replay: offline automotive radar capture replay.
//!
//! Reconstructs per-frame detections and tracks from a recorded capture set
//! (four corner short-range radars, one dual-range front radar, one fused
//! track stream) and turns them into enhanced, associated, odometry-carrying
//! frames plus a 360° free-space boundary around the ego vehicle.
//!
//! The stages are:
//!
//! 1. **Capture** – per-stream line readers and the time-ordered frame merger.
//! 2. **Pipeline** – detection mapping, motion classification, track
//!    association and Doppler RANSAC ego-motion estimation.
//! 3. **Virtual sensor** – angular segment ring clipping detections and track
//!    footprints into a closed radial boundary.
//! 4. **Playback** – the replay facade wiring capture and pipeline into
//!    flattened per-frame output for consumers.

pub mod capture;
pub mod config;
pub mod math;
pub mod pipeline;
pub mod playback;
pub mod types;
pub mod virtual_sensor;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, ReplaySettings, VehicleConfig};
pub use pipeline::{PipelineError, ProcessingSettings, RadarPipeline};
pub use playback::{CaptureError, RadarFrame, RadarPlayback, RadarPoint, RadarTrack};
pub use types::{
    EnhancedDetection, EnhancedDetections, EnhancedTrack, EnhancedTracks, OdometryEstimate,
    SensorIndex, VehicleMotionState, VehicleParameters,
};
pub use virtual_sensor::VirtualSensorRing;
