// src/pipeline/classify.rs
//
// Motion classification: compare each return's Doppler against the Doppler a
// stationary scatterer would exhibit under the current ego motion.

use serde::{Deserialize, Serialize};

use crate::math::{erfc, squared};
use crate::types::{EnhancedDetections, RadarCalibration, VehicleMotionState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StationarySettings {
    /// Gate on the normalized Doppler residual.
    pub n_sigma: f32,
}

impl Default for StationarySettings {
    fn default() -> Self {
        Self { n_sigma: 3.0 }
    }
}

/// Detection angle in the ISO frame: raw azimuth normalized by the sensor's
/// polarity, rotated by the sensor orientation.
pub(crate) fn detection_angle_rad(azimuth_raw_rad: f32, calibration: &RadarCalibration) -> f32 {
    (-azimuth_raw_rad * calibration.polarity) + calibration.iso.orientation_rad
}

/// Range-rate contribution of ego yaw at the sensor's lever arm.
pub(crate) fn yaw_compensation(
    state: &VehicleMotionState,
    calibration: &RadarCalibration,
    det_angle: f32,
) -> f32 {
    state.yaw_rate_rps
        * ((calibration.iso.longitudinal_m * det_angle.sin())
            - (calibration.iso.lateral_m * det_angle.cos()))
}

fn stationary_probability_from_distance(m_dist: f32) -> f32 {
    // 1 - erf(m / sqrt(2))
    erfc(m_dist / std::f32::consts::SQRT_2)
}

/// Stamp every detection with the stationary / moveable / static flags and
/// the stationary probability. Association fields are reset; the associator
/// may override `is_moveable` and `is_static` afterwards.
pub fn classify_detections(
    settings: &StationarySettings,
    calibration: &RadarCalibration,
    motion: &VehicleMotionState,
    detections: &mut EnhancedDetections,
) {
    let sigma_range_rate = calibration.range_rate_accuracy_mps / 3.0;
    let range_rate_var = squared(sigma_range_rate.max(0.01));

    for det in &mut detections.detections {
        det.fused_track_index = -1;
        det.is_moveable = false;

        let det_angle = detection_angle_rad(det.azimuth_raw_rad, calibration);
        let yaw_term = yaw_compensation(motion, calibration, det_angle);
        let compensated_range_rate = det.range_rate_mps + yaw_term;

        let predicted_range_rate =
            -(motion.v_lon_mps * det_angle.cos() + motion.v_lat_mps * det_angle.sin());

        let m_dist = (compensated_range_rate - predicted_range_rate).abs()
            / range_rate_var.max(1e-4).sqrt();

        det.is_stationary = m_dist <= settings.n_sigma;
        det.stationary_probability = stationary_probability_from_distance(m_dist).clamp(0.0, 1.0);
        det.is_static = det.is_stationary;
    }
}
