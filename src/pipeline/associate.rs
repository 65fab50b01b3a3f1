// src/pipeline/associate.rs
//
// Track prediction and detection-to-track association. The latest fused
// track set is propagated to the detection time, each usable detection is
// tested against the predicted oriented bounding boxes, and the best
// Doppler-consistent box wins. Assignments feed a per-track moving vote that
// can flip a track (and its detections) to moveable.

use serde::{Deserialize, Serialize};

use crate::math::{microseconds_to_seconds, squared};
use crate::pipeline::classify::detection_angle_rad;
use crate::types::{
    flags, EnhancedDetection, EnhancedDetections, RadarCalibration, Vec2, VehicleMotionState,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationSettings {
    /// Scale applied to track extents when building the gating boxes.
    pub bounding_box_scale: f32,
    /// Gate on the normalized relative-velocity Doppler residual.
    pub range_rate_sigma: f32,
}

impl Default for AssociationSettings {
    fn default() -> Self {
        Self {
            bounding_box_scale: 1.1,
            range_rate_sigma: 3.0,
        }
    }
}

/// Internal track state kept between detection frames. Rebuilt from every
/// track-fusion frame; `moving_votes` starts at zero each rebuild.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub acceleration: Vec2,
    pub length: f32,
    pub width: f32,
    pub heading: f32,
    pub heading_rate: f32,
    pub is_stationary: bool,
    pub is_moveable: bool,
    pub moving_votes: f32,
}

#[derive(Debug, Clone, Copy)]
struct OrientedBox {
    center: Vec2,
    half_length: f32,
    half_width: f32,
    heading: f32,
}

impl OrientedBox {
    fn contains(&self, point: Vec2) -> bool {
        let delta = point - self.center;
        let cos_h = (-self.heading).cos();
        let sin_h = (-self.heading).sin();
        let local_x = delta.x * cos_h - delta.y * sin_h;
        let local_y = delta.x * sin_h + delta.y * cos_h;
        local_x.abs() <= self.half_length && local_y.abs() <= self.half_width
    }
}

/// VCS position of a detection: the Cartesian offsets when present, the polar
/// reconstruction otherwise, shifted by the sensor mounting position.
pub(crate) fn detection_position_vcs(
    det: &EnhancedDetection,
    calibration: &RadarCalibration,
) -> Vec2 {
    let mut lon = det.longitudinal_offset_m;
    let mut lat = det.lateral_offset_m;
    if lon == 0.0 && lat == 0.0 && det.range_m > 0.0 {
        lon = det.range_m * det.azimuth_rad.cos();
        lat = det.range_m * det.azimuth_rad.sin();
    }
    Vec2::new(
        lon + calibration.vcs.longitudinal_m,
        lat + calibration.vcs.lateral_m,
    )
}

/// Assign each usable detection to at most one predicted track box and update
/// the winning track's moving vote. Detections are mutated in place; order
/// and count are preserved.
pub fn associate_detections(
    settings: &AssociationSettings,
    calibration: &RadarCalibration,
    motion: &VehicleMotionState,
    tracks: &mut [TrackState],
    tracks_timestamp_us: u64,
    timestamp_us: u64,
    detections: &mut EnhancedDetections,
) {
    if tracks.is_empty() {
        return;
    }

    let sigma_range_rate = calibration.range_rate_accuracy_mps / 3.0;
    let range_rate_var = squared(sigma_range_rate.max(0.01));

    let dt_s = microseconds_to_seconds(timestamp_us.saturating_sub(tracks_timestamp_us));

    let boxes: Vec<OrientedBox> = tracks
        .iter()
        .map(|track| {
            let position = track.position
                + track.velocity * dt_s
                + track.acceleration * (0.5 * dt_s * dt_s);
            let heading = track.heading + track.heading_rate * dt_s;
            OrientedBox {
                center: position,
                half_length: track.length.max(0.1) * 0.5 * settings.bounding_box_scale,
                half_width: track.width.max(0.1) * 0.5 * settings.bounding_box_scale,
                heading,
            }
        })
        .collect();

    for det in &mut detections.detections {
        if det.flags & flags::USABLE_MASK == 0 {
            continue;
        }

        let det_pos = detection_position_vcs(det, calibration);
        let det_angle = detection_angle_rad(det.azimuth_raw_rad, calibration);
        let range_rate_model = Vec2::new(-det_angle.cos(), -det_angle.sin());

        let mut best_distance = f32::MAX;
        let mut best_index = None;

        for (i, bounding_box) in boxes.iter().enumerate() {
            if !bounding_box.contains(det_pos) {
                continue;
            }

            let relative_velocity =
                Vec2::new(motion.v_lon_mps, motion.v_lat_mps) - tracks[i].velocity;
            let predicted_range_rate = relative_velocity.dot(&range_rate_model);

            let m_dist =
                (det.range_rate_mps - predicted_range_rate).abs() / range_rate_var.max(1e-4).sqrt();

            // Ties resolve to the lower track index via strict less-than.
            if m_dist <= settings.range_rate_sigma && m_dist < best_distance {
                best_distance = m_dist;
                best_index = Some(i);
            }
        }

        if let Some(index) = best_index {
            let track = &mut tracks[index];
            let mut moveable = track.is_moveable;
            if !track.is_moveable {
                let vote = if det.is_stationary {
                    -det.stationary_probability
                } else {
                    1.0 - det.stationary_probability
                };
                track.moving_votes = (track.moving_votes + vote).clamp(-100.0, 100.0);
                moveable = track.moving_votes > 0.0;
            }

            det.is_moveable = moveable;
            det.is_static = det.is_stationary && !det.is_moveable;
            det.fused_track_index = index as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RadarCalibration;

    fn calibration() -> RadarCalibration {
        RadarCalibration {
            range_rate_accuracy_mps: 1.5,
            ..RadarCalibration::default()
        }
    }

    fn track_at(lon: f32, lat: f32) -> TrackState {
        TrackState {
            position: Vec2::new(lon, lat),
            length: 4.0,
            width: 2.0,
            ..TrackState::default()
        }
    }

    fn detection_at(lon: f32, lat: f32, range_rate: f32) -> EnhancedDetection {
        EnhancedDetection {
            longitudinal_offset_m: lon,
            lateral_offset_m: lat,
            range_rate_mps: range_rate,
            flags: flags::VALID,
            ..EnhancedDetection::default()
        }
    }

    fn frame(detections: Vec<EnhancedDetection>) -> EnhancedDetections {
        EnhancedDetections {
            header: Default::default(),
            detections,
        }
    }

    #[test]
    fn assigns_detection_inside_matching_box() {
        let settings = AssociationSettings::default();
        let cal = calibration();
        let motion = VehicleMotionState::default();
        let mut tracks = vec![track_at(10.0, 0.0)];
        let mut dets = frame(vec![detection_at(10.0, 0.5, 0.0)]);

        associate_detections(&settings, &cal, &motion, &mut tracks, 900, 1000, &mut dets);

        assert_eq!(dets.detections[0].fused_track_index, 0);
    }

    #[test]
    fn skips_detections_without_usable_flags() {
        let settings = AssociationSettings::default();
        let cal = calibration();
        let motion = VehicleMotionState::default();
        let mut tracks = vec![track_at(10.0, 0.0)];
        let mut det = detection_at(10.0, 0.0, 0.0);
        det.flags = 0;
        let mut dets = frame(vec![det]);

        associate_detections(&settings, &cal, &motion, &mut tracks, 900, 1000, &mut dets);

        assert_eq!(dets.detections[0].fused_track_index, -1);
    }

    #[test]
    fn rejects_doppler_inconsistent_boxes() {
        let settings = AssociationSettings::default();
        let cal = calibration();
        let motion = VehicleMotionState::default();
        // Track receding fast; a zero-Doppler detection inside its box does
        // not match the relative-velocity prediction.
        let mut tracks = vec![TrackState {
            velocity: Vec2::new(30.0, 0.0),
            ..track_at(10.0, 0.0)
        }];
        let mut dets = frame(vec![detection_at(10.0, 0.0, 0.0)]);

        associate_detections(&settings, &cal, &motion, &mut tracks, 900, 1000, &mut dets);

        assert_eq!(dets.detections[0].fused_track_index, -1);
    }

    #[test]
    fn equal_distance_resolves_to_lower_index() {
        let settings = AssociationSettings::default();
        let cal = calibration();
        let motion = VehicleMotionState::default();
        // Two identical overlapping tracks; both boxes contain the detection
        // with the same residual.
        let mut tracks = vec![track_at(10.0, 0.0), track_at(10.0, 0.0)];
        let mut dets = frame(vec![detection_at(10.0, 0.0, 0.0)]);

        associate_detections(&settings, &cal, &motion, &mut tracks, 1000, 1000, &mut dets);

        assert_eq!(dets.detections[0].fused_track_index, 0);
    }

    #[test]
    fn backwards_detection_time_clamps_prediction() {
        let settings = AssociationSettings::default();
        let cal = calibration();
        let motion = VehicleMotionState::default();
        // Fast track; with a backwards timestamp the box must stay at the
        // fusion-time position instead of being predicted backwards.
        let mut tracks = vec![TrackState {
            velocity: Vec2::new(-100.0, 0.0),
            ..track_at(10.0, 0.0)
        }];
        // Closing target: ego static, track approaching at 100 m/s.
        let mut dets = frame(vec![detection_at(10.0, 0.0, -100.0)]);

        associate_detections(
            &settings,
            &cal,
            &motion,
            &mut tracks,
            2_000_000,
            1_000_000,
            &mut dets,
        );

        assert_eq!(dets.detections[0].fused_track_index, 0);
    }

    #[test]
    fn repeated_moving_detections_flip_track_moveable() {
        let settings = AssociationSettings::default();
        let cal = calibration();
        let motion = VehicleMotionState::default();
        let mut tracks = vec![track_at(10.0, 0.0)];

        // Ten consecutive non-stationary detections with low stationary
        // probability vote the track moveable.
        for _ in 0..10 {
            let mut det = detection_at(10.0, 0.0, 0.0);
            det.is_stationary = false;
            det.stationary_probability = 0.1;
            let mut dets = frame(vec![det]);
            associate_detections(&settings, &cal, &motion, &mut tracks, 1000, 1000, &mut dets);
            assert_eq!(dets.detections[0].fused_track_index, 0);
        }

        assert!(tracks[0].moving_votes > 0.0);

        let mut det = detection_at(10.0, 0.0, 0.0);
        det.is_stationary = true;
        det.stationary_probability = 0.9;
        let mut dets = frame(vec![det]);
        associate_detections(&settings, &cal, &motion, &mut tracks, 1000, 1000, &mut dets);

        assert!(dets.detections[0].is_moveable);
        assert!(!dets.detections[0].is_static);
    }

    #[test]
    fn enlarging_bounding_box_scale_only_adds_assignments() {
        let cal = calibration();
        let motion = VehicleMotionState::default();
        let detections = vec![
            detection_at(10.0, 0.5, 0.0),
            detection_at(12.4, 0.0, 0.0),
            detection_at(30.0, 0.0, 0.0),
        ];

        let mut assigned_small = Vec::new();
        let mut assigned_large = Vec::new();
        for (scale, assigned) in [
            (1.0, &mut assigned_small),
            (1.5, &mut assigned_large),
        ] {
            let settings = AssociationSettings {
                bounding_box_scale: scale,
                ..AssociationSettings::default()
            };
            let mut tracks = vec![track_at(10.0, 0.0)];
            let mut dets = frame(detections.clone());
            associate_detections(&settings, &cal, &motion, &mut tracks, 1000, 1000, &mut dets);
            *assigned = dets
                .detections
                .iter()
                .enumerate()
                .filter(|(_, d)| d.fused_track_index >= 0)
                .map(|(i, _)| i)
                .collect();
        }

        for index in &assigned_small {
            assert!(assigned_large.contains(index));
        }
        assert!(assigned_large.len() >= assigned_small.len());
    }

    #[test]
    fn falls_back_to_polar_position_when_offsets_are_zero() {
        let cal = calibration();
        let det = EnhancedDetection {
            range_m: 10.0,
            azimuth_rad: 0.0,
            flags: flags::VALID,
            ..EnhancedDetection::default()
        };
        let pos = detection_position_vcs(&det, &cal);
        assert!((pos.x - 10.0).abs() < 1e-5);
        assert!(pos.y.abs() < 1e-5);
    }
}
