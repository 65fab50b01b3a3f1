// src/pipeline/odometry.rs
//
// Doppler ego-motion estimation. Every usable detection contributes a
// (cos θ, sin θ, range rate) sample; RANSAC over two-sample hypotheses finds
// the largest consistent set, then a column-pivoted QR least-squares refit on
// the inliers yields the ego longitudinal/lateral velocity. Yaw rate is not
// estimated here and is always reported as zero.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{flags, EnhancedDetections, OdometryEstimate, RadarCalibration};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometrySettings {
    pub max_iterations: u32,
    pub inlier_threshold_mps: f32,
    pub min_inliers: u32,
    /// RNG seed for the RANSAC draw; fixed for deterministic replays.
    pub seed: u64,
}

impl Default for OdometrySettings {
    fn default() -> Self {
        Self {
            max_iterations: 120,
            inlier_threshold_mps: 0.35,
            min_inliers: 6,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    cos_angle: f32,
    sin_angle: f32,
    range_rate: f32,
}

fn predicted_range_rate(sample: &Sample, v_lon: f32, v_lat: f32) -> f32 {
    -(v_lon * sample.cos_angle + v_lat * sample.sin_angle)
}

/// Solve the 2x2 system of two samples; degenerate geometry (near-parallel
/// rays) is rejected.
fn solve_pair(a: &Sample, b: &Sample) -> Option<(f32, f32)> {
    let a11 = -a.cos_angle;
    let a12 = -a.sin_angle;
    let a21 = -b.cos_angle;
    let a22 = -b.sin_angle;
    let det = a11 * a22 - a12 * a21;
    if det.abs() < 1e-4 {
        return None;
    }
    let v_lon = (a.range_rate * a22 - a12 * b.range_rate) / det;
    let v_lat = (a11 * b.range_rate - a.range_rate * a21) / det;
    Some((v_lon, v_lat))
}

#[derive(Debug, Default)]
pub struct OdometryEstimator {
    settings: OdometrySettings,
    last_estimate: OdometryEstimate,
}

impl OdometryEstimator {
    pub fn new(settings: OdometrySettings) -> Self {
        Self {
            settings,
            last_estimate: OdometryEstimate::default(),
        }
    }

    pub fn reset(&mut self) {
        self.last_estimate = OdometryEstimate::default();
    }

    pub fn update_settings(&mut self, settings: OdometrySettings) {
        self.settings = settings;
    }

    /// Run the estimator over one sensor's enhanced detections. Returns true
    /// when a valid estimate was produced; with fewer than two samples no
    /// estimate is written at all.
    pub fn process_detections(
        &mut self,
        calibration: &RadarCalibration,
        detections: &EnhancedDetections,
    ) -> bool {
        let mut samples = Vec::with_capacity(detections.detections.len());
        for det in &detections.detections {
            if det.flags & flags::USABLE_MASK == 0 {
                continue;
            }
            if !det.range_rate_mps.is_finite() {
                continue;
            }
            let angle =
                (-det.azimuth_raw_rad * calibration.polarity) + calibration.iso.orientation_rad;
            samples.push(Sample {
                cos_angle: angle.cos(),
                sin_angle: angle.sin(),
                range_rate: det.range_rate_mps,
            });
        }

        if samples.len() < 2 {
            return false;
        }

        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let threshold = self.settings.inlier_threshold_mps.max(0.05);

        let mut best_v_lon = 0.0;
        let mut best_v_lat = 0.0;
        let mut best_inliers = 0u32;

        let iterations = self.settings.max_iterations.max(1);
        for _ in 0..iterations {
            let i = rng.gen_range(0..samples.len());
            let mut j = rng.gen_range(0..samples.len());
            while j == i {
                j = rng.gen_range(0..samples.len());
            }

            let Some((v_lon, v_lat)) = solve_pair(&samples[i], &samples[j]) else {
                continue;
            };

            let inliers = samples
                .iter()
                .filter(|s| (predicted_range_rate(s, v_lon, v_lat) - s.range_rate).abs() <= threshold)
                .count() as u32;

            if inliers > best_inliers {
                best_inliers = inliers;
                best_v_lon = v_lon;
                best_v_lat = v_lat;
            }
        }

        let use_inliers = best_inliers >= self.settings.min_inliers;
        let fit_samples: Vec<Sample> = if use_inliers {
            samples
                .iter()
                .filter(|s| {
                    (predicted_range_rate(s, best_v_lon, best_v_lat) - s.range_rate).abs()
                        <= threshold
                })
                .copied()
                .collect()
        } else {
            samples
        };

        if fit_samples.len() < 2 {
            return false;
        }

        let mut a = DMatrix::<f32>::zeros(fit_samples.len(), 2);
        let mut b = DVector::<f32>::zeros(fit_samples.len());
        for (idx, sample) in fit_samples.iter().enumerate() {
            a[(idx, 0)] = -sample.cos_angle;
            a[(idx, 1)] = -sample.sin_angle;
            b[idx] = sample.range_rate;
        }

        let Some(solution) = a.col_piv_qr().solve(&b) else {
            debug!("odometry least-squares solve failed");
            return false;
        };

        let fit_count = fit_samples.len() as u32;
        self.last_estimate.timestamp_us = detections.header.timestamp_us;
        self.last_estimate.v_lon_mps = solution[0];
        self.last_estimate.v_lat_mps = solution[1];
        self.last_estimate.yaw_rate_rps = 0.0;
        self.last_estimate.inlier_count = if use_inliers { fit_count } else { best_inliers };
        self.last_estimate.valid = use_inliers;

        self.last_estimate.covariance = [0.0; 9];
        let velocity_var = if use_inliers {
            1.0 / fit_count as f32
        } else {
            1.0
        };
        self.last_estimate.covariance[0] = velocity_var;
        self.last_estimate.covariance[4] = velocity_var;
        self.last_estimate.covariance[8] = 1.0;

        self.last_estimate.valid
    }

    /// Last estimate, valid or not. Check the `valid` flag.
    pub fn latest_estimate(&self) -> &OdometryEstimate {
        &self.last_estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnhancedDetection, RadarCalibration};
    use std::f32::consts::FRAC_PI_2;

    fn detections_from(angles_and_rates: &[(f32, f32)]) -> EnhancedDetections {
        let mut detections = EnhancedDetections::default();
        detections.header.timestamp_us = 1234;
        detections.detections = angles_and_rates
            .iter()
            .map(|&(azimuth_raw_rad, range_rate_mps)| EnhancedDetection {
                azimuth_raw_rad,
                range_rate_mps,
                flags: flags::VALID,
                ..EnhancedDetection::default()
            })
            .collect();
        detections
    }

    #[test]
    fn rejects_insufficient_samples() {
        let mut estimator = OdometryEstimator::new(OdometrySettings::default());
        let calibration = RadarCalibration::default();

        let detections = detections_from(&[(0.0, -1.0)]);
        assert!(!estimator.process_detections(&calibration, &detections));
        assert!(!estimator.latest_estimate().valid);
        assert_eq!(estimator.latest_estimate().inlier_count, 0);
    }

    #[test]
    fn estimates_velocity_from_perpendicular_detections() {
        let settings = OdometrySettings {
            max_iterations: 10,
            min_inliers: 2,
            inlier_threshold_mps: 0.2,
            ..OdometrySettings::default()
        };
        let mut estimator = OdometryEstimator::new(settings);
        let calibration = RadarCalibration::default();

        let v_lon = 5.0f32;
        let v_lat = -2.0f32;
        let detections = detections_from(&[(0.0, -v_lon), (FRAC_PI_2, -v_lat)]);

        assert!(estimator.process_detections(&calibration, &detections));
        let estimate = estimator.latest_estimate();
        assert!(estimate.valid);
        assert!((estimate.v_lon_mps - v_lon).abs() < 1e-2);
        assert!((estimate.v_lat_mps.abs() - v_lat.abs()).abs() < 1e-2);
        assert_eq!(estimate.yaw_rate_rps, 0.0);
        assert_eq!(estimate.timestamp_us, 1234);
        assert!(estimate.inlier_count >= 2);
    }

    #[test]
    fn below_min_inliers_reports_invalid_diagnostic_estimate() {
        let settings = OdometrySettings {
            min_inliers: 6,
            ..OdometrySettings::default()
        };
        let mut estimator = OdometryEstimator::new(settings);
        let calibration = RadarCalibration::default();

        // Only three consistent samples, below the six-inlier requirement.
        let detections = detections_from(&[(0.0, -5.0), (FRAC_PI_2, 2.0), (0.5, -4.5)]);

        assert!(!estimator.process_detections(&calibration, &detections));
        let estimate = estimator.latest_estimate();
        assert!(!estimate.valid);
        // The diagnostic refit ran over all samples.
        assert_eq!(estimate.covariance[0], 1.0);
        assert_eq!(estimate.covariance[8], 1.0);
    }

    #[test]
    fn valid_estimate_satisfies_min_inlier_invariant() {
        let settings = OdometrySettings {
            min_inliers: 6,
            ..OdometrySettings::default()
        };
        let mut estimator = OdometryEstimator::new(settings);
        let calibration = RadarCalibration::default();

        let v_lon = 8.0f32;
        // Eight consistent samples spread over the field of view.
        let samples: Vec<(f32, f32)> = (0..8)
            .map(|i| {
                let angle = -0.7 + 0.2 * i as f32;
                // The sample angle is -azimuth_raw for unit polarity.
                (-angle, -v_lon * angle.cos())
            })
            .collect();
        let detections = detections_from(&samples);

        assert!(estimator.process_detections(&calibration, &detections));
        let estimate = estimator.latest_estimate();
        assert!(estimate.valid);
        assert!(estimate.inlier_count >= 6);
        assert!((estimate.v_lon_mps - v_lon).abs() < 0.1);
        assert!((estimate.covariance[0] - 1.0 / estimate.inlier_count as f32).abs() < 1e-6);
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let settings = OdometrySettings::default();
        let calibration = RadarCalibration::default();
        let samples: Vec<(f32, f32)> = (0..10)
            .map(|i| {
                let angle = -0.9 + 0.2 * i as f32;
                let noise = if i % 2 == 0 { 0.01 } else { -0.01 };
                (-angle, -6.0 * angle.cos() + noise)
            })
            .collect();
        let detections = detections_from(&samples);

        let mut first = OdometryEstimator::new(settings);
        let mut second = OdometryEstimator::new(settings);
        first.process_detections(&calibration, &detections);
        second.process_detections(&calibration, &detections);

        assert_eq!(
            first.latest_estimate().v_lon_mps,
            second.latest_estimate().v_lon_mps
        );
        assert_eq!(
            first.latest_estimate().inlier_count,
            second.latest_estimate().inlier_count
        );
    }

    #[test]
    fn ignores_invalid_and_non_finite_returns() {
        let settings = OdometrySettings {
            min_inliers: 2,
            ..OdometrySettings::default()
        };
        let mut estimator = OdometryEstimator::new(settings);
        let calibration = RadarCalibration::default();

        let mut detections = detections_from(&[(0.0, -5.0), (FRAC_PI_2, 2.0)]);
        detections.detections.push(EnhancedDetection {
            azimuth_raw_rad: 0.3,
            range_rate_mps: f32::NAN,
            flags: flags::VALID,
            ..EnhancedDetection::default()
        });
        detections.detections.push(EnhancedDetection {
            azimuth_raw_rad: 0.3,
            range_rate_mps: 50.0,
            flags: 0,
            ..EnhancedDetection::default()
        });

        assert!(estimator.process_detections(&calibration, &detections));
        // Only the two usable samples contribute.
        assert_eq!(estimator.latest_estimate().inlier_count, 2);
    }
}
