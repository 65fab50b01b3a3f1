// src/pipeline/processing.rs
//
// The pipeline orchestrator. Owns the vehicle parameters, per-sensor update
// status, current ego motion, predictor track state and the odometry
// estimator; every piece of state lives on this value, nothing is global.

use thiserror::Error;
use tracing::debug;

use crate::math::seconds_to_microseconds;
use crate::pipeline::associate::{associate_detections, TrackState};
use crate::pipeline::classify::classify_detections;
use crate::pipeline::mapper::{map_corner_detections, map_front_detections};
use crate::pipeline::odometry::OdometryEstimator;
use crate::pipeline::ProcessingSettings;
use crate::types::{
    EnhancedDetections, EnhancedTrack, EnhancedTracks, OdometryEstimate, RawCornerDetections,
    RawFrontDetections, RawTrackFusion, SensorIndex, TrackStatus, Vec2, VehicleMotionState,
    VehicleParameters, SENSOR_COUNT, TRACK_SLOT_COUNT,
};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline used before initialize")]
    NotInitialized,
}

/// Per-sensor freshness bookkeeping. Diagnostic only; stale frames are still
/// processed.
#[derive(Debug, Clone, Copy, Default)]
struct SensorUpdateState {
    initialized: bool,
    timestamp_us: u64,
    consecutive_invalid: u32,
}

pub struct RadarPipeline {
    settings: ProcessingSettings,
    parameters: Option<VehicleParameters>,
    sensor_states: [SensorUpdateState; SENSOR_COUNT],
    tracks: Vec<TrackState>,
    tracks_timestamp_us: u64,
    motion_state: VehicleMotionState,
    has_external_motion_state: bool,
    odometry: OdometryEstimator,
    last_odometry: OdometryEstimate,
}

impl RadarPipeline {
    pub fn new(settings: ProcessingSettings) -> Self {
        Self {
            settings,
            parameters: None,
            sensor_states: [SensorUpdateState::default(); SENSOR_COUNT],
            tracks: Vec::new(),
            tracks_timestamp_us: 0,
            motion_state: VehicleMotionState::default(),
            has_external_motion_state: false,
            odometry: OdometryEstimator::new(settings.odometry),
            last_odometry: OdometryEstimate::default(),
        }
    }

    /// Bind the vehicle parameters and reset all per-run counters.
    pub fn initialize(&mut self, parameters: VehicleParameters) {
        self.parameters = Some(parameters);
        self.sensor_states = [SensorUpdateState::default(); SENSOR_COUNT];
        self.tracks.clear();
        self.tracks_timestamp_us = 0;
        self.odometry.reset();
        self.last_odometry = OdometryEstimate::default();
    }

    /// Caller-supplied ego motion. Once set, the odometry feedback loop no
    /// longer overwrites the motion state.
    pub fn update_vehicle_state(&mut self, state: VehicleMotionState) {
        self.motion_state = state;
        self.has_external_motion_state = true;
    }

    pub fn vehicle_parameters(&self) -> Option<&VehicleParameters> {
        self.parameters.as_ref()
    }

    pub fn process_corner_detections(
        &mut self,
        sensor: SensorIndex,
        timestamp_us: u64,
        input: &RawCornerDetections,
    ) -> Result<EnhancedDetections, PipelineError> {
        let Some(parameters) = self.parameters.as_ref() else {
            return Err(PipelineError::NotInitialized);
        };

        update_sensor_status(&mut self.sensor_states, sensor, input.header.timestamp_us);
        let mut output = map_corner_detections(input);

        let delay_us = seconds_to_microseconds(parameters.corner_hardware_delay_s);
        let observation_time_us = timestamp_us.saturating_sub(delay_us);

        let calibration = parameters.calibration(sensor);
        classify_detections(
            &self.settings.stationary,
            calibration,
            &self.motion_state,
            &mut output,
        );
        associate_detections(
            &self.settings.association,
            calibration,
            &self.motion_state,
            &mut self.tracks,
            self.tracks_timestamp_us,
            observation_time_us,
            &mut output,
        );

        self.run_odometry_feedback(sensor, &output);
        Ok(output)
    }

    pub fn process_front_detections(
        &mut self,
        timestamp_us: u64,
        input: &RawFrontDetections,
    ) -> Result<(EnhancedDetections, EnhancedDetections), PipelineError> {
        let Some(parameters) = self.parameters.as_ref() else {
            return Err(PipelineError::NotInitialized);
        };

        update_sensor_status(
            &mut self.sensor_states,
            SensorIndex::FrontShort,
            input.header.timestamp_us,
        );
        update_sensor_status(
            &mut self.sensor_states,
            SensorIndex::FrontLong,
            input.header.timestamp_us,
        );

        let (mut output_short, mut output_long) = map_front_detections(input);

        let delay_us = seconds_to_microseconds(parameters.front_center_hardware_delay_s);
        let observation_time_us = timestamp_us.saturating_sub(delay_us);

        for (sensor, output) in [
            (SensorIndex::FrontShort, &mut output_short),
            (SensorIndex::FrontLong, &mut output_long),
        ] {
            let calibration = parameters.calibration(sensor);
            classify_detections(
                &self.settings.stationary,
                calibration,
                &self.motion_state,
                output,
            );
            associate_detections(
                &self.settings.association,
                calibration,
                &self.motion_state,
                &mut self.tracks,
                self.tracks_timestamp_us,
                observation_time_us,
                output,
            );
        }

        self.run_odometry_feedback(SensorIndex::FrontShort, &output_short);
        Ok((output_short, output_long))
    }

    /// Produce enhanced tracks and refresh the predictor's track state. Slots
    /// with `Invalid` status are dropped.
    pub fn process_track_fusion(
        &mut self,
        timestamp_us: u64,
        input: &RawTrackFusion,
    ) -> EnhancedTracks {
        let mut output = EnhancedTracks {
            timestamp_us,
            tracks: Vec::new(),
        };
        self.tracks.clear();

        for i in 0..TRACK_SLOT_COUNT {
            let status = TrackStatus::from_raw(input.status[i]);
            if status == TrackStatus::Invalid {
                continue;
            }

            let track = EnhancedTrack {
                vcs_longitudinal_position: input.vcs_longitudinal_position[i],
                vcs_lateral_position: input.vcs_lateral_position[i],
                vcs_lateral_velocity: input.vcs_lateral_velocity[i],
                vcs_longitudinal_velocity: input.vcs_longitudinal_velocity[i],
                vcs_lateral_acceleration: input.vcs_lateral_acceleration[i],
                vcs_longitudinal_acceleration: input.vcs_longitudinal_acceleration[i],
                vcs_heading: input.vcs_heading[i],
                vcs_heading_rate: input.vcs_heading_rate[i],
                length: input.length[i],
                width: input.width[i],
                height: input.height[i],
                probability_of_detection: input.probability_of_detection[i],
                id: input.id[i],
                object_classification: input.object_classification[i],
                object_classification_confidence: input.object_classification_confidence[i],
                is_moving: input.moving_flag[i] != 0,
                is_stationary: input.stationary_flag[i] != 0,
                is_moveable: input.moveable_flag[i] != 0,
                is_vehicle: input.vehicle_flag[i] != 0,
                status,
            };

            self.tracks.push(TrackState {
                position: Vec2::new(track.vcs_longitudinal_position, track.vcs_lateral_position),
                velocity: Vec2::new(track.vcs_longitudinal_velocity, track.vcs_lateral_velocity),
                acceleration: Vec2::new(
                    track.vcs_longitudinal_acceleration,
                    track.vcs_lateral_acceleration,
                ),
                length: track.length,
                width: track.width,
                heading: track.vcs_heading,
                heading_rate: track.vcs_heading_rate,
                is_stationary: track.is_stationary,
                is_moveable: track.is_moveable,
                moving_votes: 0.0,
            });
            output.tracks.push(track);
        }

        self.tracks_timestamp_us = timestamp_us;
        output
    }

    /// Latest odometry estimate, or None while no valid estimate exists.
    pub fn latest_odometry(&self) -> Option<OdometryEstimate> {
        if self.last_odometry.valid {
            Some(self.last_odometry)
        } else {
            None
        }
    }

    pub fn motion_state(&self) -> &VehicleMotionState {
        &self.motion_state
    }

    /// Replace the internal ego motion with the latest odometry estimate
    /// unless the caller supplies vehicle state externally. The next frame's
    /// classifier sees the updated motion.
    fn run_odometry_feedback(&mut self, sensor: SensorIndex, output: &EnhancedDetections) {
        if self.has_external_motion_state {
            return;
        }
        let Some(parameters) = &self.parameters else {
            return;
        };
        let calibration = parameters.calibration(sensor);
        if self.odometry.process_detections(calibration, output) {
            self.last_odometry = *self.odometry.latest_estimate();
            self.motion_state.v_lon_mps = self.last_odometry.v_lon_mps;
            self.motion_state.v_lat_mps = self.last_odometry.v_lat_mps;
            self.motion_state.yaw_rate_rps = self.last_odometry.yaw_rate_rps;
            debug!(
                v_lon = self.motion_state.v_lon_mps,
                v_lat = self.motion_state.v_lat_mps,
                inliers = self.last_odometry.inlier_count,
                "odometry feedback updated ego motion"
            );
        }
    }
}

/// First observation initializes the sensor; a strictly newer timestamp
/// resets the invalid counter, anything else increments it.
fn update_sensor_status(
    states: &mut [SensorUpdateState; SENSOR_COUNT],
    sensor: SensorIndex,
    timestamp_us: u64,
) -> bool {
    let state = &mut states[sensor.as_index()];
    if !state.initialized {
        state.initialized = true;
        state.timestamp_us = timestamp_us;
        state.consecutive_invalid = 0;
        return true;
    }

    if timestamp_us > state.timestamp_us {
        state.timestamp_us = timestamp_us;
        state.consecutive_invalid = 0;
        return true;
    }

    state.consecutive_invalid += 1;
    false
}
