// src/types.rs

use serde::{Deserialize, Serialize};

pub type Vec2 = nalgebra::Vector2<f32>;

pub const CORNER_RETURN_COUNT: usize = 64;
pub const FRONT_RETURN_COUNT: usize = 128;
pub const TRACK_SLOT_COUNT: usize = 96;
pub const SENSOR_COUNT: usize = 6;

// ============================================================================
// Sensor roles
// ============================================================================

/// Mounting role of a radar in the capture set. The numeric values match the
/// role column of the corner capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorIndex {
    FrontLeft = 0,
    FrontRight = 1,
    RearLeft = 2,
    RearRight = 3,
    FrontShort = 4,
    FrontLong = 5,
}

impl SensorIndex {
    pub fn from_raw(value: i64) -> Option<Self> {
        match value {
            0 => Some(SensorIndex::FrontLeft),
            1 => Some(SensorIndex::FrontRight),
            2 => Some(SensorIndex::RearLeft),
            3 => Some(SensorIndex::RearRight),
            4 => Some(SensorIndex::FrontShort),
            5 => Some(SensorIndex::FrontLong),
            _ => None,
        }
    }

    pub fn as_index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorIndex::FrontLeft => "front_left",
            SensorIndex::FrontRight => "front_right",
            SensorIndex::RearLeft => "rear_left",
            SensorIndex::RearRight => "rear_right",
            SensorIndex::FrontShort => "front_short",
            SensorIndex::FrontLong => "front_long",
        }
    }
}

impl std::fmt::Display for SensorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Track status and classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    Invalid = 0,
    Merged = 1,
    New = 2,
    NewCoasted = 3,
    NewUpdated = 4,
    Updated = 5,
    Coasted = 6,
}

impl TrackStatus {
    pub fn from_raw(value: u8) -> Self {
        match value {
            1 => TrackStatus::Merged,
            2 => TrackStatus::New,
            3 => TrackStatus::NewCoasted,
            4 => TrackStatus::NewUpdated,
            5 => TrackStatus::Updated,
            6 => TrackStatus::Coasted,
            _ => TrackStatus::Invalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackObjectClass {
    Unknown = 0,
    Car = 1,
    Motorcycle = 2,
    Truck = 3,
    Bicycle = 9,
    Pedestrian = 10,
    Animal = 12,
}

impl TrackObjectClass {
    pub fn from_raw(value: u16) -> Self {
        match value {
            1 => TrackObjectClass::Car,
            2 => TrackObjectClass::Motorcycle,
            3 => TrackObjectClass::Truck,
            9 => TrackObjectClass::Bicycle,
            10 => TrackObjectClass::Pedestrian,
            12 => TrackObjectClass::Animal,
            _ => TrackObjectClass::Unknown,
        }
    }
}

// ============================================================================
// Detection flags
// ============================================================================

/// Bit positions of the packed per-detection flags.
pub mod flags {
    pub const VALID: u8 = 1 << 0;
    pub const SUPER_RESOLUTION: u8 = 1 << 1;
    pub const NEAR_TARGET: u8 = 1 << 2;
    pub const HOST_VEHICLE_CLUTTER: u8 = 1 << 3;
    pub const MULTI_BOUNCE: u8 = 1 << 4;

    /// Mask of the flags that mark a return as usable downstream.
    pub const USABLE_MASK: u8 = VALID | SUPER_RESOLUTION;
}

pub fn pack_detection_flags(
    valid: u8,
    super_resolution: u8,
    near_target: u8,
    host_vehicle_clutter: u8,
    multi_bounce: u8,
) -> u8 {
    (valid != 0) as u8
        | (((super_resolution != 0) as u8) << 1)
        | (((near_target != 0) as u8) << 2)
        | (((host_vehicle_clutter != 0) as u8) << 3)
        | (((multi_bounce != 0) as u8) << 4)
}

// ============================================================================
// Calibration and vehicle parameters
// ============================================================================

/// Sensor pose in one coordinate convention (VCS or ISO).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RadarPose {
    pub longitudinal_m: f32,
    pub lateral_m: f32,
    pub height_m: f32,
    pub orientation_rad: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarCalibration {
    pub vcs: RadarPose,
    pub iso: RadarPose,
    /// Sign normalizing the sensor's raw azimuth convention.
    pub polarity: f32,
    pub range_rate_accuracy_mps: f32,
    pub azimuth_accuracy_rad: f32,
    pub horizontal_fov_rad: f32,
}

impl Default for RadarCalibration {
    fn default() -> Self {
        Self {
            vcs: RadarPose::default(),
            iso: RadarPose::default(),
            polarity: 1.0,
            range_rate_accuracy_mps: 0.0,
            azimuth_accuracy_rad: 0.0,
            horizontal_fov_rad: 0.0,
        }
    }
}

/// Immutable per-run vehicle description loaded from the vehicle INI.
#[derive(Debug, Clone, Default)]
pub struct VehicleParameters {
    pub dist_rear_axle_to_front_bumper_m: f32,
    pub corner_hardware_delay_s: f32,
    pub front_center_hardware_delay_s: f32,
    pub radar_calibrations: [RadarCalibration; SENSOR_COUNT],
    /// Closed vehicle contour in the ISO frame.
    pub contour_iso: Vec<Vec2>,
}

impl VehicleParameters {
    pub fn calibration(&self, sensor: SensorIndex) -> &RadarCalibration {
        &self.radar_calibrations[sensor.as_index()]
    }
}

// ============================================================================
// Raw capture frames
// ============================================================================

/// Shared per-line header of the detection streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDetectionsHeader {
    pub timestamp_us: u64,
    pub horizontal_fov_rad: f32,
    pub maximum_range_m: f32,
    pub azimuth_polarity: f32,
    pub boresight_angle_rad: f32,
    pub sensor_longitudinal_m: f32,
    pub sensor_lateral_m: f32,
}

#[derive(Debug, Clone)]
pub struct RawCornerDetections {
    pub sensor: SensorIndex,
    pub header: RawDetectionsHeader,
    pub range_m: [f32; CORNER_RETURN_COUNT],
    pub range_rate_mps: [f32; CORNER_RETURN_COUNT],
    pub range_rate_raw_mps: [f32; CORNER_RETURN_COUNT],
    pub azimuth_raw_rad: [f32; CORNER_RETURN_COUNT],
    pub azimuth_rad: [f32; CORNER_RETURN_COUNT],
    pub amplitude_dbsm: [f32; CORNER_RETURN_COUNT],
    pub longitudinal_offset_m: [f32; CORNER_RETURN_COUNT],
    pub lateral_offset_m: [f32; CORNER_RETURN_COUNT],
    pub motion_status: [i8; CORNER_RETURN_COUNT],
    pub valid: [u8; CORNER_RETURN_COUNT],
    pub super_resolution: [u8; CORNER_RETURN_COUNT],
    pub near_target: [u8; CORNER_RETURN_COUNT],
    pub host_vehicle_clutter: [u8; CORNER_RETURN_COUNT],
    pub multi_bounce: [u8; CORNER_RETURN_COUNT],
}

impl Default for RawCornerDetections {
    fn default() -> Self {
        Self {
            sensor: SensorIndex::FrontLeft,
            header: RawDetectionsHeader::default(),
            range_m: [0.0; CORNER_RETURN_COUNT],
            range_rate_mps: [0.0; CORNER_RETURN_COUNT],
            range_rate_raw_mps: [0.0; CORNER_RETURN_COUNT],
            azimuth_raw_rad: [0.0; CORNER_RETURN_COUNT],
            azimuth_rad: [0.0; CORNER_RETURN_COUNT],
            amplitude_dbsm: [0.0; CORNER_RETURN_COUNT],
            longitudinal_offset_m: [0.0; CORNER_RETURN_COUNT],
            lateral_offset_m: [0.0; CORNER_RETURN_COUNT],
            motion_status: [0; CORNER_RETURN_COUNT],
            valid: [0; CORNER_RETURN_COUNT],
            super_resolution: [0; CORNER_RETURN_COUNT],
            near_target: [0; CORNER_RETURN_COUNT],
            host_vehicle_clutter: [0; CORNER_RETURN_COUNT],
            multi_bounce: [0; CORNER_RETURN_COUNT],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawFrontDetections {
    pub header: RawDetectionsHeader,
    pub range_m: [f32; FRONT_RETURN_COUNT],
    pub range_rate_mps: [f32; FRONT_RETURN_COUNT],
    pub range_rate_raw_mps: [f32; FRONT_RETURN_COUNT],
    pub azimuth_raw_rad: [f32; FRONT_RETURN_COUNT],
    pub azimuth_rad: [f32; FRONT_RETURN_COUNT],
    pub amplitude_dbsm: [f32; FRONT_RETURN_COUNT],
    pub longitudinal_offset_m: [f32; FRONT_RETURN_COUNT],
    pub lateral_offset_m: [f32; FRONT_RETURN_COUNT],
    pub motion_status: [i8; FRONT_RETURN_COUNT],
    pub valid: [u8; FRONT_RETURN_COUNT],
    pub super_resolution: [u8; FRONT_RETURN_COUNT],
    pub near_target: [u8; FRONT_RETURN_COUNT],
    pub host_vehicle_clutter: [u8; FRONT_RETURN_COUNT],
    pub multi_bounce: [u8; FRONT_RETURN_COUNT],
}

impl Default for RawFrontDetections {
    fn default() -> Self {
        Self {
            header: RawDetectionsHeader::default(),
            range_m: [0.0; FRONT_RETURN_COUNT],
            range_rate_mps: [0.0; FRONT_RETURN_COUNT],
            range_rate_raw_mps: [0.0; FRONT_RETURN_COUNT],
            azimuth_raw_rad: [0.0; FRONT_RETURN_COUNT],
            azimuth_rad: [0.0; FRONT_RETURN_COUNT],
            amplitude_dbsm: [0.0; FRONT_RETURN_COUNT],
            longitudinal_offset_m: [0.0; FRONT_RETURN_COUNT],
            lateral_offset_m: [0.0; FRONT_RETURN_COUNT],
            motion_status: [0; FRONT_RETURN_COUNT],
            valid: [0; FRONT_RETURN_COUNT],
            super_resolution: [0; FRONT_RETURN_COUNT],
            near_target: [0; FRONT_RETURN_COUNT],
            host_vehicle_clutter: [0; FRONT_RETURN_COUNT],
            multi_bounce: [0; FRONT_RETURN_COUNT],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawTrackFusion {
    pub timestamp_us: u64,
    pub vision_timestamp_us: u64,
    pub fusion_timestamp_us: u64,
    pub fusion_index: u32,
    pub image_frame_index: u32,
    pub vcs_longitudinal_position: [f32; TRACK_SLOT_COUNT],
    pub vcs_lateral_position: [f32; TRACK_SLOT_COUNT],
    pub length: [f32; TRACK_SLOT_COUNT],
    pub width: [f32; TRACK_SLOT_COUNT],
    pub height: [f32; TRACK_SLOT_COUNT],
    pub probability_of_detection: [f32; TRACK_SLOT_COUNT],
    pub id: [i32; TRACK_SLOT_COUNT],
    pub object_classification: [u16; TRACK_SLOT_COUNT],
    pub object_classification_confidence: [u8; TRACK_SLOT_COUNT],
    pub status: [u8; TRACK_SLOT_COUNT],
    pub vcs_lateral_velocity: [f32; TRACK_SLOT_COUNT],
    pub vcs_longitudinal_velocity: [f32; TRACK_SLOT_COUNT],
    pub vcs_lateral_acceleration: [f32; TRACK_SLOT_COUNT],
    pub vcs_longitudinal_acceleration: [f32; TRACK_SLOT_COUNT],
    pub vcs_heading: [f32; TRACK_SLOT_COUNT],
    pub vcs_heading_rate: [f32; TRACK_SLOT_COUNT],
    pub moving_flag: [u8; TRACK_SLOT_COUNT],
    pub stationary_flag: [u8; TRACK_SLOT_COUNT],
    pub moveable_flag: [u8; TRACK_SLOT_COUNT],
    pub vehicle_flag: [u8; TRACK_SLOT_COUNT],
}

impl Default for RawTrackFusion {
    fn default() -> Self {
        Self {
            timestamp_us: 0,
            vision_timestamp_us: 0,
            fusion_timestamp_us: 0,
            fusion_index: 0,
            image_frame_index: 0,
            vcs_longitudinal_position: [0.0; TRACK_SLOT_COUNT],
            vcs_lateral_position: [0.0; TRACK_SLOT_COUNT],
            length: [0.0; TRACK_SLOT_COUNT],
            width: [0.0; TRACK_SLOT_COUNT],
            height: [0.0; TRACK_SLOT_COUNT],
            probability_of_detection: [0.0; TRACK_SLOT_COUNT],
            id: [0; TRACK_SLOT_COUNT],
            object_classification: [0; TRACK_SLOT_COUNT],
            object_classification_confidence: [0; TRACK_SLOT_COUNT],
            status: [0; TRACK_SLOT_COUNT],
            vcs_lateral_velocity: [0.0; TRACK_SLOT_COUNT],
            vcs_longitudinal_velocity: [0.0; TRACK_SLOT_COUNT],
            vcs_lateral_acceleration: [0.0; TRACK_SLOT_COUNT],
            vcs_longitudinal_acceleration: [0.0; TRACK_SLOT_COUNT],
            vcs_heading: [0.0; TRACK_SLOT_COUNT],
            vcs_heading_rate: [0.0; TRACK_SLOT_COUNT],
            moving_flag: [0; TRACK_SLOT_COUNT],
            stationary_flag: [0; TRACK_SLOT_COUNT],
            moveable_flag: [0; TRACK_SLOT_COUNT],
            vehicle_flag: [0; TRACK_SLOT_COUNT],
        }
    }
}

// ============================================================================
// Enhanced frames
// ============================================================================

/// One radar return after mapping, classification and association.
#[derive(Debug, Clone, Copy)]
pub struct EnhancedDetection {
    pub range_m: f32,
    pub range_rate_mps: f32,
    pub range_rate_raw_mps: f32,
    pub azimuth_raw_rad: f32,
    pub azimuth_rad: f32,
    pub amplitude_dbsm: f32,
    pub longitudinal_offset_m: f32,
    pub lateral_offset_m: f32,
    pub motion_status: i8,
    pub flags: u8,
    /// Index into the latest enhanced track set, -1 when unassociated.
    pub fused_track_index: i32,
    pub is_stationary: bool,
    pub is_moveable: bool,
    pub is_static: bool,
    pub stationary_probability: f32,
    pub elevation_raw_m: f32,
}

impl Default for EnhancedDetection {
    fn default() -> Self {
        Self {
            range_m: 0.0,
            range_rate_mps: 0.0,
            range_rate_raw_mps: 0.0,
            azimuth_raw_rad: 0.0,
            azimuth_rad: 0.0,
            amplitude_dbsm: 0.0,
            longitudinal_offset_m: 0.0,
            lateral_offset_m: 0.0,
            motion_status: -1,
            flags: 0,
            fused_track_index: -1,
            is_stationary: false,
            is_moveable: false,
            is_static: false,
            stationary_probability: 0.0,
            elevation_raw_m: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnhancedDetections {
    pub header: RawDetectionsHeader,
    pub detections: Vec<EnhancedDetection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhancedTrack {
    pub vcs_longitudinal_position: f32,
    pub vcs_lateral_position: f32,
    pub vcs_lateral_velocity: f32,
    pub vcs_longitudinal_velocity: f32,
    pub vcs_lateral_acceleration: f32,
    pub vcs_longitudinal_acceleration: f32,
    pub vcs_heading: f32,
    pub vcs_heading_rate: f32,
    pub length: f32,
    pub width: f32,
    pub height: f32,
    pub probability_of_detection: f32,
    pub id: i32,
    pub object_classification: u16,
    pub object_classification_confidence: u8,
    pub is_moving: bool,
    pub is_stationary: bool,
    pub is_moveable: bool,
    pub is_vehicle: bool,
    pub status: TrackStatus,
}

impl Default for EnhancedTrack {
    fn default() -> Self {
        Self {
            vcs_longitudinal_position: 0.0,
            vcs_lateral_position: 0.0,
            vcs_lateral_velocity: 0.0,
            vcs_longitudinal_velocity: 0.0,
            vcs_lateral_acceleration: 0.0,
            vcs_longitudinal_acceleration: 0.0,
            vcs_heading: 0.0,
            vcs_heading_rate: 0.0,
            length: 0.0,
            width: 0.0,
            height: 0.0,
            probability_of_detection: 0.0,
            id: -1,
            object_classification: 0,
            object_classification_confidence: 0,
            is_moving: false,
            is_stationary: false,
            is_moveable: false,
            is_vehicle: false,
            status: TrackStatus::Invalid,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnhancedTracks {
    pub timestamp_us: u64,
    pub tracks: Vec<EnhancedTrack>,
}

// ============================================================================
// Ego motion and odometry
// ============================================================================

/// Ego motion the classifier and associator work against. Either supplied by
/// the caller or fed back from the Doppler odometry estimate.
#[derive(Debug, Clone, Copy)]
pub struct VehicleMotionState {
    pub v_lon_mps: f32,
    pub v_lat_mps: f32,
    pub yaw_rate_rps: f32,
    pub v_lon_variance: f32,
    pub v_lat_variance: f32,
    pub yaw_rate_variance: f32,
}

impl Default for VehicleMotionState {
    fn default() -> Self {
        Self {
            v_lon_mps: 0.0,
            v_lat_mps: 0.0,
            yaw_rate_rps: 0.0,
            v_lon_variance: 0.1,
            v_lat_variance: 0.1,
            yaw_rate_variance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OdometryEstimate {
    pub timestamp_us: u64,
    pub v_lon_mps: f32,
    pub v_lat_mps: f32,
    pub yaw_rate_rps: f32,
    /// Row-major 3x3 covariance over (v_lon, v_lat, yaw_rate).
    pub covariance: [f32; 9],
    pub inlier_count: u32,
    pub valid: bool,
}

impl Default for OdometryEstimate {
    fn default() -> Self {
        Self {
            timestamp_us: 0,
            v_lon_mps: 0.0,
            v_lat_mps: 0.0,
            yaw_rate_rps: 0.0,
            covariance: [0.0; 9],
            inlier_count: 0,
            valid: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_flag_bits_in_declared_order() {
        assert_eq!(pack_detection_flags(1, 0, 0, 0, 0), flags::VALID);
        assert_eq!(pack_detection_flags(0, 1, 0, 0, 0), flags::SUPER_RESOLUTION);
        assert_eq!(pack_detection_flags(0, 0, 1, 0, 0), flags::NEAR_TARGET);
        assert_eq!(
            pack_detection_flags(0, 0, 0, 1, 0),
            flags::HOST_VEHICLE_CLUTTER
        );
        assert_eq!(pack_detection_flags(0, 0, 0, 0, 1), flags::MULTI_BOUNCE);
        assert_eq!(pack_detection_flags(1, 1, 1, 1, 1), 0b1_1111);
        // Any nonzero input counts as set, matching the capture encoding.
        assert_eq!(pack_detection_flags(3, 0, 0, 0, 0), flags::VALID);
    }

    #[test]
    fn sensor_index_round_trips_through_raw() {
        for raw in 0..6 {
            let sensor = SensorIndex::from_raw(raw).unwrap();
            assert_eq!(sensor.as_index() as i64, raw);
        }
        assert!(SensorIndex::from_raw(6).is_none());
        assert!(SensorIndex::from_raw(-1).is_none());
    }

    #[test]
    fn track_status_from_raw_maps_unknown_to_invalid() {
        assert_eq!(TrackStatus::from_raw(5), TrackStatus::Updated);
        assert_eq!(TrackStatus::from_raw(0), TrackStatus::Invalid);
        assert_eq!(TrackStatus::from_raw(42), TrackStatus::Invalid);
    }
}
