// src/playback.rs
//
// Capture playback: resolves and opens the capture file set, drives the
// frame merger through the processing pipeline and flattens the enhanced
// outputs into per-frame replay points and tracks for consumers.
//
// Replay points live in the map plane: x = lateral, y = longitudinal. The
// vehicle contour converts into the same plane for the virtual sensor ring.

use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::capture::{CaptureStream, FrameMerger, StreamFrame};
use crate::pipeline::{ProcessingSettings, RadarPipeline};
use crate::types::{
    flags, EnhancedDetections, EnhancedTracks, OdometryEstimate, RadarCalibration, SensorIndex,
    TrackObjectClass, Vec2, VehicleMotionState, VehicleParameters, CORNER_RETURN_COUNT,
};

const MIN_TRACK_EXTENT_M: f32 = 0.25;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no readable capture input files")]
    NoInputs,
}

// ============================================================================
// Replay output types
// ============================================================================

/// One flattened detection in the map plane, carrying its sensor metadata
/// and the unpacked per-return flags.
#[derive(Debug, Clone, Copy)]
pub struct RadarPoint {
    /// Lateral position in the map plane.
    pub x: f32,
    /// Longitudinal position in the map plane.
    pub y: f32,
    pub z: f32,
    pub range_m: f32,
    pub range_rate_mps: f32,
    pub range_rate_raw_mps: f32,
    pub azimuth_raw_rad: f32,
    pub azimuth_rad: f32,
    pub amplitude_dbsm: f32,
    pub longitudinal_offset_m: f32,
    pub lateral_offset_m: f32,
    pub motion_status: i8,
    pub sensor: SensorIndex,
    pub horizontal_fov_rad: f32,
    pub maximum_range_m: f32,
    pub azimuth_polarity: f32,
    pub boresight_angle_rad: f32,
    pub sensor_longitudinal_m: f32,
    pub sensor_lateral_m: f32,
    pub elevation_raw_rad: f32,
    pub fused_track_index: i32,
    pub is_valid: bool,
    pub is_super_resolution: bool,
    pub is_near_target: bool,
    pub is_host_vehicle_clutter: bool,
    pub is_multi_bounce: bool,
    pub is_stationary: bool,
    pub is_moveable: bool,
    pub is_static: bool,
    pub stationary_probability: f32,
}

/// One flattened track in ISO coordinates, with the extent floor and the
/// class-based height fallback applied.
#[derive(Debug, Clone, Copy)]
pub struct RadarTrack {
    /// (longitudinal, lateral) in ISO vehicle coordinates.
    pub iso_position: Vec2,
    /// (longitudinal, lateral) in ISO vehicle coordinates.
    pub iso_velocity: Vec2,
    pub length: f32,
    pub width: f32,
    pub height: f32,
    /// Heading in ISO coordinates, zero along +longitudinal.
    pub heading_rad: f32,
    pub heading_rate: f32,
    pub probability_of_detection: f32,
    pub id: i32,
    pub object_classification: u16,
    pub object_classification_confidence: u8,
    pub is_moving: bool,
    pub is_stationary: bool,
    pub is_moveable: bool,
    pub is_vehicle: bool,
}

/// One replayed instant: every stream that shared the merged timestamp.
#[derive(Debug, Clone, Default)]
pub struct RadarFrame {
    pub timestamp_us: u64,
    pub detections: Vec<RadarPoint>,
    pub tracks: Vec<RadarTrack>,
    /// Which streams contributed, e.g. `corner:front_left` or `tracks`.
    pub sources: Vec<String>,
    pub has_detections: bool,
    pub has_tracks: bool,
}

// ============================================================================
// Playback
// ============================================================================

pub struct RadarPlayback {
    parameters: VehicleParameters,
    pipeline: RadarPipeline,
    merger: FrameMerger,
}

impl RadarPlayback {
    /// Open a capture set. Relative filenames resolve against `data_root`;
    /// unreadable files are skipped with a warning and the open fails only
    /// when no stream could be opened at all.
    pub fn open(
        parameters: VehicleParameters,
        settings: ProcessingSettings,
        data_root: &Path,
        input_files: &[String],
    ) -> Result<Self, CaptureError> {
        let mut streams = Vec::new();
        for file in input_files {
            let mut path = PathBuf::from(file);
            if !path.is_absolute() {
                path = data_root.join(file);
            }
            match CaptureStream::open(&path) {
                Ok(stream) => streams.push(stream),
                Err(err) => warn!("failed to open capture file {}: {err}", path.display()),
            }
        }

        if streams.is_empty() {
            return Err(CaptureError::NoInputs);
        }
        info!("radar playback opened with {} streams", streams.len());

        let mut pipeline = RadarPipeline::new(settings);
        pipeline.initialize(parameters.clone());

        Ok(Self {
            parameters,
            pipeline,
            merger: FrameMerger::new(streams),
        })
    }

    /// Discover capture text files under a data root.
    pub fn find_capture_files(data_root: &Path) -> Vec<String> {
        let mut files = Vec::new();
        for entry in WalkDir::new(data_root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        info!("found {} capture files under {}", files.len(), data_root.display());
        files
    }

    pub fn vehicle_parameters(&self) -> &VehicleParameters {
        &self.parameters
    }

    /// Vehicle contour converted from ISO into the map plane.
    pub fn vehicle_contour_map_plane(&self) -> Vec<Vec2> {
        let dist_rear_axle = self.parameters.dist_rear_axle_to_front_bumper_m;
        self.parameters
            .contour_iso
            .iter()
            .map(|point| Vec2::new(-point.x, point.y - dist_rear_axle))
            .collect()
    }

    /// Forward caller-supplied ego motion to the pipeline, disabling the
    /// odometry feedback loop.
    pub fn update_vehicle_state(&mut self, state: VehicleMotionState) {
        self.pipeline.update_vehicle_state(state);
    }

    pub fn latest_odometry(&self) -> Option<OdometryEstimate> {
        self.pipeline.latest_odometry()
    }

    /// Replay the next merged instant through the pipeline. None at end of
    /// data.
    pub fn next_frame(&mut self) -> Option<RadarFrame> {
        let merged = self.merger.pull_next()?;

        let mut frame = RadarFrame {
            timestamp_us: merged.timestamp_us,
            ..RadarFrame::default()
        };

        for stream_frame in merged.frames {
            match stream_frame {
                StreamFrame::Corner(corner) => {
                    let sensor = corner.raw.sensor;
                    let output = match self.pipeline.process_corner_detections(
                        sensor,
                        corner.timestamp_us,
                        &corner.raw,
                    ) {
                        Ok(output) => output,
                        Err(err) => {
                            warn!("corner frame dropped: {err}");
                            continue;
                        }
                    };
                    let calibration = self.parameters.calibration(sensor);
                    let before = frame.detections.len();
                    append_enhanced_detections(
                        &output,
                        calibration,
                        sensor,
                        &corner.elevation_rad,
                        &mut frame.detections,
                    );
                    if frame.detections.len() > before {
                        frame.sources.push(format!("corner:{}", sensor.label()));
                        frame.has_detections = true;
                    }
                }
                StreamFrame::Front(front) => {
                    let (output_short, output_long) = match self
                        .pipeline
                        .process_front_detections(front.timestamp_us, &front.raw)
                    {
                        Ok(outputs) => outputs,
                        Err(err) => {
                            warn!("front frame dropped: {err}");
                            continue;
                        }
                    };

                    let midpoint = CORNER_RETURN_COUNT.min(front.elevation_rad.len());
                    let (short_elevation, long_elevation) = front.elevation_rad.split_at(midpoint);

                    for (sensor, output, elevation) in [
                        (SensorIndex::FrontShort, &output_short, short_elevation),
                        (SensorIndex::FrontLong, &output_long, long_elevation),
                    ] {
                        let calibration = self.parameters.calibration(sensor);
                        let before = frame.detections.len();
                        append_enhanced_detections(
                            output,
                            calibration,
                            sensor,
                            elevation,
                            &mut frame.detections,
                        );
                        if frame.detections.len() > before {
                            frame.sources.push(format!("front:{}", sensor.label()));
                            frame.has_detections = true;
                        }
                    }
                }
                StreamFrame::Tracks(tracks) => {
                    let output = self
                        .pipeline
                        .process_track_fusion(tracks.timestamp_us, &tracks.raw);
                    append_tracks(&output, &mut frame.tracks);
                    frame.sources.push("tracks".to_string());
                    frame.has_tracks = !frame.tracks.is_empty();
                }
            }
        }

        Some(frame)
    }

    /// Producer/consumer split: a reader thread fills a bounded channel with
    /// replayed frames; the channel closes at end of data. The pipeline stays
    /// owned by the reader thread, so only one thread ever touches it.
    pub fn into_channel(mut self, capacity: usize) -> (thread::JoinHandle<()>, Receiver<RadarFrame>) {
        let (sender, receiver) = bounded(capacity.max(1));
        let handle = thread::spawn(move || {
            while let Some(frame) = self.next_frame() {
                if sender.send(frame).is_err() {
                    // Consumer hung up; stop reading.
                    break;
                }
            }
        });
        (handle, receiver)
    }
}

/// Oriented 4-vertex ground footprint of a replay track in the map plane.
pub fn build_track_footprint(track: &RadarTrack) -> [Vec2; 4] {
    let half_length = track.length.max(0.1) * 0.5;
    let half_width = track.width.max(0.1) * 0.5;

    let center = Vec2::new(track.iso_position.y, track.iso_position.x);
    let heading = track.heading_rad;
    let forward = Vec2::new(heading.sin(), heading.cos());
    let right = Vec2::new(forward.y, -forward.x);

    [
        center + forward * half_length + right * half_width,
        center - forward * half_length + right * half_width,
        center - forward * half_length - right * half_width,
        center + forward * half_length - right * half_width,
    ]
}

/// Flatten one sensor's enhanced detections into replay points, skipping the
/// fully empty returns of the fixed-width frame.
fn append_enhanced_detections(
    data: &EnhancedDetections,
    calibration: &RadarCalibration,
    sensor: SensorIndex,
    elevation_rad: &[f32],
    out: &mut Vec<RadarPoint>,
) {
    for (i, det) in data.detections.iter().enumerate() {
        if det.flags == 0
            && det.range_m <= 0.0
            && det.longitudinal_offset_m == 0.0
            && det.lateral_offset_m == 0.0
        {
            continue;
        }

        let mut det_angle = det.azimuth_rad;
        if det_angle == 0.0 && det.azimuth_raw_rad != 0.0 {
            let azimuth_polarity = if data.header.azimuth_polarity == 0.0 {
                1.0
            } else {
                data.header.azimuth_polarity
            };
            det_angle = data.header.boresight_angle_rad + azimuth_polarity * det.azimuth_raw_rad;
        }

        let mut lateral = det.lateral_offset_m;
        let mut longitudinal = det.longitudinal_offset_m;
        if lateral == 0.0 && longitudinal == 0.0 && det.range_m > 0.0 {
            lateral = det.range_m * det_angle.sin();
            longitudinal = det.range_m * det_angle.cos();
        }

        if !lateral.is_finite() || !longitudinal.is_finite() {
            continue;
        }

        let elevation = elevation_rad.get(i).copied().unwrap_or(0.0);
        let mut z = det.elevation_raw_m;
        if z == 0.0 && elevation != 0.0 {
            z = calibration.vcs.height_m + det.range_m * elevation.sin();
        }

        out.push(RadarPoint {
            x: lateral,
            y: longitudinal,
            z,
            range_m: det.range_m,
            range_rate_mps: det.range_rate_mps,
            range_rate_raw_mps: det.range_rate_raw_mps,
            azimuth_raw_rad: det.azimuth_raw_rad,
            azimuth_rad: det.azimuth_rad,
            amplitude_dbsm: det.amplitude_dbsm,
            longitudinal_offset_m: det.longitudinal_offset_m,
            lateral_offset_m: det.lateral_offset_m,
            motion_status: det.motion_status,
            sensor,
            horizontal_fov_rad: data.header.horizontal_fov_rad,
            maximum_range_m: data.header.maximum_range_m,
            azimuth_polarity: data.header.azimuth_polarity,
            boresight_angle_rad: data.header.boresight_angle_rad,
            sensor_longitudinal_m: data.header.sensor_longitudinal_m,
            sensor_lateral_m: data.header.sensor_lateral_m,
            elevation_raw_rad: elevation,
            fused_track_index: det.fused_track_index,
            is_valid: det.flags & flags::VALID != 0,
            is_super_resolution: det.flags & flags::SUPER_RESOLUTION != 0,
            is_near_target: det.flags & flags::NEAR_TARGET != 0,
            is_host_vehicle_clutter: det.flags & flags::HOST_VEHICLE_CLUTTER != 0,
            is_multi_bounce: det.flags & flags::MULTI_BOUNCE != 0,
            is_stationary: det.is_stationary,
            is_moveable: det.is_moveable,
            is_static: det.is_static,
            stationary_probability: det.stationary_probability,
        });
    }
}

fn append_tracks(data: &EnhancedTracks, out: &mut Vec<RadarTrack>) {
    for track in &data.tracks {
        let mut height = track.height;
        if height == 0.0 {
            height = match TrackObjectClass::from_raw(track.object_classification) {
                TrackObjectClass::Car | TrackObjectClass::Motorcycle | TrackObjectClass::Bicycle => {
                    1.8
                }
                TrackObjectClass::Truck => 3.8,
                _ => 0.05,
            };
        }

        out.push(RadarTrack {
            iso_position: Vec2::new(track.vcs_longitudinal_position, track.vcs_lateral_position),
            iso_velocity: Vec2::new(track.vcs_longitudinal_velocity, track.vcs_lateral_velocity),
            length: track.length.max(MIN_TRACK_EXTENT_M),
            width: track.width.max(MIN_TRACK_EXTENT_M),
            height,
            heading_rad: track.vcs_heading,
            heading_rate: track.vcs_heading_rate,
            probability_of_detection: track.probability_of_detection,
            id: track.id,
            object_classification: track.object_classification,
            object_classification_confidence: track.object_classification_confidence,
            is_moving: track.is_moving,
            is_stationary: track.is_stationary,
            is_moveable: track.is_moveable,
            is_vehicle: track.is_vehicle,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleConfig;
    use crate::test_support::{
        build_corner_line, build_front_line, build_track_line, build_vehicle_config_ini,
    };
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, lines: &[String]) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn open_playback(dir: &Path, files: &[&str]) -> RadarPlayback {
        let parameters = VehicleConfig::from_ini_str(&build_vehicle_config_ini(1.5, true, false))
            .unwrap()
            .into_parameters();
        let files: Vec<String> = files.iter().map(|f| f.to_string()).collect();
        RadarPlayback::open(parameters, ProcessingSettings::default(), dir, &files).unwrap()
    }

    #[test]
    fn open_fails_when_no_file_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let parameters = VehicleConfig::from_ini_str(&build_vehicle_config_ini(1.5, true, false))
            .unwrap()
            .into_parameters();
        let result = RadarPlayback::open(
            parameters,
            ProcessingSettings::default(),
            dir.path(),
            &["missing.txt".to_string()],
        );
        assert!(matches!(result, Err(CaptureError::NoInputs)));
    }

    #[test]
    fn open_skips_missing_files_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "corner.txt", &[build_corner_line(100, 95, 0)]);

        let mut playback = open_playback(dir.path(), &["missing.txt", "corner.txt"]);
        let frame = playback.next_frame().expect("one frame");
        assert_eq!(frame.timestamp_us, 100);
    }

    #[test]
    fn co_timestamped_streams_replay_into_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "corner.txt", &[build_corner_line(100, 95, 0)]);
        write_file(dir.path(), "front.txt", &[build_front_line(100, 95)]);
        write_file(dir.path(), "tracks.txt", &[build_track_line(100)]);

        let mut playback =
            open_playback(dir.path(), &["corner.txt", "front.txt", "tracks.txt"]);

        let frame = playback.next_frame().expect("merged frame");
        assert_eq!(frame.timestamp_us, 100);
        assert!(frame.has_detections);
        assert!(frame.has_tracks);
        // Corner slot 0 plus front slots 0 and 64.
        assert_eq!(frame.detections.len(), 3);
        assert_eq!(frame.tracks.len(), 1);
        assert!(frame.sources.contains(&"corner:front_left".to_string()));
        assert!(frame.sources.contains(&"front:front_short".to_string()));
        assert!(frame.sources.contains(&"front:front_long".to_string()));
        assert!(frame.sources.contains(&"tracks".to_string()));

        assert!(playback.next_frame().is_none());
    }

    #[test]
    fn replay_points_carry_map_plane_positions_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "corner.txt", &[build_corner_line(100, 95, 0)]);

        let mut playback = open_playback(dir.path(), &["corner.txt"]);
        let frame = playback.next_frame().unwrap();

        let point = &frame.detections[0];
        // x = lateral offset, y = longitudinal offset.
        assert!((point.x - 1.0).abs() < 1e-5);
        assert!((point.y - 1.0).abs() < 1e-5);
        assert!(point.is_valid);
        assert!(!point.is_multi_bounce);
        assert_eq!(point.sensor, SensorIndex::FrontLeft);
        // z reconstructed from the elevation tail: height + range*sin(elev).
        let expected_z = 0.3 + 10.0 * 0.05f32.sin();
        assert!((point.z - expected_z).abs() < 1e-3);
    }

    #[test]
    fn replay_tracks_apply_extent_floor_and_height_default() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "tracks.txt", &[build_track_line(100)]);

        let mut playback = open_playback(dir.path(), &["tracks.txt"]);
        let frame = playback.next_frame().unwrap();

        let track = &frame.tracks[0];
        assert_eq!(track.id, 7);
        assert!((track.length - 4.0).abs() < 1e-5);
        assert!((track.width - 2.0).abs() < 1e-5);
        // The capture carries a height, so no class default applies.
        assert!((track.height - 1.6).abs() < 1e-5);
        assert!(track.is_vehicle);
    }

    #[test]
    fn track_footprint_is_heading_aligned() {
        let track = RadarTrack {
            iso_position: Vec2::new(10.0, 2.0),
            iso_velocity: Vec2::zeros(),
            length: 4.0,
            width: 2.0,
            height: 1.5,
            heading_rad: 0.0,
            heading_rate: 0.0,
            probability_of_detection: 1.0,
            id: 1,
            object_classification: 1,
            object_classification_confidence: 90,
            is_moving: true,
            is_stationary: false,
            is_moveable: true,
            is_vehicle: true,
        };

        let footprint = build_track_footprint(&track);
        // Map-plane center is (lateral, longitudinal) = (2, 10); zero heading
        // means forward is +longitudinal, so the footprint spans 2 m in x and
        // 4 m in y around the center.
        for corner in &footprint {
            assert!((corner.x - 2.0).abs() <= 1.0 + 1e-5);
            assert!((corner.y - 10.0).abs() <= 2.0 + 1e-5);
        }
        let min_y = footprint.iter().map(|c| c.y).fold(f32::INFINITY, f32::min);
        let max_y = footprint.iter().map(|c| c.y).fold(f32::NEG_INFINITY, f32::max);
        assert!((max_y - min_y - 4.0).abs() < 1e-4);
    }

    #[test]
    fn contour_converts_to_map_plane() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "corner.txt", &[build_corner_line(100, 95, 0)]);
        let playback = open_playback(dir.path(), &["corner.txt"]);

        let contour = playback.vehicle_contour_map_plane();
        // INI contour point "1.0,2.0" is stored ISO (2.0, 1.0); the map plane
        // flips the lateral axis and shifts by the rear-axle offset.
        assert_eq!(contour.len(), 3);
        assert!((contour[1].x + 2.0).abs() < 1e-5);
        assert!((contour[1].y - (1.0 - 1.5)).abs() < 1e-5);
    }

    #[test]
    fn bounded_channel_variant_delivers_all_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "corner.txt",
            &[
                build_corner_line(100, 95, 0),
                build_corner_line(200, 195, 0),
                build_corner_line(300, 295, 0),
            ],
        );

        let playback = open_playback(dir.path(), &["corner.txt"]);
        let (handle, receiver) = playback.into_channel(2);

        let timestamps: Vec<u64> = receiver.iter().map(|f| f.timestamp_us).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
        handle.join().unwrap();
    }

    #[test]
    fn find_capture_files_lists_txt_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "corner.txt", &[build_corner_line(100, 95, 0)]);
        write_file(dir.path(), "notes.md", &["notes".to_string()]);

        let files = RadarPlayback::find_capture_files(dir.path());
        assert_eq!(files, vec!["corner.txt".to_string()]);
    }
}
