// src/capture/reader.rs
//
// Per-stream capture line parsing. Each line is one frame: whitespace
// separated ASCII numbers in a fixed schema per stream type. A malformed
// line is a recoverable fault: the reader warns, skips it and tries the next
// line. Non-monotonic timestamps are logged and accepted.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::SplitWhitespace;

use tracing::{info, warn};

use crate::types::{
    RawCornerDetections, RawFrontDetections, RawTrackFusion, SensorIndex, CORNER_RETURN_COUNT,
    FRONT_RETURN_COUNT, TRACK_SLOT_COUNT,
};

// ============================================================================
// Token cursor
// ============================================================================

struct Tokens<'a> {
    iter: SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            iter: line.split_whitespace(),
        }
    }

    fn next_f64(&mut self) -> Option<f64> {
        self.iter.next()?.parse().ok()
    }

    fn next_f32(&mut self) -> Option<f32> {
        self.next_f64().map(|v| v as f32)
    }

    fn next_u64(&mut self) -> Option<u64> {
        self.next_f64().map(|v| v as u64)
    }

    fn next_i64(&mut self) -> Option<i64> {
        self.next_f64().map(|v| v as i64)
    }
}

// ============================================================================
// Parsed frames
// ============================================================================

/// Corner frame: raw detections plus the elevation tail riding alongside.
/// `timestamp_us` is the merge key (the line's outer timestamp); the header
/// keeps the sensor-internal one.
#[derive(Debug, Clone)]
pub struct CornerFrame {
    pub timestamp_us: u64,
    pub raw: RawCornerDetections,
    pub elevation_rad: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct FrontFrame {
    pub timestamp_us: u64,
    pub raw: RawFrontDetections,
    pub elevation_rad: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct TrackFrame {
    pub timestamp_us: u64,
    pub raw: RawTrackFusion,
}

#[derive(Debug, Clone)]
pub enum StreamFrame {
    Corner(CornerFrame),
    Front(FrontFrame),
    Tracks(TrackFrame),
}

impl StreamFrame {
    pub fn timestamp_us(&self) -> u64 {
        match self {
            StreamFrame::Corner(frame) => frame.timestamp_us,
            StreamFrame::Front(frame) => frame.timestamp_us,
            StreamFrame::Tracks(frame) => frame.timestamp_us,
        }
    }
}

/// Stream type, chosen from the capture file name: `track` wins over
/// `front`, anything else is a corner stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Corner,
    Front,
    Tracks,
}

impl StreamKind {
    pub fn classify(file_name: &str) -> Self {
        let lower = file_name.to_lowercase();
        if lower.contains("track") {
            StreamKind::Tracks
        } else if lower.contains("front") {
            StreamKind::Front
        } else {
            StreamKind::Corner
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Corner => "corner",
            StreamKind::Front => "front",
            StreamKind::Tracks => "tracks",
        }
    }
}

// ============================================================================
// Line parsers
// ============================================================================

struct DetectionsHeaderFields {
    role: i64,
    timestamp_out: u64,
    timestamp_in: u64,
    horizontal_fov_rad: f32,
    maximum_range_m: f32,
    azimuth_polarity: f32,
    boresight_angle_rad: f32,
    sensor_longitudinal_m: f32,
    sensor_lateral_m: f32,
}

fn parse_detections_header(tokens: &mut Tokens<'_>) -> Option<DetectionsHeaderFields> {
    Some(DetectionsHeaderFields {
        role: tokens.next_i64()?,
        timestamp_out: tokens.next_u64()?,
        timestamp_in: tokens.next_u64()?,
        horizontal_fov_rad: tokens.next_f32()?,
        maximum_range_m: tokens.next_f32()?,
        azimuth_polarity: tokens.next_f32()?,
        boresight_angle_rad: tokens.next_f32()?,
        sensor_longitudinal_m: tokens.next_f32()?,
        sensor_lateral_m: tokens.next_f32()?,
    })
}

/// Consume the look-type/scan-type/look-index block and the optional
/// elevation tail. The three look tokens are parsed and discarded; their
/// meaning is unknown from the capture schema, but consuming them keeps the
/// tail aligned.
fn parse_elevation_tail(tokens: &mut Tokens<'_>, count: usize) -> Vec<f32> {
    let _ = tokens.next_f64();
    let _ = tokens.next_f64();
    let _ = tokens.next_f64();

    let mut elevation = vec![0.0f32; count];
    for slot in elevation.iter_mut() {
        match tokens.next_f32() {
            Some(value) => *slot = value,
            None => break,
        }
    }
    elevation
}

pub fn parse_corner_line(line: &str) -> Option<CornerFrame> {
    let mut tokens = Tokens::new(line);
    let header = parse_detections_header(&mut tokens)?;

    let mut raw = RawCornerDetections {
        sensor: SensorIndex::from_raw(header.role)?,
        ..RawCornerDetections::default()
    };
    raw.header.timestamp_us = header.timestamp_in;
    raw.header.horizontal_fov_rad = header.horizontal_fov_rad;
    raw.header.maximum_range_m = header.maximum_range_m;
    raw.header.azimuth_polarity = header.azimuth_polarity;
    raw.header.boresight_angle_rad = header.boresight_angle_rad;
    raw.header.sensor_longitudinal_m = header.sensor_longitudinal_m;
    raw.header.sensor_lateral_m = header.sensor_lateral_m;

    for i in 0..CORNER_RETURN_COUNT {
        raw.range_m[i] = tokens.next_f32()?;
        raw.range_rate_mps[i] = tokens.next_f32()?;
        raw.range_rate_raw_mps[i] = tokens.next_f32()?;
        raw.azimuth_raw_rad[i] = tokens.next_f32()?;
        raw.azimuth_rad[i] = tokens.next_f32()?;
        raw.amplitude_dbsm[i] = tokens.next_f32()?;
        raw.longitudinal_offset_m[i] = tokens.next_f32()?;
        raw.lateral_offset_m[i] = tokens.next_f32()?;
        raw.motion_status[i] = tokens.next_f64()? as i8;
        raw.valid[i] = tokens.next_f64()? as u8;
        raw.super_resolution[i] = tokens.next_f64()? as u8;
        raw.near_target[i] = tokens.next_f64()? as u8;
        raw.host_vehicle_clutter[i] = tokens.next_f64()? as u8;
        raw.multi_bounce[i] = tokens.next_f64()? as u8;
    }

    let elevation_rad = parse_elevation_tail(&mut tokens, CORNER_RETURN_COUNT);

    Some(CornerFrame {
        timestamp_us: header.timestamp_out,
        raw,
        elevation_rad,
    })
}

pub fn parse_front_line(line: &str) -> Option<FrontFrame> {
    let mut tokens = Tokens::new(line);
    // The leading role column is ignored for the front stream.
    let header = parse_detections_header(&mut tokens)?;

    let mut raw = RawFrontDetections::default();
    raw.header.timestamp_us = header.timestamp_in;
    raw.header.horizontal_fov_rad = header.horizontal_fov_rad;
    raw.header.maximum_range_m = header.maximum_range_m;
    raw.header.azimuth_polarity = header.azimuth_polarity;
    raw.header.boresight_angle_rad = header.boresight_angle_rad;
    raw.header.sensor_longitudinal_m = header.sensor_longitudinal_m;
    raw.header.sensor_lateral_m = header.sensor_lateral_m;

    for i in 0..FRONT_RETURN_COUNT {
        raw.range_m[i] = tokens.next_f32()?;
        raw.range_rate_mps[i] = tokens.next_f32()?;
        raw.range_rate_raw_mps[i] = tokens.next_f32()?;
        raw.azimuth_raw_rad[i] = tokens.next_f32()?;
        raw.azimuth_rad[i] = tokens.next_f32()?;
        raw.amplitude_dbsm[i] = tokens.next_f32()?;
        raw.longitudinal_offset_m[i] = tokens.next_f32()?;
        raw.lateral_offset_m[i] = tokens.next_f32()?;
        raw.motion_status[i] = tokens.next_f64()? as i8;
        raw.valid[i] = tokens.next_f64()? as u8;
        raw.super_resolution[i] = tokens.next_f64()? as u8;
        raw.near_target[i] = tokens.next_f64()? as u8;
        raw.host_vehicle_clutter[i] = tokens.next_f64()? as u8;
        raw.multi_bounce[i] = tokens.next_f64()? as u8;
    }

    let elevation_rad = parse_elevation_tail(&mut tokens, FRONT_RETURN_COUNT);

    Some(FrontFrame {
        timestamp_us: header.timestamp_out,
        raw,
        elevation_rad,
    })
}

pub fn parse_track_line(line: &str) -> Option<TrackFrame> {
    let mut tokens = Tokens::new(line);

    let current_time = tokens.next_u64()?;
    let vision_timestamp = tokens.next_u64()?;
    let fusion_timestamp = tokens.next_u64()?;
    let fusion_index = tokens.next_f64()? as u32;
    let image_frame_index = tokens.next_f64()? as u32;

    let mut raw = RawTrackFusion {
        timestamp_us: current_time,
        vision_timestamp_us: vision_timestamp,
        fusion_timestamp_us: fusion_timestamp,
        fusion_index,
        image_frame_index,
        ..RawTrackFusion::default()
    };

    // The two skipped blocks of 2 and 8 and the skipped block of 5 reflect
    // the source's legacy slot layout; the offsets must not move.
    for i in 0..TRACK_SLOT_COUNT {
        raw.vcs_longitudinal_position[i] = tokens.next_f32()?;
        raw.vcs_lateral_position[i] = tokens.next_f32()?;

        for _ in 0..2 {
            tokens.next_f64()?;
        }

        raw.length[i] = tokens.next_f32()?;
        raw.width[i] = tokens.next_f32()?;
        raw.height[i] = tokens.next_f32()?;
        raw.probability_of_detection[i] = tokens.next_f32()?;
        raw.id[i] = tokens.next_f64()? as i32;

        for _ in 0..8 {
            tokens.next_f64()?;
        }

        raw.moving_flag[i] = tokens.next_f64()? as u8;
        raw.stationary_flag[i] = tokens.next_f64()? as u8;
        raw.moveable_flag[i] = tokens.next_f64()? as u8;

        for _ in 0..5 {
            tokens.next_f64()?;
        }

        raw.vehicle_flag[i] = tokens.next_f64()? as u8;
        raw.status[i] = tokens.next_f64()? as u8;
        raw.object_classification[i] = tokens.next_f64()? as u16;
        raw.object_classification_confidence[i] = tokens.next_f64()? as u8;
        raw.vcs_lateral_velocity[i] = tokens.next_f32()?;
        raw.vcs_longitudinal_velocity[i] = tokens.next_f32()?;
        raw.vcs_lateral_acceleration[i] = tokens.next_f32()?;
        raw.vcs_longitudinal_acceleration[i] = tokens.next_f32()?;
        raw.vcs_heading[i] = tokens.next_f32()?;
        raw.vcs_heading_rate[i] = tokens.next_f32()?;
    }

    Some(TrackFrame {
        timestamp_us: current_time,
        raw,
    })
}

// ============================================================================
// Stream reader
// ============================================================================

pub struct CaptureStream {
    kind: StreamKind,
    path: PathBuf,
    reader: BufReader<File>,
    last_timestamp_us: u64,
    exhausted: bool,
}

impl CaptureStream {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = StreamKind::classify(&file_name);
        let reader = BufReader::new(File::open(&path)?);
        info!("opened {} capture stream: {}", kind.label(), path.display());
        Ok(Self {
            kind,
            path,
            reader,
            last_timestamp_us: 0,
            exhausted: false,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Next parseable frame, skipping blank and malformed lines. Returns
    /// None at end of stream and marks the stream exhausted.
    pub fn read_next(&mut self) -> Option<StreamFrame> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = match self.reader.read_line(&mut line) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("read error on {}: {err}", self.path.display());
                    self.exhausted = true;
                    return None;
                }
            };
            if bytes == 0 {
                self.exhausted = true;
                info!("completed reading from {}", self.path.display());
                return None;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let frame = match self.kind {
                StreamKind::Corner => parse_corner_line(trimmed).map(StreamFrame::Corner),
                StreamKind::Front => parse_front_line(trimmed).map(StreamFrame::Front),
                StreamKind::Tracks => parse_track_line(trimmed).map(StreamFrame::Tracks),
            };

            let Some(frame) = frame else {
                warn!(
                    "skipping malformed {} line in {}",
                    self.kind.label(),
                    self.path.display()
                );
                continue;
            };

            let timestamp = frame.timestamp_us();
            if self.last_timestamp_us > 0 && timestamp < self.last_timestamp_us {
                warn!(
                    "non-monotonic timestamp in {}: {} after {}",
                    self.path.display(),
                    timestamp,
                    self.last_timestamp_us
                );
            }
            self.last_timestamp_us = timestamp;
            return Some(frame);
        }
    }
}
