// src/config.rs
//
// Vehicle configuration (INI) and replay settings (YAML).
//
// The vehicle INI is the fixed capture-set schema: `;` starts a comment,
// `[Section]` headers, `key = value` pairs, angles in degrees. Values are
// converted to radians on load and ISO poses are derived from the VCS poses.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::math::degrees_to_radians;
use crate::pipeline::ProcessingSettings;
use crate::types::{RadarCalibration, SensorIndex, Vec2, VehicleParameters};

const MAX_CONTOUR_POINTS: usize = 64;

const CORNER_SECTIONS: [(&str, SensorIndex); 4] = [
    ("SRR FWD LEFT", SensorIndex::FrontLeft),
    ("SRR FWD RIGHT", SensorIndex::FrontRight),
    ("SRR REAR LEFT", SensorIndex::RearLeft),
    ("SRR REAR RIGHT", SensorIndex::RearRight),
];
const FRONT_SECTION: &str = "MRR FRONT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required section [{0}]")]
    MissingSection(String),
    #[error("unparseable value for {section}.{key}: {value:?}")]
    Parse {
        section: String,
        key: String,
        value: String,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid replay settings: {0}")]
    Settings(#[from] serde_yaml::Error),
}

// ============================================================================
// INI document
// ============================================================================

#[derive(Debug, Default)]
struct IniDocument {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniDocument {
    fn parse(text: &str) -> Self {
        let mut doc = IniDocument::default();
        let mut current: Option<String> = None;

        for raw_line in text.lines() {
            let line = match raw_line.find(';') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            }
            .trim();

            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim().to_string();
                doc.sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                warn!("ignoring malformed config line: {raw_line:?}");
                continue;
            };
            let Some(section) = &current else {
                warn!("ignoring key outside any section: {raw_line:?}");
                continue;
            };
            doc.sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }

        doc
    }

    fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    /// Overwrite `value` if the key is present; a missing key keeps the
    /// current (default or previously parsed) value.
    fn read_scalar(&self, section: &str, key: &str, value: &mut f32) -> Result<(), ConfigError> {
        if let Some(text) = self.get(section, key) {
            *value = text.parse::<f32>().map_err(|_| ConfigError::Parse {
                section: section.to_string(),
                key: key.to_string(),
                value: text.to_string(),
            })?;
        }
        Ok(())
    }

    fn read_pair(&self, section: &str, key: &str) -> Result<Option<(f32, f32)>, ConfigError> {
        let Some(text) = self.get(section, key) else {
            return Ok(None);
        };
        let parse_err = || ConfigError::Parse {
            section: section.to_string(),
            key: key.to_string(),
            value: text.to_string(),
        };
        let (first, second) = text.split_once(',').ok_or_else(parse_err)?;
        let a = first.trim().parse::<f32>().map_err(|_| parse_err())?;
        let b = second.trim().parse::<f32>().map_err(|_| parse_err())?;
        Ok(Some((a, b)))
    }
}

// ============================================================================
// Vehicle configuration
// ============================================================================

/// Loader for the per-vehicle INI: rear-axle offset, hardware time delays,
/// contour and one calibration section per radar.
#[derive(Debug, Clone)]
pub struct VehicleConfig {
    parameters: VehicleParameters,
}

impl VehicleConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini_str(&text)
    }

    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let doc = IniDocument::parse(text);

        if !doc.has_section("Geometry") && !doc.has_section("Vehicle") {
            return Err(ConfigError::MissingSection("Geometry".to_string()));
        }
        for section in ["Radar Common", "Contour"] {
            if !doc.has_section(section) {
                return Err(ConfigError::MissingSection(section.to_string()));
            }
        }
        for (section, _) in CORNER_SECTIONS {
            if !doc.has_section(section) {
                return Err(ConfigError::MissingSection(section.to_string()));
            }
        }
        if !doc.has_section(FRONT_SECTION) {
            return Err(ConfigError::MissingSection(FRONT_SECTION.to_string()));
        }

        let mut params = VehicleParameters::default();

        params.dist_rear_axle_to_front_bumper_m = read_dist_rear_axle(&doc)?;
        doc.read_scalar(
            "Radar Common",
            "cornerHardwareTimeDelay",
            &mut params.corner_hardware_delay_s,
        )?;
        doc.read_scalar(
            "Radar Common",
            "frontCenterHardwareTimeDelay",
            &mut params.front_center_hardware_delay_s,
        )?;

        params.contour_iso = read_contour(&doc)?;

        let dist_rear_axle = params.dist_rear_axle_to_front_bumper_m;
        for (section, sensor) in CORNER_SECTIONS {
            read_radar_section(
                &doc,
                section,
                dist_rear_axle,
                &mut params.radar_calibrations[sensor.as_index()],
            )?;
        }

        // The front radar has a single calibration section; the long-range
        // half inherits it.
        let mut front = params.radar_calibrations[SensorIndex::FrontShort.as_index()];
        read_radar_section(&doc, FRONT_SECTION, dist_rear_axle, &mut front)?;
        params.radar_calibrations[SensorIndex::FrontShort.as_index()] = front;
        params.radar_calibrations[SensorIndex::FrontLong.as_index()] = front;

        Ok(Self { parameters: params })
    }

    pub fn parameters(&self) -> &VehicleParameters {
        &self.parameters
    }

    pub fn into_parameters(self) -> VehicleParameters {
        self.parameters
    }
}

/// ISO pose derived from VCS: translate by the rear-axle offset along x and
/// flip the lateral axis.
pub fn update_iso_pose(dist_rear_axle_to_front_bumper_m: f32, calibration: &mut RadarCalibration) {
    calibration.iso.lateral_m = -calibration.vcs.lateral_m;
    calibration.iso.longitudinal_m = calibration.vcs.longitudinal_m + dist_rear_axle_to_front_bumper_m;
    calibration.iso.height_m = calibration.vcs.height_m;
    calibration.iso.orientation_rad = -calibration.vcs.orientation_rad;
}

fn read_dist_rear_axle(doc: &IniDocument) -> Result<f32, ConfigError> {
    let mut value = 0.0;
    doc.read_scalar("Geometry", "distRearAxle", &mut value)?;
    if value <= 0.0 {
        doc.read_scalar("Vehicle", "distRearAxle", &mut value)?;
    }
    Ok(value)
}

fn read_contour(doc: &IniDocument) -> Result<Vec<Vec2>, ConfigError> {
    let mut contour = Vec::new();
    for i in 0..MAX_CONTOUR_POINTS {
        let key = format!("contourPt{i}");
        if let Some((lon, lat)) = doc.read_pair("Contour", &key)? {
            if lon.is_finite() && lat.is_finite() {
                // Stored swapped so downstream consumers see the ISO plane.
                contour.push(Vec2::new(lat, lon));
            }
        }
    }
    Ok(contour)
}

fn read_radar_section(
    doc: &IniDocument,
    section: &str,
    dist_rear_axle_to_front_bumper_m: f32,
    calibration: &mut RadarCalibration,
) -> Result<(), ConfigError> {
    doc.read_scalar(section, "polarityVCS", &mut calibration.polarity)?;
    doc.read_scalar(
        section,
        "rangeRateAccuracy",
        &mut calibration.range_rate_accuracy_mps,
    )?;

    let mut azimuth_accuracy_deg = crate::math::radians_to_degrees(calibration.azimuth_accuracy_rad);
    doc.read_scalar(section, "azimuthAccuracy", &mut azimuth_accuracy_deg)?;
    calibration.azimuth_accuracy_rad = degrees_to_radians(azimuth_accuracy_deg);

    let mut orientation_deg = crate::math::radians_to_degrees(calibration.vcs.orientation_rad);
    doc.read_scalar(section, "orientationVCS", &mut orientation_deg)?;
    calibration.vcs.orientation_rad = degrees_to_radians(orientation_deg);

    doc.read_scalar(section, "lonPosVCS", &mut calibration.vcs.longitudinal_m)?;
    doc.read_scalar(section, "latPosVCS", &mut calibration.vcs.lateral_m)?;
    doc.read_scalar(section, "heightAboveGround", &mut calibration.vcs.height_m)?;

    let mut fov_deg = crate::math::radians_to_degrees(calibration.horizontal_fov_rad);
    doc.read_scalar(section, "horizontalFieldOfView", &mut fov_deg)?;
    calibration.horizontal_fov_rad = degrees_to_radians(fov_deg);

    update_iso_pose(dist_rear_axle_to_front_bumper_m, calibration);
    Ok(())
}

// ============================================================================
// Replay settings
// ============================================================================

/// Tunables for a replay run; everything has a sensible default so the CLI
/// works without a settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Directory capture files resolve against.
    pub data_root: PathBuf,
    /// Vehicle INI path; defaults to `<data_root>/Vehicle.ini`.
    pub vehicle_config: Option<PathBuf>,
    pub processing: ProcessingSettings,
    pub ring: RingSettings,
    /// Bounded capacity of the optional reader-thread channel.
    pub channel_capacity: usize,
    /// Playback pacing factor; 0 replays as fast as possible.
    pub speed_scale: f32,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            vehicle_config: None,
            processing: ProcessingSettings::default(),
            ring: RingSettings::default(),
            channel_capacity: 8,
            speed_scale: 0.0,
        }
    }
}

impl ReplaySettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn vehicle_config_path(&self) -> PathBuf {
        self.vehicle_config
            .clone()
            .unwrap_or_else(|| self.data_root.join("Vehicle.ini"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSettings {
    pub segment_count: usize,
    pub fallback_range_m: f32,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            segment_count: crate::virtual_sensor::DEFAULT_SEGMENT_COUNT,
            fallback_range_m: 120.0,
        }
    }
}
