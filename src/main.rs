use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use radar_replay::playback::build_track_footprint;
use radar_replay::types::Vec2;
use radar_replay::{
    OdometryEstimate, RadarPlayback, RadarTrack, ReplaySettings, VehicleConfig, VirtualSensorRing,
};

const SETTINGS_FILE: &str = "replay.yaml";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "radar_replay=info".to_string()),
        )
        .init();

    info!("radar replay starting");

    let settings = if Path::new(SETTINGS_FILE).exists() {
        let settings = ReplaySettings::load(SETTINGS_FILE)?;
        info!("settings loaded from {SETTINGS_FILE}");
        settings
    } else {
        ReplaySettings::default()
    };

    // Positional arguments are the capture filenames; without any, the data
    // root is scanned.
    let mut capture_files: Vec<String> = std::env::args().skip(1).collect();
    if capture_files.is_empty() {
        capture_files = RadarPlayback::find_capture_files(&settings.data_root);
    }
    if capture_files.is_empty() {
        bail!("no capture files given and none found under {}", settings.data_root.display());
    }

    let vehicle_config_path = settings.vehicle_config_path();
    let parameters = VehicleConfig::load(&vehicle_config_path)
        .with_context(|| format!("loading vehicle config {}", vehicle_config_path.display()))?
        .into_parameters();
    info!("vehicle config loaded from {}", vehicle_config_path.display());

    let mut playback = RadarPlayback::open(
        parameters,
        settings.processing,
        &settings.data_root,
        &capture_files,
    )?;

    let mut ring = VirtualSensorRing::new(settings.ring.segment_count);
    let contour = playback.vehicle_contour_map_plane();
    if contour.len() >= 3 {
        ring.set_vehicle_contour(&contour);
    } else {
        warn!("vehicle contour has fewer than 3 points; free-space ring disabled");
    }

    let stats = replay(&mut playback, &mut ring, &settings)?;

    info!("replay finished");
    info!("  total frames:      {}", stats.total_frames);
    info!("  with detections:   {}", stats.frames_with_detections);
    info!("  with tracks:       {}", stats.frames_with_tracks);
    info!("  processing time:   {:.2}s", stats.duration_secs);
    info!("  average rate:      {:.1} frames/s", stats.avg_fps);
    if let Some(odometry) = &stats.last_odometry {
        info!(
            "  last odometry:     vLon {:.2} m/s, vLat {:.2} m/s ({} inliers)",
            odometry.v_lon_mps, odometry.v_lat_mps, odometry.inlier_count
        );
    }

    save_summary(&stats)?;
    Ok(())
}

#[derive(Serialize)]
struct ReplayStats {
    total_frames: u64,
    frames_with_detections: u64,
    frames_with_tracks: u64,
    duration_secs: f64,
    avg_fps: f64,
    ring_segment_count: usize,
    last_odometry: Option<OdometryEstimate>,
}

fn replay(
    playback: &mut RadarPlayback,
    ring: &mut VirtualSensorRing,
    settings: &ReplaySettings,
) -> Result<ReplayStats> {
    let start_time = Instant::now();
    let mut total_frames = 0u64;
    let mut frames_with_detections = 0u64;
    let mut frames_with_tracks = 0u64;
    let mut latest_tracks: Vec<RadarTrack> = Vec::new();
    let mut previous_timestamp_us: Option<u64> = None;

    while let Some(frame) = playback.next_frame() {
        let frame_start = Instant::now();
        total_frames += 1;

        if total_frames % 200 == 0 {
            info!(
                "frame {} at {} us ({} detections, {} tracks)",
                total_frames,
                frame.timestamp_us,
                frame.detections.len(),
                latest_tracks.len()
            );
        }

        if frame.has_detections {
            frames_with_detections += 1;
        }
        if frame.has_tracks {
            frames_with_tracks += 1;
            latest_tracks = frame.tracks.clone();
        }

        let map_points: Vec<Vec2> = frame
            .detections
            .iter()
            .map(|point| Vec2::new(point.x, point.y))
            .collect();
        let footprints: Vec<[Vec2; 4]> = latest_tracks.iter().map(build_track_footprint).collect();

        ring.update(&map_points, &footprints);
        let boundary = ring.ring(settings.ring.fallback_range_m);
        debug_assert!(boundary.is_empty() || boundary.len() == ring.segment_count());

        // Replay pacing: sleep the capture inter-frame gap scaled by the
        // configured factor. Zero disables pacing for headless runs.
        if settings.speed_scale > 0.0 {
            let gap_us = match previous_timestamp_us {
                Some(previous) if frame.timestamp_us > previous => frame.timestamp_us - previous,
                _ => 0,
            };
            let scale = settings.speed_scale.max(0.01);
            let target = Duration::from_micros((gap_us as f32 / scale) as u64);
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                std::thread::sleep(target - elapsed);
            }
        }
        previous_timestamp_us = Some(frame.timestamp_us);
    }

    let duration = start_time.elapsed();
    let duration_secs = duration.as_secs_f64();
    Ok(ReplayStats {
        total_frames,
        frames_with_detections,
        frames_with_tracks,
        duration_secs,
        avg_fps: if duration_secs > 0.0 {
            total_frames as f64 / duration_secs
        } else {
            0.0
        },
        ring_segment_count: ring.segment_count(),
        last_odometry: playback.latest_odometry(),
    })
}

fn save_summary(stats: &ReplayStats) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)?;
    let path = Path::new("replay_summary.json");
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    info!("summary saved to {}", path.display());
    Ok(())
}
