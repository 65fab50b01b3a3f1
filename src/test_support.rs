// src/test_support.rs
//
// Builders for synthetic capture lines and vehicle INI text used by tests
// across modules.

use std::fmt::Write as _;

pub fn build_vehicle_config_ini(dist_rear_axle: f32, geometry_dist: bool, vehicle_dist: bool) -> String {
    let mut out = String::new();
    if geometry_dist {
        let _ = writeln!(out, "[Geometry]\ndistRearAxle={dist_rear_axle}\n");
    }
    if vehicle_dist {
        let _ = writeln!(out, "[Vehicle]\ndistRearAxle={dist_rear_axle}\n");
    }

    out.push_str("[Radar Common]\n");
    out.push_str("cornerHardwareTimeDelay=0.01\n");
    out.push_str("frontCenterHardwareTimeDelay=0.02\n\n");

    out.push_str("[Contour]\n");
    out.push_str("contourPt0=0.0,0.0\n");
    out.push_str("contourPt1=1.0,2.0\n");
    out.push_str("contourPt2=2.0,2.0\n\n");

    for section in [
        "SRR FWD LEFT",
        "SRR FWD RIGHT",
        "SRR REAR LEFT",
        "SRR REAR RIGHT",
        "MRR FRONT",
    ] {
        let _ = writeln!(out, "[{section}]");
        out.push_str("polarityVCS=1.0\n");
        out.push_str("rangeRateAccuracy=0.4\n");
        out.push_str("azimuthAccuracy=1.5\n");
        out.push_str("orientationVCS=5.0\n");
        out.push_str("lonPosVCS=1.0\n");
        out.push_str("latPosVCS=0.5\n");
        out.push_str("heightAboveGround=0.3\n");
        out.push_str("horizontalFieldOfView=90.0\n\n");
    }

    out
}

/// One corner capture line with a single valid return in slot 0.
pub fn build_corner_line(timestamp_out: u64, timestamp_in: u64, radar_index: i32) -> String {
    let mut out = String::new();
    let _ = write!(out, "{radar_index} {timestamp_out} {timestamp_in} 1.0 120.0 1.0 0.0 0.0 0.0");

    for i in 0..64 {
        let valid = i == 0;
        let range = if valid { 10.0 } else { 0.0 };
        let lon_offset = if valid { 1.0 } else { 0.0 };
        let lat_offset = if valid { 1.0 } else { 0.0 };
        let radar_valid = u8::from(valid);
        let _ = write!(
            out,
            " {range} 0.0 0.0 0.1 0.1 -5.0 {lon_offset} {lat_offset} 0 {radar_valid} 0 0 0 0"
        );
    }

    out.push_str(" 0 0 0");

    for i in 0..64 {
        let elevation = if i == 0 { 0.05 } else { 0.0 };
        let _ = write!(out, " {elevation}");
    }

    out
}

/// One front capture line with valid returns in slots 0 (short half) and
/// 64 (long half).
pub fn build_front_line(timestamp_out: u64, timestamp_in: u64) -> String {
    let mut out = String::new();
    let _ = write!(out, "0 {timestamp_out} {timestamp_in} 1.0 120.0 1.0 0.0 0.0 0.0");

    for i in 0..128 {
        let valid = i == 0 || i == 64;
        let range = if valid { 8.0 } else { 0.0 };
        let lon_offset = if valid { 1.5 } else { 0.0 };
        let lat_offset = if valid { 0.5 } else { 0.0 };
        let radar_valid = u8::from(valid);
        let _ = write!(
            out,
            " {range} 0.0 0.0 0.05 0.05 -10.0 {lon_offset} {lat_offset} 0 {radar_valid} 0 0 0 0"
        );
    }

    out.push_str(" 0 0 0");

    for i in 0..128 {
        let elevation = if i == 0 || i == 64 { 0.03 } else { 0.0 };
        let _ = write!(out, " {elevation}");
    }

    out
}

/// One track fusion line with a single populated slot 0 (id 7, class car,
/// status Updated).
pub fn build_track_line(timestamp: u64) -> String {
    let mut out = String::new();
    let _ = write!(out, "{timestamp} {timestamp} {timestamp} 1 1");

    for i in 0..96 {
        let valid = i == 0;
        let f = |v: f32| if valid { v } else { 0.0 };
        let n = |v: i32| if valid { v } else { 0 };

        let _ = write!(
            out,
            " {} {} 0.0 0.0 {} {} {} {} {}",
            f(1.0),
            f(1.0),
            f(4.0),
            f(2.0),
            f(1.6),
            f(0.9),
            n(7)
        );
        for _ in 0..8 {
            out.push_str(" 0.0");
        }
        let _ = write!(out, " {} 0 {}", n(1), n(1));
        for _ in 0..5 {
            out.push_str(" 0.0");
        }
        let _ = write!(out, " {} {} {} {}", n(1), n(5), n(1), n(80));
        out.push_str(" 0.0 0.0 0.0 0.0 0.0 0.0");
    }

    out
}
