// src/pipeline/mapper.rs
//
// Raw fixed-width return arrays -> enhanced detection lists.
//
// The mappers preserve array length: downstream stages rely on a 1:1
// correspondence between raw index and enhanced index, so empty returns pass
// through with zero flags instead of being dropped.

use crate::types::{
    pack_detection_flags, EnhancedDetection, EnhancedDetections, RawCornerDetections,
    RawFrontDetections, CORNER_RETURN_COUNT, FRONT_RETURN_COUNT,
};

pub fn map_corner_detections(input: &RawCornerDetections) -> EnhancedDetections {
    let mut output = EnhancedDetections {
        header: input.header,
        detections: vec![EnhancedDetection::default(); CORNER_RETURN_COUNT],
    };

    for i in 0..CORNER_RETURN_COUNT {
        let det = &mut output.detections[i];
        det.range_m = input.range_m[i];
        det.range_rate_mps = input.range_rate_mps[i];
        det.range_rate_raw_mps = input.range_rate_raw_mps[i];
        det.azimuth_raw_rad = input.azimuth_raw_rad[i];
        det.azimuth_rad = input.azimuth_rad[i];
        det.amplitude_dbsm = input.amplitude_dbsm[i];
        det.longitudinal_offset_m = input.longitudinal_offset_m[i];
        det.lateral_offset_m = input.lateral_offset_m[i];
        det.motion_status = input.motion_status[i];
        det.flags = pack_detection_flags(
            input.valid[i],
            input.super_resolution[i],
            input.near_target[i],
            input.host_vehicle_clutter[i],
            input.multi_bounce[i],
        );
    }

    output
}

/// Split the 128-return front frame into the short-range half `[0, 64)` and
/// the long-range half `[64, 128)`, both carrying the shared header.
pub fn map_front_detections(
    input: &RawFrontDetections,
) -> (EnhancedDetections, EnhancedDetections) {
    let mut output_short = EnhancedDetections {
        header: input.header,
        detections: vec![EnhancedDetection::default(); CORNER_RETURN_COUNT],
    };
    let mut output_long = EnhancedDetections {
        header: input.header,
        detections: vec![EnhancedDetection::default(); CORNER_RETURN_COUNT],
    };

    for i in 0..FRONT_RETURN_COUNT {
        let det = if i < CORNER_RETURN_COUNT {
            &mut output_short.detections[i]
        } else {
            &mut output_long.detections[i - CORNER_RETURN_COUNT]
        };
        det.range_m = input.range_m[i];
        det.range_rate_mps = input.range_rate_mps[i];
        det.range_rate_raw_mps = input.range_rate_raw_mps[i];
        det.azimuth_raw_rad = input.azimuth_raw_rad[i];
        det.azimuth_rad = input.azimuth_rad[i];
        det.amplitude_dbsm = input.amplitude_dbsm[i];
        det.longitudinal_offset_m = input.longitudinal_offset_m[i];
        det.lateral_offset_m = input.lateral_offset_m[i];
        det.motion_status = input.motion_status[i];
        det.flags = pack_detection_flags(
            input.valid[i],
            input.super_resolution[i],
            input.near_target[i],
            input.host_vehicle_clutter[i],
            input.multi_bounce[i],
        );
    }

    (output_short, output_long)
}
