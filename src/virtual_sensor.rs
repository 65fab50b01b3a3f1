// src/virtual_sensor.rs
//
// 360° virtual-sensor ring. The plane around the vehicle contour centroid is
// divided into N uniform angular segments; each update clips the nearest
// detection and the nearest track-footprint edge into the segments, yielding
// a closed free-space boundary. The contour start distance guarantees the
// boundary never dips inside the ego footprint.

use crate::types::Vec2;

pub const DEFAULT_SEGMENT_COUNT: usize = 72;

const EPSILON: f32 = 1e-5;

fn cross2(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Minimum non-negative ray parameter against one polygon edge.
///
/// With `edge = b - a` and `denom = cross(d, edge)`, the hit satisfies
/// `t >= 0` along the ray and `0 <= u <= 1` along the edge; near-parallel
/// configurations (`|denom| < EPSILON`) miss.
fn ray_segment_intersection(origin: Vec2, direction: Vec2, a: Vec2, b: Vec2) -> Option<f32> {
    let edge = b - a;
    let denom = cross2(direction, edge);
    if denom.abs() < EPSILON {
        return None;
    }

    let delta = a - origin;
    let t = cross2(delta, edge) / denom;
    let u = cross2(delta, direction) / denom;
    if t >= 0.0 && (0.0..=1.0).contains(&u) {
        Some(t)
    } else {
        None
    }
}

fn polygon_ray_distance(origin: Vec2, direction: Vec2, polygon: &[Vec2]) -> f32 {
    let mut best = f32::INFINITY;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        if let Some(t) = ray_segment_intersection(origin, direction, a, b) {
            best = best.min(t);
        }
    }
    best
}

/// One emitted boundary segment, from the contour crossing to the clipped
/// end point along the segment direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingSegment {
    pub start: Vec2,
    pub end: Vec2,
}

pub struct VirtualSensorRing {
    vehicle_contour: Vec<Vec2>,
    vehicle_center: Vec2,
    segment_count: usize,
    segment_directions: Vec<Vec2>,
    segment_start_dist: Vec<f32>,
    segment_end_dist: Vec<f32>,
    ready: bool,
}

impl Default for VirtualSensorRing {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_COUNT)
    }
}

impl VirtualSensorRing {
    pub fn new(segment_count: usize) -> Self {
        let mut ring = Self {
            vehicle_contour: Vec::new(),
            vehicle_center: Vec2::zeros(),
            segment_count: 0,
            segment_directions: Vec::new(),
            segment_start_dist: Vec::new(),
            segment_end_dist: Vec::new(),
            ready: false,
        };
        ring.set_segment_count(segment_count);
        ring
    }

    /// Change the angular resolution. Counts below 3 are clamped. Returns
    /// false when the count is unchanged.
    pub fn set_segment_count(&mut self, count: usize) -> bool {
        let clamped = count.max(3);
        if clamped == self.segment_count && !self.segment_directions.is_empty() {
            return false;
        }

        self.segment_count = clamped;
        self.segment_directions = vec![Vec2::zeros(); clamped];
        self.segment_start_dist = vec![0.0; clamped];
        self.segment_end_dist = vec![f32::INFINITY; clamped];
        self.rebuild_segments();

        if self.vehicle_contour.len() >= 3 {
            let contour = std::mem::take(&mut self.vehicle_contour);
            self.set_vehicle_contour(&contour);
        } else {
            self.ready = false;
        }
        true
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Install the vehicle contour. Needs at least three points; updates the
    /// centroid and the per-segment start distances, which stay fixed until
    /// the contour changes.
    pub fn set_vehicle_contour(&mut self, contour: &[Vec2]) {
        if contour.len() < 3 {
            return;
        }

        self.vehicle_contour = contour.to_vec();

        let mut center = Vec2::zeros();
        for point in contour {
            center += *point;
        }
        self.vehicle_center = center / contour.len() as f32;

        for i in 0..self.segment_count {
            let distance = self.contour_ray_distance(self.vehicle_center, self.segment_directions[i]);
            self.segment_start_dist[i] = distance.max(0.0);
        }

        self.ready = true;
    }

    /// Clip one frame of detections and track footprints into the segments.
    /// End distances reset on every call; the previous frame does not leak
    /// into the next.
    pub fn update(&mut self, detections: &[Vec2], track_footprints: &[[Vec2; 4]]) {
        self.reset_segments();

        if !self.ready {
            return;
        }

        for point in detections {
            let delta = *point - self.vehicle_center;
            let distance = delta.norm();
            if !distance.is_finite() || distance <= EPSILON {
                continue;
            }

            let idx = self.segment_index(delta.y.atan2(delta.x));
            if distance <= self.segment_start_dist[idx] + EPSILON {
                continue;
            }
            if distance < self.segment_end_dist[idx] {
                self.segment_end_dist[idx] = distance;
            }
        }

        for footprint in track_footprints {
            for i in 0..self.segment_count {
                let distance =
                    polygon_ray_distance(self.vehicle_center, self.segment_directions[i], footprint);
                if !distance.is_finite() || distance <= EPSILON {
                    continue;
                }
                if distance <= self.segment_start_dist[i] + EPSILON {
                    continue;
                }
                if distance < self.segment_end_dist[i] {
                    self.segment_end_dist[i] = distance;
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.reset_segments();
    }

    /// Closed boundary polyline of `segment_count` points. Empty until a
    /// contour is set or for a non-positive fallback range. Untouched
    /// segments emit at the fallback range; every point stays at or outside
    /// the contour crossing.
    pub fn ring(&self, fallback_range: f32) -> Vec<Vec2> {
        let mut points = Vec::new();
        if !self.ready || fallback_range <= 0.0 {
            return points;
        }

        points.reserve(self.segment_count);
        for i in 0..self.segment_count {
            let length = self.segment_end_dist[i]
                .min(fallback_range)
                .max(self.segment_start_dist[i]);
            points.push(self.vehicle_center + self.segment_directions[i] * length);
        }
        points
    }

    /// Per-segment start/end pairs, start at the contour crossing.
    pub fn segments(&self, fallback_range: f32) -> Vec<RingSegment> {
        let mut output = Vec::new();
        if !self.ready || fallback_range <= 0.0 {
            return output;
        }

        output.reserve(self.segment_count);
        for i in 0..self.segment_count {
            let length = self.segment_end_dist[i]
                .min(fallback_range)
                .max(self.segment_start_dist[i]);
            output.push(RingSegment {
                start: self.vehicle_center + self.segment_directions[i] * self.segment_start_dist[i],
                end: self.vehicle_center + self.segment_directions[i] * length,
            });
        }
        output
    }

    pub fn center(&self) -> Vec2 {
        self.vehicle_center
    }

    fn rebuild_segments(&mut self) {
        let delta = crate::math::TWO_PI / self.segment_count as f32;
        for (i, direction) in self.segment_directions.iter_mut().enumerate() {
            let angle = (i as f32 + 0.5) * delta;
            *direction = Vec2::new(angle.cos(), angle.sin());
        }
        self.segment_start_dist.fill(0.0);
    }

    fn reset_segments(&mut self) {
        self.segment_end_dist.fill(f32::INFINITY);
    }

    fn segment_index(&self, angle: f32) -> usize {
        let mut normalized = angle % crate::math::TWO_PI;
        if normalized < 0.0 {
            normalized += crate::math::TWO_PI;
        }
        let idx = (normalized / crate::math::TWO_PI * self.segment_count as f32) as usize;
        idx.min(self.segment_count - 1)
    }

    fn contour_ray_distance(&self, origin: Vec2, direction: Vec2) -> f32 {
        if self.vehicle_contour.len() < 3 {
            return 0.0;
        }
        let best = polygon_ray_distance(origin, direction, &self.vehicle_contour);
        if best.is_finite() {
            best
        } else {
            0.0
        }
    }
}
