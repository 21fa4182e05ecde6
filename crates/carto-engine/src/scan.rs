//! Polar laser-scan representation used internally by the scan matcher,
//! and the XYZ <-> polar conversions needed to cross the façade boundary
//! (readings arrive and leave as binary PCD, not polar scans).

use std::time::Instant;
use types::ColoredPoint;

/// A complete 360-degree laser scan, indexed by whole-degree angle.
#[derive(Debug, Clone)]
pub struct LaserScan {
    pub timestamp: Instant,
    pub angle_increment: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<f32>,
    pub intensities: Vec<u8>,
}

impl Default for LaserScan {
    fn default() -> Self {
        Self {
            timestamp: Instant::now(),
            angle_increment: (std::f32::consts::PI * 2.0) / 360.0,
            range_min: 0.2,
            range_max: 25.0,
            ranges: Vec::new(),
            intensities: Vec::new(),
        }
    }
}

/// Discretize a decoded PCD point cloud into a 360-bin polar scan, the
/// inverse of the `x = r*cos, y = r*sin` projection the lidar driver uses
/// to build points from raw ranges.
pub fn points_to_scan(points: &[ColoredPoint], range_min: f32, range_max: f32) -> LaserScan {
    const BINS: usize = 360;
    let angle_increment = (std::f32::consts::PI * 2.0) / BINS as f32;
    let mut ranges = vec![0.0f32; BINS];
    let mut intensities = vec![0u8; BINS];

    for p in points {
        let range = (p.x * p.x + p.y * p.y).sqrt();
        if range <= range_min || range >= range_max {
            continue;
        }
        let mut angle = p.y.atan2(p.x);
        if angle < 0.0 {
            angle += std::f32::consts::PI * 2.0;
        }
        let bin = ((angle / angle_increment).round() as usize) % BINS;
        ranges[bin] = range;
        intensities[bin] = 128;
    }

    LaserScan {
        timestamp: Instant::now(),
        angle_increment,
        range_min,
        range_max,
        ranges,
        intensities,
    }
}

/// The inverse of [`points_to_scan`]: project a polar scan back to XYZ
/// points, dropping invalid (zero-range) bins. Used to rebuild a world-
/// frame point cloud from keyframe scans for `pointCloudMap()`.
pub fn scan_to_points(scan: &LaserScan) -> Vec<ColoredPoint> {
    scan.ranges
        .iter()
        .enumerate()
        .filter(|(_, &r)| r > scan.range_min && r < scan.range_max)
        .map(|(i, &range)| {
            let angle = i as f32 * scan.angle_increment;
            ColoredPoint {
                x: range * angle.cos(),
                y: range * angle.sin(),
                z: 0.0,
                rgba: None,
            }
        })
        .collect()
}
