//! PointSet Builder.
//!
//! Converts raw range readings into the polar [`PointSet`] representation the
//! alignment solver consumes.  Two input shapes are supported:
//!
//! - [`LaserScan`] – one range per evenly spaced bearing.  The output has one
//!   point per range sample; out-of-band ranges become invalid points with a
//!   `-1` range sentinel but keep their slot.
//! - [`PointCloud`] – Cartesian samples.  A greedy pass first drops every
//!   sample closer than [`CloudFilter::resolution`] to the previously kept
//!   finite one, then each kept sample is converted to `(range, bearing)` about the
//!   sensor origin.
//!
//! Building never fails: malformed samples degrade to invalid points.

use scanmatch_types::{LaserScan, PointCloud, Vector3};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Range stored for points that failed the validity test.
pub const INVALID_RANGE: f64 = -1.0;

/// Cluster id of a point that has not been clustered.
pub const UNCLUSTERED: i32 = -1;

/// One polar sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePoint {
    pub valid: bool,
    /// Metres, or [`INVALID_RANGE`] when `valid` is false.
    pub range: f64,
    /// Radians in the sensor frame.
    pub bearing: f64,
    pub cluster: i32,
}

/// Ordered polar point set handed to the alignment solver.
///
/// The motion fields (`odometry`, `estimate`, `true_pose`, each `[x, y, θ]`)
/// are part of the solver's input contract and start at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    pub points: Vec<RangePoint>,
    pub min_bearing: f64,
    pub max_bearing: f64,
    pub odometry: [f64; 3],
    pub estimate: [f64; 3],
    pub true_pose: [f64; 3],
}

impl PointSet {
    fn from_points(points: Vec<RangePoint>) -> Self {
        let min_bearing = points.first().map_or(0.0, |p| p.bearing);
        let max_bearing = points.last().map_or(0.0, |p| p.bearing);
        Self {
            points,
            min_bearing,
            max_bearing,
            odometry: [0.0; 3],
            estimate: [0.0; 3],
            true_pose: [0.0; 3],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| p.valid).count()
    }

    /// Zero the motion fields so the set can serve as the reference pinned
    /// at the origin.
    pub fn reset_motion(&mut self) {
        self.odometry = [0.0; 3];
        self.estimate = [0.0; 3];
        self.true_pose = [0.0; 3];
    }
}

/// Validity band and density bound for cloud-shaped input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudFilter {
    pub range_min: f64,
    pub range_max: f64,
    /// Minimum planar spacing between consecutive kept samples (metres).
    pub resolution: f64,
}

impl Default for CloudFilter {
    fn default() -> Self {
        Self {
            range_min: 0.1,
            range_max: 50.0,
            resolution: 0.05,
        }
    }
}

fn polar_point(range: f64, bearing: f64, range_min: f64, range_max: f64) -> RangePoint {
    let valid = range > range_min && range < range_max;
    RangePoint {
        valid,
        range: if valid { range } else { INVALID_RANGE },
        bearing,
        cluster: UNCLUSTERED,
    }
}

/// Build a [`PointSet`] from a laser scan.
pub fn from_scan(scan: &LaserScan) -> PointSet {
    let points = scan
        .ranges
        .iter()
        .enumerate()
        .map(|(i, &r)| {
            let bearing = scan.angle_min + i as f64 * scan.angle_increment;
            polar_point(r, bearing, scan.range_min, scan.range_max)
        })
        .collect();
    PointSet::from_points(points)
}

/// Greedy density filter: keep a sample only if it lies farther than
/// `resolution` (planar) from the last kept finite sample.  The first finite
/// sample is always kept.  Non-finite samples are passed through so they can
/// surface as invalid points, but never become the distance anchor.
pub fn downsample(points: &[Vector3], resolution: f64) -> Vec<Vector3> {
    let max_d2 = resolution * resolution;
    let mut kept: Vec<Vector3> = Vec::with_capacity(points.len());
    let mut anchor: Option<Vector3> = None;
    for p in points {
        if !(p.x.is_finite() && p.y.is_finite()) {
            kept.push(*p);
            continue;
        }
        let far_enough = match anchor {
            None => true,
            Some(last) => {
                let dx = last.x - p.x;
                let dy = last.y - p.y;
                dx * dx + dy * dy > max_d2
            }
        };
        if far_enough {
            kept.push(*p);
            anchor = Some(*p);
        }
    }
    kept
}

/// Build a [`PointSet`] from a point cloud.
pub fn from_cloud(cloud: &PointCloud, filter: &CloudFilter) -> PointSet {
    let kept = downsample(&cloud.points, filter.resolution);
    let points = kept
        .iter()
        .map(|p| {
            let bearing = p.y.atan2(p.x);
            if p.x.is_nan() || p.y.is_nan() {
                warn!(
                    frame = %cloud.header.frame_id,
                    "cloud input contains NaN values; use a filtered cloud input"
                );
                return RangePoint {
                    valid: false,
                    range: INVALID_RANGE,
                    bearing,
                    cluster: UNCLUSTERED,
                };
            }
            polar_point(p.x.hypot(p.y), bearing, filter.range_min, filter.range_max)
        })
        .collect();
    PointSet::from_points(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use scanmatch_types::Header;

    fn scan(ranges: Vec<f64>) -> LaserScan {
        LaserScan {
            header: Header::default(),
            angle_min: -1.0,
            angle_increment: 0.5,
            range_min: 0.1,
            range_max: 10.0,
            ranges,
        }
    }

    fn cloud(points: Vec<(f64, f64)>) -> PointCloud {
        PointCloud {
            header: Header::default(),
            points: points
                .into_iter()
                .map(|(x, y)| Vector3::new(x, y, 0.3))
                .collect(),
        }
    }

    #[test]
    fn scan_bearings_follow_angle_increment() {
        let set = from_scan(&scan(vec![1.0, 2.0, 3.0, 4.0, 5.0]));
        let bearings: Vec<f64> = set.points.iter().map(|p| p.bearing).collect();
        assert_eq!(bearings, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(set.min_bearing, -1.0);
        assert_eq!(set.max_bearing, 1.0);
    }

    #[test]
    fn scan_validity_band_is_strict() {
        let set = from_scan(&scan(vec![0.1, 0.11, 9.99, 10.0, f64::NAN, f64::INFINITY]));
        let valid: Vec<bool> = set.points.iter().map(|p| p.valid).collect();
        assert_eq!(valid, vec![false, true, true, false, false, false]);
        assert_eq!(set.len(), 6, "invalid samples keep their slot");
        assert_eq!(set.valid_count(), 2);
        for p in set.points.iter().filter(|p| !p.valid) {
            assert_eq!(p.range, INVALID_RANGE);
        }
        assert!(set.points.iter().all(|p| p.cluster == UNCLUSTERED));
    }

    #[test]
    fn motion_fields_start_at_zero() {
        let mut set = from_scan(&scan(vec![1.0]));
        assert_eq!(set.odometry, [0.0; 3]);
        assert_eq!(set.estimate, [0.0; 3]);
        assert_eq!(set.true_pose, [0.0; 3]);
        set.estimate = [1.0, 2.0, 3.0];
        set.reset_motion();
        assert_eq!(set.estimate, [0.0; 3]);
    }

    #[test]
    fn empty_scan_yields_empty_set() {
        let set = from_scan(&scan(vec![]));
        assert!(set.is_empty());
        assert_eq!(set.min_bearing, 0.0);
        assert_eq!(set.max_bearing, 0.0);
    }

    #[test]
    fn cloud_converts_to_polar_ignoring_z() {
        let set = from_cloud(&cloud(vec![(1.0, 0.0), (0.0, 2.0)]), &CloudFilter::default());
        assert_eq!(set.len(), 2);
        assert!((set.points[0].range - 1.0).abs() < 1e-12);
        assert!(set.points[0].bearing.abs() < 1e-12);
        assert!((set.points[1].range - 2.0).abs() < 1e-12);
        assert!((set.points[1].bearing - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(set.max_bearing, set.points[1].bearing);
    }

    #[test]
    fn cloud_downsampling_drops_dense_points() {
        let filter = CloudFilter {
            resolution: 0.1,
            ..CloudFilter::default()
        };
        let set = from_cloud(
            &cloud(vec![(1.0, 0.0), (1.05, 0.0), (1.09, 0.0), (1.2, 0.0)]),
            &filter,
        );
        // 1.05 and 1.09 are within 0.1 of 1.0; 1.2 is not.
        assert_eq!(set.len(), 2);
        assert!((set.points[1].range - 1.2).abs() < 1e-12);
    }

    #[test]
    fn cloud_out_of_range_points_are_invalid() {
        let filter = CloudFilter {
            range_min: 0.5,
            range_max: 5.0,
            resolution: 0.0,
        };
        let set = from_cloud(&cloud(vec![(0.2, 0.0), (2.0, 0.0), (6.0, 0.0)]), &filter);
        let valid: Vec<bool> = set.points.iter().map(|p| p.valid).collect();
        assert_eq!(valid, vec![false, true, false]);
    }

    #[test]
    fn cloud_nan_point_is_kept_but_invalid() {
        let set = from_cloud(
            &cloud(vec![(1.0, 1.0), (f64::NAN, 1.0), (2.0, 1.0)]),
            &CloudFilter::default(),
        );
        assert_eq!(set.len(), 3);
        assert!(!set.points[1].valid);
        assert_eq!(set.points[1].range, INVALID_RANGE);
        assert_eq!(set.points[1].cluster, UNCLUSTERED);
        assert_eq!(set.valid_count(), 2);
    }

    #[test]
    fn leading_nan_does_not_swallow_rest_of_cloud() {
        let set = from_cloud(
            &cloud(vec![(f64::NAN, 1.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]),
            &CloudFilter::default(),
        );
        assert_eq!(set.len(), 4);
        assert!(!set.points[0].valid);
        assert_eq!(set.valid_count(), 3);
        assert!((set.points[3].range - 3.0).abs() < 1e-12);
    }

    #[test]
    fn density_is_measured_against_last_finite_sample() {
        let points = vec![
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(f64::NAN, 0.0, 0.0),
            Vector3::new(1.01, 0.0, 0.0),
            Vector3::new(1.5, 0.0, 0.0),
        ];
        let kept = downsample(&points, 0.1);
        assert_eq!(kept.len(), 3);
        assert!(kept[1].x.is_nan());
        assert_eq!(kept[2].x, 1.5);
    }

    #[test]
    fn empty_cloud_yields_empty_set() {
        let set = from_cloud(&cloud(vec![]), &CloudFilter::default());
        assert!(set.is_empty());
    }

    proptest! {
        #[test]
        fn kept_cloud_points_respect_resolution(
            raw in prop::collection::vec((-20.0..20.0f64, -20.0..20.0f64), 1..200),
            resolution in 0.0..2.0f64,
        ) {
            let points: Vec<Vector3> = raw.iter().map(|&(x, y)| Vector3::new(x, y, 0.0)).collect();
            let kept = downsample(&points, resolution);
            prop_assert!(!kept.is_empty());
            prop_assert_eq!(kept[0], points[0]);
            for pair in kept.windows(2) {
                let d = (pair[0].x - pair[1].x).hypot(pair[0].y - pair[1].y);
                prop_assert!(d >= resolution, "kept points {} apart, resolution {}", d, resolution);
            }
        }

        #[test]
        fn scan_validity_matches_strict_band(
            ranges in prop::collection::vec(-1.0..12.0f64, 0..100),
        ) {
            let set = from_scan(&scan(ranges.clone()));
            prop_assert_eq!(set.len(), ranges.len());
            for (p, r) in set.points.iter().zip(&ranges) {
                prop_assert_eq!(p.valid, *r > 0.1 && *r < 10.0);
            }
        }
    }
}
