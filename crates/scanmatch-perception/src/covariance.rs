//! Covariance Projector.
//!
//! Turns the solver's optional 3×3 `(x, y, θ)` covariance into the 6×6
//! pose-covariance layout of the output messages:
//! - with a solver estimate, the 2×2 position block is rotated into the
//!   fixed frame (`R · Σxy · Rᵀ`) and the heading variance is copied as is;
//! - without one, a configured diagonal is used instead.
//!
//! All z, roll, pitch and cross terms are zero.

use nalgebra::{Matrix2, Matrix3, Rotation2};
use serde::{Deserialize, Serialize};

/// Row-major covariance over `(x, y, z, roll, pitch, yaw)`.
pub type Covariance6 = [[f64; 6]; 6];

/// Diagonal used when the solver provides no estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefaultCovariance {
    pub xx: f64,
    pub yy: f64,
    pub yaw: f64,
}

impl Default for DefaultCovariance {
    fn default() -> Self {
        Self {
            xx: 1e-9,
            yy: 1e-9,
            yaw: 1e-9,
        }
    }
}

impl DefaultCovariance {
    /// Build from the configured position (`[xx, yy, zz]`) and orientation
    /// (`[roll, pitch, yaw]`) variances.
    pub fn from_config(position: &[f64; 3], orientation: &[f64; 3]) -> Self {
        Self {
            xx: position[0],
            yy: position[1],
            yaw: orientation[2],
        }
    }
}

/// Rotate a 2×2 position covariance by `heading` radians.
pub fn rotate_xy(xy: &Matrix2<f64>, heading: f64) -> Matrix2<f64> {
    let r = Rotation2::new(heading).into_inner();
    r * xy * r.transpose()
}

/// Project into the 6×6 output layout.
///
/// `heading` is the fixed-frame yaw of the keyframe sensor pose; it is only
/// used when `estimate` is present.
pub fn project(
    estimate: Option<&Matrix3<f64>>,
    heading: f64,
    defaults: &DefaultCovariance,
) -> Covariance6 {
    let (xy, yaw) = match estimate {
        Some(cov) => {
            let block: Matrix2<f64> = cov.fixed_view::<2, 2>(0, 0).into_owned();
            (rotate_xy(&block, heading), cov[(2, 2)])
        }
        None => (
            Matrix2::new(defaults.xx, 0.0, 0.0, defaults.yy),
            defaults.yaw,
        ),
    };

    let mut out = [[0.0; 6]; 6];
    out[0][0] = xy[(0, 0)];
    out[0][1] = xy[(0, 1)];
    out[1][0] = xy[(1, 0)];
    out[1][1] = xy[(1, 1)];
    out[5][5] = yaw;
    out
}
