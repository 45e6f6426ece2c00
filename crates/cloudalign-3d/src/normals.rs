use rayon::prelude::*;

use crate::error::PointCloudError;
use crate::linalg::{dot3, sub3};
use crate::pointcloud::PointCloud;
use crate::spatial::SpatialIndex;

/// Minimum neighborhood size for a covariance estimate.
const MIN_NEIGHBORS: usize = 3;

/// Parameters for normal estimation.
#[derive(Debug, Clone)]
pub struct NormalEstimationParams {
    /// Neighborhood search radius.
    pub radius: f64,
    /// Maximum number of neighbors per point.
    pub max_nn: usize,
    /// Normals are flipped to point toward this location (camera-frame
    /// convention; scans carry the sensor at the origin).
    pub viewpoint: [f64; 3],
}

impl NormalEstimationParams {
    /// Parameters with the given search radius, a 30-neighbor cap and the
    /// viewpoint at the origin.
    pub fn with_radius(radius: f64) -> Self {
        Self {
            radius,
            max_nn: 30,
            viewpoint: [0.0; 3],
        }
    }
}

/// Estimate a unit surface normal for every point of `cloud`.
///
/// Each normal is the direction of least variance of the point's local
/// neighborhood: the singular vector of the smallest singular value of the
/// 3x3 neighborhood covariance. The sign is chosen so the normal faces the
/// configured viewpoint; global orientation consistency is not guaranteed.
///
/// `index` must be built over `cloud`. Fails with `DegenerateGeometry` when
/// any point has fewer than three neighbors inside the search radius or a
/// collinear/coincident neighborhood; a partial normal field would poison
/// every downstream stage, so the whole estimate aborts.
pub fn estimate_normals(
    cloud: &PointCloud,
    index: &SpatialIndex,
    params: &NormalEstimationParams,
) -> Result<Vec<[f64; 3]>, PointCloudError> {
    if params.radius <= 0.0 || !params.radius.is_finite() {
        return Err(PointCloudError::InvalidParameter(format!(
            "normal search radius must be positive and finite, got {}",
            params.radius
        )));
    }
    if params.max_nn < MIN_NEIGHBORS {
        return Err(PointCloudError::InvalidParameter(format!(
            "max_nn must be at least {MIN_NEIGHBORS}, got {}",
            params.max_nn
        )));
    }

    cloud
        .points()
        .par_iter()
        .enumerate()
        .map(|(i, point)| estimate_one(cloud, index, params, i, point))
        .collect()
}

fn estimate_one(
    cloud: &PointCloud,
    index: &SpatialIndex,
    params: &NormalEstimationParams,
    i: usize,
    point: &[f64; 3],
) -> Result<[f64; 3], PointCloudError> {
    let neighbors = index.hybrid(point, params.radius, params.max_nn);
    if neighbors.len() < MIN_NEIGHBORS {
        return Err(PointCloudError::DegenerateGeometry {
            index: i,
            reason: format!(
                "{} neighbors within radius {}, need {MIN_NEIGHBORS}",
                neighbors.len(),
                params.radius
            ),
        });
    }

    // neighborhood centroid
    let points = cloud.points();
    let mut centroid = [0.0; 3];
    for &(j, _) in &neighbors {
        let q = points[j];
        centroid[0] += q[0];
        centroid[1] += q[1];
        centroid[2] += q[2];
    }
    let inv_count = 1.0 / neighbors.len() as f64;
    centroid[0] *= inv_count;
    centroid[1] *= inv_count;
    centroid[2] *= inv_count;

    // 3x3 covariance of the neighborhood
    let mut cov = [[0.0; 3]; 3];
    for &(j, _) in &neighbors {
        let d = sub3(&points[j], &centroid);
        for (r, row) in cov.iter_mut().enumerate() {
            for (c, val) in row.iter_mut().enumerate() {
                *val += d[r] * d[c];
            }
        }
    }

    let cov = faer::Mat::<f64>::from_fn(3, 3, |r, c| cov[r][c]);
    let svd = cov.svd();
    let singular = svd.s_diagonal();
    if singular[1] <= singular[0] * 1e-10 {
        return Err(PointCloudError::DegenerateGeometry {
            index: i,
            reason: "collinear or coincident neighborhood".to_string(),
        });
    }

    // direction of least variance
    let u = svd.u();
    let mut normal = [u.read(0, 2), u.read(1, 2), u.read(2, 2)];

    let to_viewpoint = sub3(&params.viewpoint, point);
    if dot3(&normal, &to_viewpoint) < 0.0 {
        normal = [-normal[0], -normal[1], -normal[2]];
    }
    Ok(normal)
}
