//! Point-to-plane Iterative Closest Point refinement.

use faer::prelude::SpSolverLstsq;
use rayon::prelude::*;

use cloudalign_3d::linalg::{
    compose_rt, cross3, dot3, mat4_mul, sub3, transform_point4,
};
use cloudalign_3d::pointcloud::PointCloud;
use cloudalign_3d::spatial::SpatialIndex;
use cloudalign_3d::transforms::euler_xyz_to_rotation_matrix;

use crate::error::RegistrationError;
use crate::result::{summarize, Correspondence, RegistrationResult, Termination};

/// Convergence criteria for ICP.
#[derive(Debug, Clone)]
pub struct IcpCriteria {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Converged once the fitness change between consecutive iterations
    /// drops below this value...
    pub relative_fitness: f64,
    /// ...and the RMSE change drops below this one.
    pub relative_rmse: f64,
}

impl Default for IcpCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            relative_fitness: 1e-6,
            relative_rmse: 1e-6,
        }
    }
}

/// Refine an initial transform by point-to-plane ICP.
///
/// Starting from `initial`, each iteration transforms the source, pairs
/// every transformed point with its nearest target neighbor within
/// `max_correspondence_distance`, and solves the linearized point-to-plane
/// system for a 6-DoF increment that is composed onto the running estimate.
/// The returned transform therefore maps the original, untransformed source
/// onto the target.
///
/// The target cloud must carry normals. An empty correspondence set at any
/// iteration fails with `NoCorrespondences`; exhausting the iteration cap is
/// not an error; the best estimate is returned flagged
/// [`Termination::MaxIterations`].
pub fn register_point_to_plane(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f64,
    initial: &[[f64; 4]; 4],
    criteria: &IcpCriteria,
) -> Result<RegistrationResult, RegistrationError> {
    if max_correspondence_distance <= 0.0 || !max_correspondence_distance.is_finite() {
        return Err(RegistrationError::InvalidParameter(format!(
            "max correspondence distance must be positive and finite, got {max_correspondence_distance}"
        )));
    }
    let target_normals = target.normals().ok_or_else(|| {
        RegistrationError::InvalidParameter(
            "point-to-plane ICP requires target normals".to_string(),
        )
    })?;
    if source.is_empty() {
        return Err(RegistrationError::InsufficientPoints {
            got: 0,
            required: 1,
        });
    }

    let target_index = SpatialIndex::build(target)?;
    let target_points = target.points();

    let mut transformation = *initial;
    let mut prev_fitness = 0.0;
    let mut prev_rmse = f64::INFINITY;
    let mut termination = Termination::MaxIterations;
    let mut num_iterations = 0;

    for iteration in 0..criteria.max_iterations {
        num_iterations = iteration + 1;

        let correspondences = find_correspondences(
            source,
            &target_index,
            &transformation,
            max_correspondence_distance,
        );
        if correspondences.is_empty() {
            return Err(RegistrationError::NoCorrespondences {
                max_distance: max_correspondence_distance,
            });
        }

        let (fitness, rmse, _) = summarize(source.len(), &correspondences);
        log::debug!(
            "icp: iteration {iteration}: {} correspondences, fitness {fitness:.4}, rmse {rmse:.6}",
            correspondences.len()
        );

        if iteration > 0
            && (fitness - prev_fitness).abs() < criteria.relative_fitness
            && (rmse - prev_rmse).abs() < criteria.relative_rmse
        {
            termination = Termination::Converged;
            break;
        }
        prev_fitness = fitness;
        prev_rmse = rmse;

        let update = solve_point_to_plane(
            source,
            target_points,
            target_normals,
            &transformation,
            &correspondences,
        )?;
        transformation = mat4_mul(&update, &transformation);
    }

    // the final correspondence set under the final transform
    let correspondences = find_correspondences(
        source,
        &target_index,
        &transformation,
        max_correspondence_distance,
    );
    if correspondences.is_empty() {
        return Err(RegistrationError::NoCorrespondences {
            max_distance: max_correspondence_distance,
        });
    }
    let (fitness, inlier_rmse, correspondences) = summarize(source.len(), &correspondences);

    Ok(RegistrationResult {
        transformation,
        fitness,
        inlier_rmse,
        correspondences,
        termination,
        num_iterations,
    })
}

/// Nearest-neighbor correspondences of the transformed source within the
/// distance threshold.
fn find_correspondences(
    source: &PointCloud,
    target_index: &SpatialIndex,
    transformation: &[[f64; 4]; 4],
    max_distance: f64,
) -> Vec<Correspondence> {
    source
        .points()
        .par_iter()
        .enumerate()
        .filter_map(|(i, point)| {
            let transformed = transform_point4(transformation, point);
            let (j, distance) = target_index.nearest_one(&transformed);
            (distance <= max_distance).then_some(Correspondence {
                source_idx: i,
                target_idx: j,
                distance,
            })
        })
        .collect()
}

/// Solve the linearized point-to-plane system for one 6-DoF increment.
///
/// For each correspondence with transformed source point `p`, target point
/// `q` and target normal `n`, the residual `n . (p - q)` is linearized
/// around the current estimate, giving the row `[(p x n)^T  n^T]` of the
/// least-squares system solved by QR.
fn solve_point_to_plane(
    source: &PointCloud,
    target_points: &[[f64; 3]],
    target_normals: &[[f64; 3]],
    transformation: &[[f64; 4]; 4],
    correspondences: &[Correspondence],
) -> Result<[[f64; 4]; 4], RegistrationError> {
    if correspondences.len() < 6 {
        return Err(RegistrationError::InsufficientPoints {
            got: correspondences.len(),
            required: 6,
        });
    }
    let mut mat_a = faer::Mat::<f64>::zeros(correspondences.len(), 6);
    let mut mat_b = faer::Mat::<f64>::zeros(correspondences.len(), 1);

    for (row, c) in correspondences.iter().enumerate() {
        let p = transform_point4(transformation, &source.points()[c.source_idx]);
        let q = target_points[c.target_idx];
        let n = target_normals[c.target_idx];

        let axis = cross3(&p, &n);
        mat_a.write(row, 0, axis[0]);
        mat_a.write(row, 1, axis[1]);
        mat_a.write(row, 2, axis[2]);
        mat_a.write(row, 3, n[0]);
        mat_a.write(row, 4, n[1]);
        mat_a.write(row, 5, n[2]);
        mat_b.write(row, 0, -dot3(&n, &sub3(&p, &q)));
    }

    let solution = mat_a.qr().solve_lstsq(mat_b);
    let xi: Vec<f64> = (0..6).map(|i| solution.read(i, 0)).collect();
    if xi.iter().any(|v| !v.is_finite()) {
        return Err(RegistrationError::ConvergenceFailure(
            "non-finite point-to-plane update".to_string(),
        ));
    }

    let rotation = euler_xyz_to_rotation_matrix(xi[0], xi[1], xi[2]);
    Ok(compose_rt(&rotation, &[xi[3], xi[4], xi[5]]))
}
