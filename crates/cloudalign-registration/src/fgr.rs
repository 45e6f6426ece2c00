//! Fast Global Registration: graduated non-convexity over a robust
//! Geman-McClure loss on mutual feature matches. Deterministic: no
//! sampling is involved at any point.

use faer::prelude::SpSolverLstsq;
use rayon::prelude::*;

use cloudalign_3d::features::Descriptor;
use cloudalign_3d::linalg::{
    compose_rt, euclidean_distance, identity_mat4, mat4_mul, transform_point4,
};
use cloudalign_3d::pointcloud::PointCloud;
use cloudalign_3d::spatial::SpatialIndex;
use cloudalign_3d::transforms::euler_xyz_to_rotation_matrix;

use crate::error::RegistrationError;
use crate::matching::mutual_matches;
use crate::ransac::validate_inputs;
use crate::result::{evaluate_registration, RegistrationResult, Termination};

/// Parameters for Fast Global Registration.
#[derive(Debug, Clone)]
pub struct FgrParams {
    /// Correspondence distance threshold; also the floor of the graduated
    /// robustness scale.
    pub max_correspondence_distance: f64,
    /// Number of outer (graduated non-convexity) iterations.
    pub iteration_number: usize,
    /// Factor by which the robustness scale shrinks.
    pub division_factor: f64,
    /// The scale shrinks once every this many outer iterations.
    pub decrease_mu_every: usize,
    /// Edge-length window of the correspondence consistency test.
    pub tuple_scale: f64,
    /// Whether to run the consistency test at all.
    pub tuple_test: bool,
}

impl FgrParams {
    /// Conventional parameters for a given correspondence distance
    /// threshold: 64 iterations, division factor 1.4, tuple scale 0.95.
    pub fn with_distance(max_correspondence_distance: f64) -> Self {
        Self {
            max_correspondence_distance,
            iteration_number: 64,
            division_factor: 1.4,
            decrease_mu_every: 4,
            tuple_scale: 0.95,
            tuple_test: true,
        }
    }
}

/// Register `source` onto `target` without a pose prior by optimizing a
/// Geman-McClure loss over mutual feature matches with graduated
/// non-convexity.
///
/// Each outer iteration re-weights every correspondence by
/// `w = (mu / (mu + d^2))^2` and performs one Gauss-Newton update of the
/// 6-DoF rigid motion; `mu` starts at the squared span of the target cloud
/// and shrinks toward the squared distance threshold, so the loss sharpens
/// from near-quadratic to strongly outlier-rejecting. The whole procedure
/// is deterministic given identical inputs.
pub fn register_fast_global(
    source: &PointCloud,
    target: &PointCloud,
    source_descriptors: &[Descriptor],
    target_descriptors: &[Descriptor],
    params: &FgrParams,
) -> Result<RegistrationResult, RegistrationError> {
    validate_inputs(
        source,
        target,
        source_descriptors,
        target_descriptors,
        params.max_correspondence_distance,
    )?;

    let mut matches = mutual_matches(source_descriptors, target_descriptors);
    if params.tuple_test {
        let pruned = tuple_prune(&matches, source, target, params.tuple_scale);
        if pruned.len() >= 3 {
            matches = pruned;
        } else {
            log::debug!("fgr: tuple test left {} matches, keeping unpruned set", pruned.len());
        }
    }
    if matches.len() < 3 {
        log::debug!("fgr: only {} mutual matches", matches.len());
        return Ok(RegistrationResult::degenerate());
    }

    let src: Vec<[f64; 3]> = matches.iter().map(|&(i, _)| source.points()[i]).collect();
    let dst: Vec<[f64; 3]> = matches.iter().map(|&(_, j)| target.points()[j]).collect();

    // graduated robustness scale, floored at the squared distance threshold
    let span = euclidean_distance(&target.min_bound(), &target.max_bound());
    let mu_floor = params.max_correspondence_distance.powi(2);
    let mut mu = (span * span).max(mu_floor);

    let mut transformation = identity_mat4();

    for iteration in 0..params.iteration_number {
        // residuals and Geman-McClure weights under the current estimate
        let transformed: Vec<[f64; 3]> = src
            .par_iter()
            .map(|p| transform_point4(&transformation, p))
            .collect();
        let weights: Vec<f64> = transformed
            .par_iter()
            .zip(dst.par_iter())
            .map(|(p, q)| {
                let d2 = euclidean_distance(p, q).powi(2);
                let ratio = mu / (mu + d2);
                ratio * ratio
            })
            .collect();

        let update = gauss_newton_step(&transformed, &dst, &weights)?;
        transformation = mat4_mul(&update, &transformation);

        if params.decrease_mu_every > 0 && (iteration + 1) % params.decrease_mu_every == 0 {
            mu = (mu / params.division_factor).max(mu_floor);
        }
        if iteration % 16 == 0 {
            let total: f64 = weights.iter().sum();
            log::debug!("fgr: iteration {iteration}, mu {mu:.6}, weight mass {total:.2}");
        }
    }

    let target_index = SpatialIndex::build(target)?;
    let (fitness, rmse, correspondences) = evaluate_registration(
        source,
        &target_index,
        &transformation,
        params.max_correspondence_distance,
    );
    Ok(RegistrationResult {
        transformation,
        fitness,
        inlier_rmse: rmse,
        correspondences,
        termination: Termination::Converged,
        num_iterations: params.iteration_number,
    })
}

/// One weighted Gauss-Newton update of the 6-DoF rigid motion for
/// point-to-point residuals. Rows are scaled by the square root of each
/// correspondence weight and the 6-vector `(alpha, beta, gamma, tx, ty, tz)`
/// is solved by QR least squares.
fn gauss_newton_step(
    src: &[[f64; 3]],
    dst: &[[f64; 3]],
    weights: &[f64],
) -> Result<[[f64; 4]; 4], RegistrationError> {
    let rows = 3 * src.len();
    let mut mat_a = faer::Mat::<f64>::zeros(rows, 6);
    let mut mat_b = faer::Mat::<f64>::zeros(rows, 1);

    for (k, (p, q)) in src.iter().zip(dst.iter()).enumerate() {
        let w = weights[k].sqrt();
        let r = k * 3;
        // d/d(omega) of (p + omega x p) = -[p]_x
        mat_a.write(r, 1, w * p[2]);
        mat_a.write(r, 2, w * -p[1]);
        mat_a.write(r, 3, w);
        mat_a.write(r + 1, 0, w * -p[2]);
        mat_a.write(r + 1, 2, w * p[0]);
        mat_a.write(r + 1, 4, w);
        mat_a.write(r + 2, 0, w * p[1]);
        mat_a.write(r + 2, 1, w * -p[0]);
        mat_a.write(r + 2, 5, w);

        mat_b.write(r, 0, w * (q[0] - p[0]));
        mat_b.write(r + 1, 0, w * (q[1] - p[1]));
        mat_b.write(r + 2, 0, w * (q[2] - p[2]));
    }

    let solution = mat_a.qr().solve_lstsq(mat_b);
    let xi: Vec<f64> = (0..6).map(|i| solution.read(i, 0)).collect();
    if xi.iter().any(|v| !v.is_finite()) {
        return Err(RegistrationError::ConvergenceFailure(
            "non-finite Gauss-Newton update".to_string(),
        ));
    }

    let rotation = euler_xyz_to_rotation_matrix(xi[0], xi[1], xi[2]);
    Ok(compose_rt(&rotation, &[xi[3], xi[4], xi[5]]))
}

/// Deterministic replacement for FGR's randomized tuple test: successive
/// triples of the match list must have scale-consistent edge lengths in
/// source and target; correspondences of failing triples are dropped.
fn tuple_prune(
    matches: &[(usize, usize)],
    source: &PointCloud,
    target: &PointCloud,
    tuple_scale: f64,
) -> Vec<(usize, usize)> {
    let inv_scale = 1.0 / tuple_scale;
    let mut kept = Vec::with_capacity(matches.len());

    for triple in matches.chunks_exact(3) {
        let mut consistent = true;
        for a in 0..3 {
            for b in (a + 1)..3 {
                let d_src = euclidean_distance(
                    &source.points()[triple[a].0],
                    &source.points()[triple[b].0],
                );
                let d_dst = euclidean_distance(
                    &target.points()[triple[a].1],
                    &target.points()[triple[b].1],
                );
                if d_dst <= 0.0 || d_src <= 0.0 {
                    consistent = false;
                    break;
                }
                let ratio = d_src / d_dst;
                if ratio < tuple_scale || ratio > inv_scale {
                    consistent = false;
                    break;
                }
            }
            if !consistent {
                break;
            }
        }
        if consistent {
            kept.extend_from_slice(triple);
        }
    }
    kept
}
