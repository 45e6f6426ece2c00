use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use cloudalign_3d::linalg::{euclidean_distance, identity_mat4, transform_point4};
use cloudalign_3d::pointcloud::PointCloud;
use cloudalign_3d::spatial::SpatialIndex;

/// A matched point pair between the source and target clouds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Index into the source cloud.
    pub source_idx: usize,
    /// Index into the target cloud.
    pub target_idx: usize,
    /// Euclidean distance between the transformed source point and the
    /// target point.
    pub distance: f64,
}

/// How a registration stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The stage met its convergence criteria.
    Converged,
    /// The iteration budget ran out before convergence.
    MaxIterations,
    /// The stage could not produce a meaningful estimate; the transform is
    /// identity-adjacent and the fitness is zero.
    Degenerate,
}

/// Output contract of every registration stage.
///
/// The transformation is a rigid homogeneous matrix mapping source points
/// onto the target frame: rotation block orthonormal with determinant 1,
/// bottom row `[0, 0, 0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResult {
    /// Rigid transform from the (untransformed) source cloud to the target.
    pub transformation: [[f64; 4]; 4],
    /// Fraction of source points with a correspondence inside the distance
    /// threshold.
    pub fitness: f64,
    /// Root-mean-square distance over the correspondence set.
    pub inlier_rmse: f64,
    /// The correspondences backing `fitness` and `inlier_rmse`.
    pub correspondences: Vec<Correspondence>,
    /// How the stage ended.
    pub termination: Termination,
    /// Number of iterations the stage performed.
    pub num_iterations: usize,
}

impl RegistrationResult {
    /// The zero-fitness fallback returned when a global stage cannot accept
    /// any candidate: identity transform, no correspondences, flagged
    /// degenerate.
    pub fn degenerate() -> Self {
        Self {
            transformation: identity_mat4(),
            fitness: 0.0,
            inlier_rmse: 0.0,
            correspondences: Vec::new(),
            termination: Termination::Degenerate,
            num_iterations: 0,
        }
    }

    /// Whether this is a degenerate (zero-fitness fallback) result.
    pub fn is_degenerate(&self) -> bool {
        self.termination == Termination::Degenerate
    }
}

/// Measure how well `transformation` aligns `source` onto the indexed
/// target: fitness, inlier RMSE and the correspondence set of every source
/// point whose nearest target neighbor lies within `max_distance`.
pub fn evaluate_registration(
    source: &PointCloud,
    target_index: &SpatialIndex,
    transformation: &[[f64; 4]; 4],
    max_distance: f64,
) -> (f64, f64, Vec<Correspondence>) {
    let correspondences: Vec<Correspondence> = source
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
        .collect();

    summarize(source.len(), &correspondences)
}

/// Fitness and RMSE of an already-built correspondence set.
pub(crate) fn summarize(
    source_len: usize,
    correspondences: &[Correspondence],
) -> (f64, f64, Vec<Correspondence>) {
    if correspondences.is_empty() || source_len == 0 {
        return (0.0, 0.0, correspondences.to_vec());
    }
    let fitness = correspondences.len() as f64 / source_len as f64;
    let sq_sum: f64 = correspondences.iter().map(|c| c.distance * c.distance).sum();
    let rmse = (sq_sum / correspondences.len() as f64).sqrt();
    (fitness, rmse, correspondences.to_vec())
}

/// Check a correspondence set against a transformed source and target cloud:
/// in-range indices and distances consistent with the transform.
pub fn correspondences_are_valid(
    correspondences: &[Correspondence],
    source: &PointCloud,
    target: &PointCloud,
    transformation: &[[f64; 4]; 4],
    max_distance: f64,
) -> bool {
    correspondences.iter().all(|c| {
        if c.source_idx >= source.len() || c.target_idx >= target.len() {
            return false;
        }
        let transformed = transform_point4(transformation, &source.points()[c.source_idx]);
        let distance = euclidean_distance(&transformed, &target.points()[c.target_idx]);
        distance <= max_distance && (distance - c.distance).abs() < 1e-9
    })
}
