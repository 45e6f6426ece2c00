//! The three-operation facade of the registration pipeline:
//! [`preprocess`], [`global_register`] and [`refine`].
//!
//! Search radii and distance thresholds are all derived from the voxel size
//! with the conventional multipliers: normals at 2x (30 neighbors), FPFH at
//! 5x (100 neighbors), global registration threshold at 1.5x, refinement
//! threshold at 0.4x.

use rand::rngs::StdRng;
use rand::SeedableRng;

use cloudalign_3d::features::{compute_fpfh, Descriptor, FpfhParams};
use cloudalign_3d::normals::{estimate_normals, NormalEstimationParams};
use cloudalign_3d::pointcloud::PointCloud;
use cloudalign_3d::spatial::SpatialIndex;
use cloudalign_3d::voxelgrid::VoxelGrid;

use crate::error::RegistrationError;
use crate::fgr::{register_fast_global, FgrParams};
use crate::icp::{register_point_to_plane, IcpCriteria};
use crate::ransac::{register_ransac, RansacParams};
use crate::result::RegistrationResult;

/// Which global registration algorithm to run.
///
/// A closed enum instead of a method-name string: an unsupported choice is
/// unrepresentable, and matching on it is checked exhaustively at compile
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalStrategy {
    /// RANSAC over feature matches, sampled from an RNG seeded with this
    /// value so runs are reproducible.
    Ransac {
        /// Seed of the sampling RNG.
        seed: u64,
    },
    /// Fast Global Registration; fully deterministic, no seed involved.
    FastGlobal,
}

fn validate_voxel_size(voxel_size: f64) -> Result<(), RegistrationError> {
    if voxel_size <= 0.0 || !voxel_size.is_finite() {
        return Err(RegistrationError::InvalidParameter(format!(
            "voxel size must be positive and finite, got {voxel_size}"
        )));
    }
    Ok(())
}

/// Downsample a raw cloud and compute its FPFH descriptors.
///
/// Returns the downsampled cloud (carrying estimated normals) together with
/// one descriptor per downsampled point. The spatial index is built once and
/// shared by normal estimation and feature computation.
pub fn preprocess(
    cloud: &PointCloud,
    voxel_size: f64,
) -> Result<(PointCloud, Vec<Descriptor>), RegistrationError> {
    validate_voxel_size(voxel_size)?;

    let downsampled = VoxelGrid::new(voxel_size)?.downsample(cloud)?;
    log::debug!(
        "preprocess: downsampled {} -> {} points at voxel size {voxel_size}",
        cloud.len(),
        downsampled.len()
    );

    let index = SpatialIndex::build(&downsampled)?;
    let normals = estimate_normals(
        &downsampled,
        &index,
        &NormalEstimationParams::with_radius(voxel_size * 2.0),
    )?;
    let downsampled = downsampled.with_normals(normals)?;

    let descriptors = compute_fpfh(
        &downsampled,
        &index,
        &FpfhParams::with_radius(voxel_size * 5.0),
    )?;
    Ok((downsampled, descriptors))
}

/// Coarse, pose-free alignment of the downsampled clouds.
///
/// The correspondence distance threshold is `1.5 * voxel_size`. A stage that
/// cannot accept any candidate returns a zero-fitness result flagged
/// degenerate rather than an error.
pub fn global_register(
    source_down: &PointCloud,
    target_down: &PointCloud,
    source_descriptors: &[Descriptor],
    target_descriptors: &[Descriptor],
    voxel_size: f64,
    strategy: GlobalStrategy,
) -> Result<RegistrationResult, RegistrationError> {
    validate_voxel_size(voxel_size)?;
    let distance_threshold = voxel_size * 1.5;

    match strategy {
        GlobalStrategy::Ransac { seed } => {
            log::debug!("global_register: RANSAC, threshold {distance_threshold}, seed {seed}");
            let mut rng = StdRng::seed_from_u64(seed);
            register_ransac(
                source_down,
                target_down,
                source_descriptors,
                target_descriptors,
                &RansacParams::with_distance(distance_threshold),
                &mut rng,
            )
        }
        GlobalStrategy::FastGlobal => {
            log::debug!("global_register: FGR, threshold {distance_threshold}");
            register_fast_global(
                source_down,
                target_down,
                source_descriptors,
                target_descriptors,
                &FgrParams::with_distance(distance_threshold),
            )
        }
    }
}

/// Refine a coarse transform on the full-resolution clouds with
/// point-to-plane ICP at a strict `0.4 * voxel_size` distance threshold.
///
/// Point-to-plane needs target normals; when the target cloud does not carry
/// any (loaders often drop them), they are estimated here first.
pub fn refine(
    source: &PointCloud,
    target: &PointCloud,
    initial_transform: &[[f64; 4]; 4],
    voxel_size: f64,
) -> Result<RegistrationResult, RegistrationError> {
    validate_voxel_size(voxel_size)?;
    let distance_threshold = voxel_size * 0.4;

    let target_owned;
    let target = if target.normals().is_some() {
        target
    } else {
        log::debug!("refine: target carries no normals, estimating");
        let index = SpatialIndex::build(target)?;
        let normals = estimate_normals(
            target,
            &index,
            &NormalEstimationParams::with_radius(voxel_size * 2.0),
        )?;
        target_owned = target.with_normals(normals)?;
        &target_owned
    };

    register_point_to_plane(
        source,
        target,
        distance_threshold,
        initial_transform,
        &IcpCriteria::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudalign_3d::linalg::identity_mat4;

    #[test]
    fn test_invalid_voxel_size_fails_loudly() {
        let cloud = PointCloud::from_points(vec![[0.0; 3], [1.0, 0.0, 0.0]]);
        assert!(matches!(
            preprocess(&cloud, 0.0),
            Err(RegistrationError::InvalidParameter(_))
        ));
        assert!(matches!(
            refine(&cloud, &cloud, &identity_mat4(), -1.0),
            Err(RegistrationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_preprocess_empty_cloud_fails() {
        let cloud = PointCloud::from_points(vec![]);
        assert!(preprocess(&cloud, 0.1).is_err());
    }
}
