//! Fast Point Feature Histograms (FPFH).
//!
//! Each point gets a 33-dimensional rotation/translation-invariant histogram
//! of the angular relations between its normal and the normals of its
//! neighbors, computed in two passes: a per-point simplified histogram
//! (SPFH), then a distance-weighted aggregation over the neighborhood.

use rayon::prelude::*;

use crate::error::PointCloudError;
use crate::linalg::{cross3, dot3, norm3, normalize3, sub3};
use crate::pointcloud::PointCloud;
use crate::spatial::SpatialIndex;

/// Bins per angular feature.
pub const FPFH_BINS: usize = 11;

/// Total descriptor length (three angular features).
pub const FPFH_DIM: usize = 3 * FPFH_BINS;

/// A single FPFH descriptor.
pub type Descriptor = [f64; FPFH_DIM];

/// Parameters for FPFH computation.
#[derive(Debug, Clone)]
pub struct FpfhParams {
    /// Neighborhood search radius.
    pub radius: f64,
    /// Maximum number of neighbors per point.
    pub max_nn: usize,
}

impl FpfhParams {
    /// Parameters with the given search radius and a 100-neighbor cap.
    pub fn with_radius(radius: f64) -> Self {
        Self {
            radius,
            max_nn: 100,
        }
    }
}

/// Compute one FPFH descriptor per point of `cloud`, in point order.
///
/// `cloud` must carry unit normals and `index` must be built over it. Points
/// whose neighborhood is empty keep an all-zero histogram; the descriptor
/// length is 33 regardless of neighborhood size.
pub fn compute_fpfh(
    cloud: &PointCloud,
    index: &SpatialIndex,
    params: &FpfhParams,
) -> Result<Vec<Descriptor>, PointCloudError> {
    if params.radius <= 0.0 || !params.radius.is_finite() {
        return Err(PointCloudError::InvalidParameter(format!(
            "feature search radius must be positive and finite, got {}",
            params.radius
        )));
    }
    let normals = cloud.normals().ok_or_else(|| {
        PointCloudError::InvalidParameter(
            "FPFH requires a cloud with estimated normals".to_string(),
        )
    })?;
    let points = cloud.points();

    // pass 1: SPFH per point, plus the neighbor list reused by pass 2
    let spfh: Vec<(Descriptor, Vec<(usize, f64)>)> = points
        .par_iter()
        .enumerate()
        .map(|(i, point)| {
            let mut neighbors = index.hybrid(point, params.radius, params.max_nn);
            neighbors.retain(|&(j, _)| j != i);

            let mut histogram = [0.0; FPFH_DIM];
            if !neighbors.is_empty() {
                let increment = 100.0 / neighbors.len() as f64;
                for &(j, _) in &neighbors {
                    if let Some((alpha, phi, theta)) =
                        pair_features(point, &normals[i], &points[j], &normals[j])
                    {
                        histogram[bin_unit(alpha)] += increment;
                        histogram[FPFH_BINS + bin_unit(phi)] += increment;
                        histogram[2 * FPFH_BINS + bin_angle(theta)] += increment;
                    }
                }
            }
            (histogram, neighbors)
        })
        .collect();

    // pass 2: own SPFH plus the distance-weighted neighbor histograms, each
    // 11-bin segment renormalized to sum 100 before the addition
    let descriptors = spfh
        .par_iter()
        .map(|(own, neighbors)| {
            let mut fpfh = [0.0; FPFH_DIM];
            for &(j, dist) in neighbors {
                if dist <= 0.0 {
                    continue;
                }
                let weight = 1.0 / dist;
                for (bin, value) in fpfh.iter_mut().zip(spfh[j].0.iter()) {
                    *bin += value * weight;
                }
            }
            for segment in 0..3 {
                let range = segment * FPFH_BINS..(segment + 1) * FPFH_BINS;
                let sum: f64 = fpfh[range.clone()].iter().sum();
                if sum > 0.0 {
                    let scale = 100.0 / sum;
                    for bin in &mut fpfh[range] {
                        *bin *= scale;
                    }
                }
            }
            for (bin, value) in fpfh.iter_mut().zip(own.iter()) {
                *bin += value;
            }
            fpfh
        })
        .collect();

    Ok(descriptors)
}

/// The three Darboux-frame angles between an oriented point pair.
///
/// The pair is re-oriented so the source role falls on the point whose
/// normal deviates less from the connecting line, which makes the features
/// independent of argument order. Returns `None` for coincident points or a
/// connecting line parallel to the source normal.
fn pair_features(
    p1: &[f64; 3],
    n1: &[f64; 3],
    p2: &[f64; 3],
    n2: &[f64; 3],
) -> Option<(f64, f64, f64)> {
    let mut d = sub3(p2, p1);
    let dist = norm3(&d);
    if dist <= 0.0 {
        return None;
    }
    d[0] /= dist;
    d[1] /= dist;
    d[2] /= dist;

    let mut u = *n1;
    let mut n2 = *n2;
    let angle1 = dot3(&u, &d);
    let angle2 = dot3(&n2, &d);
    if angle1.abs() < angle2.abs() {
        std::mem::swap(&mut u, &mut n2);
        d = [-d[0], -d[1], -d[2]];
    }

    let mut v = cross3(&d, &u);
    if norm3(&v) <= 1e-12 {
        return None;
    }
    normalize3(&mut v);
    let w = cross3(&u, &v);

    let alpha = dot3(&v, &n2);
    let phi = dot3(&u, &d);
    let theta = dot3(&w, &n2).atan2(dot3(&u, &n2));
    Some((alpha, phi, theta))
}

/// Bin index for a feature in [-1, 1].
#[inline]
fn bin_unit(value: f64) -> usize {
    let bin = (FPFH_BINS as f64 * (value + 1.0) * 0.5).floor() as isize;
    bin.clamp(0, FPFH_BINS as isize - 1) as usize
}

/// Bin index for an angle in [-pi, pi].
#[inline]
fn bin_angle(value: f64) -> usize {
    let bin =
        (FPFH_BINS as f64 * (value + std::f64::consts::PI) / (2.0 * std::f64::consts::PI)).floor()
            as isize;
    bin.clamp(0, FPFH_BINS as isize - 1) as usize
}
