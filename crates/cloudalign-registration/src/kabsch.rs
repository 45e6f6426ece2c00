//! Closed-form least-squares rigid alignment of paired point sets
//! (Kabsch / Umeyama without scale).

use crate::error::RegistrationError;

/// Minimum pairs needed to constrain a rigid transform.
pub const MIN_PAIRS: usize = 3;

/// Compute the rigid transform `(R, t)` minimizing the (optionally weighted)
/// sum of squared distances `Σ w_i |R·src_i + t - dst_i|²`.
///
/// The rotation comes from the SVD of the weighted cross-covariance between
/// the centered point sets, with the usual sign correction so the result is
/// a proper rotation (determinant +1) rather than a reflection.
pub fn fit_rigid_transform(
    src: &[[f64; 3]],
    dst: &[[f64; 3]],
    weights: Option<&[f64]>,
) -> Result<([[f64; 3]; 3], [f64; 3]), RegistrationError> {
    if src.len() != dst.len() {
        return Err(RegistrationError::InvalidParameter(format!(
            "point sets must pair up, got {} and {}",
            src.len(),
            dst.len()
        )));
    }
    if src.len() < MIN_PAIRS {
        return Err(RegistrationError::InsufficientPoints {
            got: src.len(),
            required: MIN_PAIRS,
        });
    }
    if let Some(weights) = weights {
        if weights.len() != src.len() {
            return Err(RegistrationError::InvalidParameter(format!(
                "got {} weights for {} pairs",
                weights.len(),
                src.len()
            )));
        }
    }
    let weight = |i: usize| weights.map_or(1.0, |w| w[i]);

    // weighted centroids
    let mut total_weight = 0.0;
    let mut src_centroid = [0.0; 3];
    let mut dst_centroid = [0.0; 3];
    for i in 0..src.len() {
        let w = weight(i);
        total_weight += w;
        for k in 0..3 {
            src_centroid[k] += w * src[i][k];
            dst_centroid[k] += w * dst[i][k];
        }
    }
    if total_weight <= 1e-12 {
        return Err(RegistrationError::DegenerateGeometry(
            "total correspondence weight is zero".to_string(),
        ));
    }
    for k in 0..3 {
        src_centroid[k] /= total_weight;
        dst_centroid[k] /= total_weight;
    }

    // weighted cross-covariance H = Σ w · (dst - μ_dst)(src - μ_src)^T
    let mut h = [[0.0; 3]; 3];
    for i in 0..src.len() {
        let w = weight(i);
        let sc = [
            src[i][0] - src_centroid[0],
            src[i][1] - src_centroid[1],
            src[i][2] - src_centroid[2],
        ];
        let dc = [
            dst[i][0] - dst_centroid[0],
            dst[i][1] - dst_centroid[1],
            dst[i][2] - dst_centroid[2],
        ];
        for (r, row) in h.iter_mut().enumerate() {
            for (c, val) in row.iter_mut().enumerate() {
                *val += w * dc[r] * sc[c];
            }
        }
    }

    let h = faer::Mat::<f64>::from_fn(3, 3, |i, j| h[i][j]);
    let svd = h.svd();
    let singular = svd.s_diagonal();
    if singular[1] <= singular[0] * 1e-12 {
        return Err(RegistrationError::DegenerateGeometry(
            "correspondences are collinear or coincident".to_string(),
        ));
    }
    let u = svd.u();
    let v = svd.v();

    // R = U · diag(1, 1, sign) · V^T, sign fixing a possible reflection
    let det_uv = det33_product(u, v);
    let sign = if det_uv < 0.0 { -1.0 } else { 1.0 };
    let mut rotation = [[0.0; 3]; 3];
    for (r, row) in rotation.iter_mut().enumerate() {
        for (c, val) in row.iter_mut().enumerate() {
            *val = u.read(r, 0) * v.read(c, 0)
                + u.read(r, 1) * v.read(c, 1)
                + sign * u.read(r, 2) * v.read(c, 2);
        }
    }

    let rotated = cloudalign_3d::linalg::rotate3(&rotation, &src_centroid);
    let translation = [
        dst_centroid[0] - rotated[0],
        dst_centroid[1] - rotated[1],
        dst_centroid[2] - rotated[2],
    ];

    Ok((rotation, translation))
}

/// Determinant of `U * V^T` for 3x3 faer views.
fn det33_product(u: faer::MatRef<'_, f64>, v: faer::MatRef<'_, f64>) -> f64 {
    let mut m = [[0.0; 3]; 3];
    for (r, row) in m.iter_mut().enumerate() {
        for (c, val) in row.iter_mut().enumerate() {
            *val = (0..3).map(|k| u.read(r, k) * v.read(c, k)).sum();
        }
    }
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cloudalign_3d::linalg::transform_points3d;
    use cloudalign_3d::transforms::axis_angle_to_rotation_matrix;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(rng: &mut StdRng, n: usize) -> Vec<[f64; 3]> {
        (0..n)
            .map(|_| [rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>()])
            .collect()
    }

    #[test]
    fn test_identity_alignment() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(11);
        let points = random_points(&mut rng, 30);
        let (rotation, translation) = fit_rigid_transform(&points, &points, None)?;

        for (i, row) in rotation.iter().enumerate() {
            for (j, val) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(*val, expected, epsilon = 1e-9);
            }
        }
        for t in translation {
            assert_relative_eq!(t, 0.0, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_recovers_known_transform() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(7);
        let src = random_points(&mut rng, 50);

        let expected_rotation = axis_angle_to_rotation_matrix(&[0.2, 1.0, -0.5], 0.8)?;
        let expected_translation = [0.4, -0.1, 0.9];
        let mut dst = vec![[0.0; 3]; src.len()];
        transform_points3d(&src, &expected_rotation, &expected_translation, &mut dst);

        let (rotation, translation) = fit_rigid_transform(&src, &dst, None)?;
        for i in 0..3 {
            assert_relative_eq!(translation[i], expected_translation[i], epsilon = 1e-9);
            for j in 0..3 {
                assert_relative_eq!(rotation[i][j], expected_rotation[i][j], epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn test_zero_weight_outlier_is_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(3);
        let src = random_points(&mut rng, 20);

        let expected_rotation = axis_angle_to_rotation_matrix(&[0.0, 0.0, 1.0], 0.3)?;
        let expected_translation = [1.0, 0.0, 0.0];
        let mut dst = vec![[0.0; 3]; src.len()];
        transform_points3d(&src, &expected_rotation, &expected_translation, &mut dst);

        // corrupt one pair, then weight it out
        dst[5] = [100.0, -50.0, 30.0];
        let mut weights = vec![1.0; src.len()];
        weights[5] = 0.0;

        let (rotation, translation) = fit_rigid_transform(&src, &dst, Some(&weights))?;
        for i in 0..3 {
            assert_relative_eq!(translation[i], expected_translation[i], epsilon = 1e-9);
            for j in 0..3 {
                assert_relative_eq!(rotation[i][j], expected_rotation[i][j], epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn test_rejects_short_input() {
        let points = vec![[0.0; 3], [1.0, 0.0, 0.0]];
        assert!(matches!(
            fit_rigid_transform(&points, &points, None),
            Err(RegistrationError::InsufficientPoints { got: 2, required: 3 })
        ));
    }

    #[test]
    fn test_rejects_collinear_points() {
        let src = vec![[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [3.0, 0.0, 0.0]];
        let dst = vec![[0.0; 3], [0.0, 1.0, 0.0], [0.0, 2.0, 0.0], [0.0, 3.0, 0.0]];
        assert!(matches!(
            fit_rigid_transform(&src, &dst, None),
            Err(RegistrationError::DegenerateGeometry(_))
        ));
    }
}
