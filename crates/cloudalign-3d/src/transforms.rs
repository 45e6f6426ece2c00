//! Constructors for 3D rotation matrices.

use crate::linalg::{matmul33, normalize3};

/// Compute the rotation matrix for a rotation of `angle` radians around
/// `axis` (Rodrigues' formula). The axis does not need to be pre-normalized.
///
/// Example:
///
/// ```
/// use cloudalign_3d::transforms::axis_angle_to_rotation_matrix;
///
/// let rotation = axis_angle_to_rotation_matrix(&[1.0, 0.0, 0.0], std::f64::consts::PI / 2.0).unwrap();
/// assert!((rotation[1][2] - (-1.0)).abs() < 1e-12);
/// ```
pub fn axis_angle_to_rotation_matrix(
    axis: &[f64; 3],
    angle: f64,
) -> Result<[[f64; 3]; 3], &'static str> {
    let mut axis = *axis;
    if crate::linalg::norm3(&axis) < 1e-10 {
        return Err("cannot compute rotation matrix from a zero axis");
    }
    normalize3(&mut axis);
    let [x, y, z] = axis;

    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;

    Ok([
        [c + x * x * t, x * y * t - z * s, x * z * t + y * s],
        [x * y * t + z * s, c + y * y * t, y * z * t - x * s],
        [x * z * t - y * s, y * z * t + x * s, c + z * z * t],
    ])
}

/// Rotation matrix for intrinsic rotations of `alpha`, `beta`, `gamma`
/// radians around the x, y and z axes, composed as `Rz * Ry * Rx`.
///
/// This is the parameterization used to turn the 6-DoF increments of the
/// Gauss-Newton solvers back into a rigid motion.
pub fn euler_xyz_to_rotation_matrix(alpha: f64, beta: f64, gamma: f64) -> [[f64; 3]; 3] {
    let (sa, ca) = alpha.sin_cos();
    let (sb, cb) = beta.sin_cos();
    let (sg, cg) = gamma.sin_cos();

    let rx = [[1.0, 0.0, 0.0], [0.0, ca, -sa], [0.0, sa, ca]];
    let ry = [[cb, 0.0, sb], [0.0, 1.0, 0.0], [-sb, 0.0, cb]];
    let rz = [[cg, -sg, 0.0], [sg, cg, 0.0], [0.0, 0.0, 1.0]];

    let mut ryx = [[0.0; 3]; 3];
    matmul33(&ry, &rx, &mut ryx);
    let mut out = [[0.0; 3]; 3];
    matmul33(&rz, &ryx, &mut out);
    out
}

/// Rotation angle in radians encoded by a rotation matrix.
pub fn rotation_angle(rotation: &[[f64; 3]; 3]) -> f64 {
    let trace = rotation[0][0] + rotation[1][1] + rotation[2][2];
    ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
}
