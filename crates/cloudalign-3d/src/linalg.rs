//! Small fixed-size linear algebra helpers shared by the preprocessing and
//! registration stages. Points, rotations and translations are plain arrays;
//! `faer` is used where an actual matrix product or decomposition is needed.

/// Dot product of two 3-vectors.
#[inline]
pub fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Cross product of two 3-vectors.
#[inline]
pub fn cross3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Difference `a - b` of two 3-vectors.
#[inline]
pub fn sub3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Euclidean norm of a 3-vector.
#[inline]
pub fn norm3(a: &[f64; 3]) -> f64 {
    dot3(a, a).sqrt()
}

/// Euclidean distance between two points.
#[inline]
pub fn euclidean_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    norm3(&sub3(a, b))
}

/// Normalize a 3-vector in place. Vectors shorter than `1e-12` are left
/// untouched so callers can detect the degenerate case by length.
#[inline]
pub fn normalize3(a: &mut [f64; 3]) {
    let n = norm3(a);
    if n > 1e-12 {
        a[0] /= n;
        a[1] /= n;
        a[2] /= n;
    }
}

/// Product of two 3x3 matrices, written to `out`.
pub fn matmul33(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3], out: &mut [[f64; 3]; 3]) {
    for (i, row) in out.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
}

/// Apply a rotation to a single 3-vector.
#[inline]
pub fn rotate3(r: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
        r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
        r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
    ]
}

/// Transform a set of points with a rotation and translation.
///
/// The rotation is applied as one `faer` matrix product over a view of the
/// whole point slice rather than point by point.
///
/// PRECONDITION: `dst_points` is pre-allocated with the same length as
/// `src_points`.
pub fn transform_points3d(
    src_points: &[[f64; 3]],
    dst_r_src: &[[f64; 3]; 3],
    dst_t_src: &[f64; 3],
    dst_points: &mut [[f64; 3]],
) {
    assert_eq!(src_points.len(), dst_points.len());
    if src_points.is_empty() {
        return;
    }

    let rotation = faer::Mat::<f64>::from_fn(3, 3, |i, j| dst_r_src[i][j]);

    // view the source points as an Nx3 row-major matrix
    let points_in_src = {
        // SAFETY: [[f64; 3]] is layout-compatible with a contiguous f64 slice
        let flat = unsafe {
            std::slice::from_raw_parts(src_points.as_ptr() as *const f64, src_points.len() * 3)
        };
        faer::mat::from_row_major_slice(flat, src_points.len(), 3)
    };

    // view the destination points as a 3xN column-major matrix
    let mut points_in_dst = {
        // SAFETY: same layout argument as above, mutable
        let flat = unsafe {
            std::slice::from_raw_parts_mut(dst_points.as_mut_ptr() as *mut f64, dst_points.len() * 3)
        };
        faer::mat::from_column_major_slice_mut(flat, 3, dst_points.len())
    };

    faer::linalg::matmul::matmul(
        &mut points_in_dst,
        rotation.as_ref(),
        points_in_src.transpose(),
        None,
        1.0,
        faer::Parallelism::None,
    );

    for point in dst_points.iter_mut() {
        point[0] += dst_t_src[0];
        point[1] += dst_t_src[1];
        point[2] += dst_t_src[2];
    }
}

/// Rotate a set of vectors without translating them (e.g. surface normals).
///
/// PRECONDITION: `dst` is pre-allocated with the same length as `src`.
pub fn rotate_points3d(src: &[[f64; 3]], rotation: &[[f64; 3]; 3], dst: &mut [[f64; 3]]) {
    assert_eq!(src.len(), dst.len());
    for (out, v) in dst.iter_mut().zip(src.iter()) {
        *out = rotate3(rotation, v);
    }
}

/// The 4x4 identity transform.
pub fn identity_mat4() -> [[f64; 4]; 4] {
    let mut m = [[0.0; 4]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

/// Assemble a homogeneous transform from a rotation and translation.
pub fn compose_rt(rotation: &[[f64; 3]; 3], translation: &[f64; 3]) -> [[f64; 4]; 4] {
    let mut m = identity_mat4();
    for i in 0..3 {
        m[i][..3].copy_from_slice(&rotation[i]);
        m[i][3] = translation[i];
    }
    m
}

/// Split a homogeneous transform into its rotation and translation parts.
pub fn decompose_rt(m: &[[f64; 4]; 4]) -> ([[f64; 3]; 3], [f64; 3]) {
    let mut rotation = [[0.0; 3]; 3];
    let mut translation = [0.0; 3];
    for i in 0..3 {
        rotation[i].copy_from_slice(&m[i][..3]);
        translation[i] = m[i][3];
    }
    (rotation, translation)
}

/// Product `a * b` of two homogeneous transforms.
pub fn mat4_mul(a: &[[f64; 4]; 4], b: &[[f64; 4]; 4]) -> [[f64; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = (0..4).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Apply a homogeneous transform to a single point.
#[inline]
pub fn transform_point4(m: &[[f64; 4]; 4], p: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * p[0] + m[0][1] * p[1] + m[0][2] * p[2] + m[0][3],
        m[1][0] * p[0] + m[1][1] * p[1] + m[1][2] * p[2] + m[1][3],
        m[2][0] * p[0] + m[2][1] * p[1] + m[2][2] * p[2] + m[2][3],
    ]
}
