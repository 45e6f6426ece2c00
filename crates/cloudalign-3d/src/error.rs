use thiserror::Error;

/// Errors produced while building or preprocessing point clouds.
#[derive(Debug, Error)]
pub enum PointCloudError {
    /// A scalar parameter is outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The cloud does not contain enough points for the requested operation.
    #[error("cloud has {got} points, the operation requires at least {required}")]
    InsufficientPoints {
        /// Number of points in the cloud.
        got: usize,
        /// Minimum number of points required.
        required: usize,
    },

    /// A local neighborhood is too small or ill-conditioned to support the
    /// requested estimate (coincident or collinear points).
    #[error("degenerate neighborhood around point {index}: {reason}")]
    DegenerateGeometry {
        /// Index of the offending point.
        index: usize,
        /// What made the neighborhood unusable.
        reason: String,
    },

    /// Optional per-point attributes must match the point count.
    #[error("attribute length {attribute_len} does not match point count {points_len}")]
    MismatchedLengths {
        /// Length of the offending attribute vector.
        attribute_len: usize,
        /// Number of points in the cloud.
        points_len: usize,
    },
}
