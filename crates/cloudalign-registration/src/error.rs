use thiserror::Error;

use cloudalign_3d::PointCloudError;

/// Errors produced by the registration stages.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// A parameter or input combination is invalid.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Not enough points or correspondences for the requested estimate.
    #[error("got {got} correspondences, the estimate requires at least {required}")]
    InsufficientPoints {
        /// Number of available points/correspondences.
        got: usize,
        /// Minimum required.
        required: usize,
    },

    /// The point configuration does not constrain a rigid transform.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// An iterative solver produced a non-finite update.
    #[error("optimization diverged: {0}")]
    ConvergenceFailure(String),

    /// Nearest-neighbor search found no correspondence within the threshold.
    #[error("no correspondences within distance {max_distance}")]
    NoCorrespondences {
        /// The correspondence distance threshold in effect.
        max_distance: f64,
    },

    /// A preprocessing error bubbled up from the 3d crate.
    #[error(transparent)]
    Cloud(#[from] PointCloudError),
}
