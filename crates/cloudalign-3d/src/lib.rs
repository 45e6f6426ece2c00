#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the preprocessing stages.
pub mod error;
pub use error::PointCloudError;

/// Linear algebra utilities.
pub mod linalg;

/// Point cloud container.
pub mod pointcloud;

/// Nearest-neighbor search over a point cloud.
pub mod spatial;

/// 3D rotation constructors.
pub mod transforms;

/// Voxel grid downsampling.
pub mod voxelgrid;

/// Surface normal estimation.
pub mod normals;

/// FPFH shape descriptors.
pub mod features;
