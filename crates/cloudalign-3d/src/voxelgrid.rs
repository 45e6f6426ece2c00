use std::collections::BTreeMap;

use crate::error::PointCloudError;
use crate::pointcloud::PointCloud;

/// Accumulated state of one voxel while downsampling.
#[derive(Default)]
struct VoxelData {
    point_sum: [f64; 3],
    color_sum: [u64; 3],
    normal_sum: [f64; 3],
    count: usize,
}

/// A cubic voxel grid for downsampling point clouds.
///
/// Points are bucketed by `floor(coordinate / voxel_size)` per axis and each
/// non-empty voxel collapses to the mean of its members. Colors are averaged
/// and normals re-normalized to unit length. Voxels are accumulated in a
/// `BTreeMap` so the output ordering is canonical and downsampling is
/// deterministic for identical input.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    voxel_size: f64,
}

impl VoxelGrid {
    /// Create a voxel grid with the given edge length.
    ///
    /// Fails with `InvalidParameter` when `voxel_size` is not a positive
    /// finite number.
    pub fn new(voxel_size: f64) -> Result<Self, PointCloudError> {
        if voxel_size <= 0.0 || !voxel_size.is_finite() {
            return Err(PointCloudError::InvalidParameter(format!(
                "voxel size must be positive and finite, got {voxel_size}"
            )));
        }
        Ok(Self { voxel_size })
    }

    /// The voxel edge length.
    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// Integer voxel key of a point.
    #[inline]
    fn voxel_key(&self, point: &[f64; 3]) -> (i32, i32, i32) {
        (
            (point[0] / self.voxel_size).floor() as i32,
            (point[1] / self.voxel_size).floor() as i32,
            (point[2] / self.voxel_size).floor() as i32,
        )
    }

    /// Downsample a point cloud by collapsing each voxel to its centroid.
    ///
    /// The output cloud never holds more points than the input and carries
    /// colors/normals exactly when the input does.
    pub fn downsample(&self, cloud: &PointCloud) -> Result<PointCloud, PointCloudError> {
        let mut grid: BTreeMap<(i32, i32, i32), VoxelData> = BTreeMap::new();

        for (i, point) in cloud.points().iter().enumerate() {
            let entry = grid.entry(self.voxel_key(point)).or_default();
            entry.point_sum[0] += point[0];
            entry.point_sum[1] += point[1];
            entry.point_sum[2] += point[2];
            entry.count += 1;

            if let Some(colors) = cloud.colors() {
                let color = colors[i];
                entry.color_sum[0] += color[0] as u64;
                entry.color_sum[1] += color[1] as u64;
                entry.color_sum[2] += color[2] as u64;
            }
            if let Some(normals) = cloud.normals() {
                let normal = normals[i];
                entry.normal_sum[0] += normal[0];
                entry.normal_sum[1] += normal[1];
                entry.normal_sum[2] += normal[2];
            }
        }

        let mut points = Vec::with_capacity(grid.len());
        let mut colors = cloud.colors().map(|_| Vec::with_capacity(grid.len()));
        let mut normals = cloud.normals().map(|_| Vec::with_capacity(grid.len()));

        for voxel in grid.values() {
            let inv_count = 1.0 / voxel.count as f64;
            points.push([
                voxel.point_sum[0] * inv_count,
                voxel.point_sum[1] * inv_count,
                voxel.point_sum[2] * inv_count,
            ]);

            if let Some(colors) = &mut colors {
                colors.push([
                    (voxel.color_sum[0] as f64 * inv_count).round() as u8,
                    (voxel.color_sum[1] as f64 * inv_count).round() as u8,
                    (voxel.color_sum[2] as f64 * inv_count).round() as u8,
                ]);
            }
            if let Some(normals) = &mut normals {
                let mut normal = [
                    voxel.normal_sum[0] * inv_count,
                    voxel.normal_sum[1] * inv_count,
                    voxel.normal_sum[2] * inv_count,
                ];
                crate::linalg::normalize3(&mut normal);
                normals.push(normal);
            }
        }

        PointCloud::new(points, colors, normals)
    }
}
