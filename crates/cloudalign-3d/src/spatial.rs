use std::num::NonZeroUsize;

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;

use crate::error::PointCloudError;
use crate::pointcloud::PointCloud;

/// Nearest-neighbor index over a point cloud.
///
/// Thin wrapper around kiddo's `ImmutableKdTree`, built once per cloud per
/// stage and then shared read-only by every consumer (normal estimation,
/// feature computation, correspondence search). All distances returned are
/// Euclidean; kiddo's squared distances are converted at this boundary.
#[derive(Debug)]
pub struct SpatialIndex {
    tree: ImmutableKdTree<f64, u32, 3, 32>,
    len: usize,
}

impl SpatialIndex {
    /// Build the index from a point cloud.
    ///
    /// Fails with `InsufficientPoints` on an empty cloud.
    pub fn build(cloud: &PointCloud) -> Result<Self, PointCloudError> {
        if cloud.is_empty() {
            return Err(PointCloudError::InsufficientPoints {
                got: 0,
                required: 1,
            });
        }
        Ok(Self {
            tree: ImmutableKdTree::new_from_slice(cloud.points()),
            len: cloud.len(),
        })
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the index is empty. Always false for a built index.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index and Euclidean distance of the nearest indexed point.
    pub fn nearest_one(&self, query: &[f64; 3]) -> (usize, f64) {
        let nn = self.tree.nearest_one::<SquaredEuclidean>(query);
        (nn.item as usize, nn.distance.sqrt())
    }

    /// The `k` nearest points to `query` as `(index, distance)` pairs sorted
    /// by ascending distance. Returns fewer than `k` entries only when the
    /// cloud holds fewer points.
    pub fn nearest_n(&self, query: &[f64; 3], k: usize) -> Vec<(usize, f64)> {
        let Some(k) = NonZeroUsize::new(k) else {
            return Vec::new();
        };
        self.tree
            .nearest_n::<SquaredEuclidean>(query, k)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
            .collect()
    }

    /// All points within `radius` of `query`, sorted by ascending distance
    /// (ties broken by index so the output order is fully deterministic).
    pub fn within_radius(&self, query: &[f64; 3], radius: f64) -> Vec<(usize, f64)> {
        if radius <= 0.0 || !radius.is_finite() {
            return Vec::new();
        }
        let mut found: Vec<(usize, f64)> = self
            .tree
            .within_unsorted::<SquaredEuclidean>(query, radius * radius)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
            .collect();
        found.sort_unstable_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        found
    }

    /// Radius-bounded k-nearest-neighbor query: at most `max_nn` neighbors,
    /// all within `radius`, sorted by ascending distance.
    pub fn hybrid(&self, query: &[f64; 3], radius: f64, max_nn: usize) -> Vec<(usize, f64)> {
        if radius <= 0.0 || !radius.is_finite() {
            return Vec::new();
        }
        let mut found = self.nearest_n(query, max_nn);
        found.retain(|&(_, dist)| dist <= radius);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_cloud() -> PointCloud {
        PointCloud::from_points(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [5.0, 5.0, 5.0],
        ])
    }

    #[test]
    fn test_build_empty_cloud_fails() {
        let result = SpatialIndex::build(&PointCloud::from_points(vec![]));
        assert!(matches!(
            result,
            Err(PointCloudError::InsufficientPoints { got: 0, .. })
        ));
    }

    #[test]
    fn test_nearest_one() -> Result<(), Box<dyn std::error::Error>> {
        let index = SpatialIndex::build(&grid_cloud())?;
        let (idx, dist) = index.nearest_one(&[0.9, 0.1, 0.0]);
        assert_eq!(idx, 1);
        assert!((dist - (0.02f64).sqrt()).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_nearest_n_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let index = SpatialIndex::build(&grid_cloud())?;
        let found = index.nearest_n(&[0.0, 0.0, 0.0], 3);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].0, 0);
        assert!(found.windows(2).all(|w| w[0].1 <= w[1].1));
        Ok(())
    }

    #[test]
    fn test_nearest_n_k_zero() -> Result<(), Box<dyn std::error::Error>> {
        let index = SpatialIndex::build(&grid_cloud())?;
        assert!(index.nearest_n(&[0.0; 3], 0).is_empty());
        Ok(())
    }

    #[test]
    fn test_within_radius() -> Result<(), Box<dyn std::error::Error>> {
        let index = SpatialIndex::build(&grid_cloud())?;
        let found = index.within_radius(&[0.0, 0.0, 0.0], 1.5);
        let indices: Vec<usize> = found.iter().map(|&(i, _)| i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_within_radius_invalid_radius() -> Result<(), Box<dyn std::error::Error>> {
        let index = SpatialIndex::build(&grid_cloud())?;
        assert!(index.within_radius(&[0.0; 3], -1.0).is_empty());
        assert!(index.within_radius(&[0.0; 3], f64::NAN).is_empty());
        Ok(())
    }

    #[test]
    fn test_hybrid_caps_count_and_radius() -> Result<(), Box<dyn std::error::Error>> {
        let index = SpatialIndex::build(&grid_cloud())?;

        // radius admits four points but max_nn caps at two
        let capped = index.hybrid(&[0.0, 0.0, 0.0], 1.5, 2);
        assert_eq!(capped.len(), 2);

        // max_nn admits all five but the far point is outside the radius
        let bounded = index.hybrid(&[0.0, 0.0, 0.0], 1.5, 10);
        assert_eq!(bounded.len(), 4);
        assert!(bounded.iter().all(|&(_, d)| d <= 1.5));
        Ok(())
    }
}
