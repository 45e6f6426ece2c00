use crate::error::PointCloudError;
use crate::linalg::{rotate_points3d, transform_points3d};

/// A point cloud with points and optional per-point colors and normals.
///
/// Clouds are immutable once constructed; pose changes go through
/// [`PointCloud::transform`], which returns a new cloud.
#[derive(Debug, Clone)]
pub struct PointCloud {
    points: Vec<[f64; 3]>,
    colors: Option<Vec<[u8; 3]>>,
    normals: Option<Vec<[f64; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points, colors (optional), and normals
    /// (optional). Attribute vectors must match the point count; normals are
    /// expected to be unit length.
    pub fn new(
        points: Vec<[f64; 3]>,
        colors: Option<Vec<[u8; 3]>>,
        normals: Option<Vec<[f64; 3]>>,
    ) -> Result<Self, PointCloudError> {
        if let Some(colors) = &colors {
            if colors.len() != points.len() {
                return Err(PointCloudError::MismatchedLengths {
                    attribute_len: colors.len(),
                    points_len: points.len(),
                });
            }
        }
        if let Some(normals) = &normals {
            if normals.len() != points.len() {
                return Err(PointCloudError::MismatchedLengths {
                    attribute_len: normals.len(),
                    points_len: points.len(),
                });
            }
        }
        Ok(Self {
            points,
            colors,
            normals,
        })
    }

    /// Create a cloud from bare points.
    pub fn from_points(points: Vec<[f64; 3]>) -> Self {
        Self {
            points,
            colors: None,
            normals: None,
        }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points, if present.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Get as reference the normals of the points, if present.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Return a copy of this cloud carrying the given normals.
    pub fn with_normals(&self, normals: Vec<[f64; 3]>) -> Result<Self, PointCloudError> {
        Self::new(self.points.clone(), self.colors.clone(), Some(normals))
    }

    /// Apply a rigid transform, returning a new cloud. Points are rotated and
    /// translated; normals are rotated only; colors are carried over. The
    /// original cloud is left untouched.
    pub fn transform(&self, rotation: &[[f64; 3]; 3], translation: &[f64; 3]) -> Self {
        let mut points = vec![[0.0; 3]; self.points.len()];
        transform_points3d(&self.points, rotation, translation, &mut points);

        let normals = self.normals.as_ref().map(|normals| {
            let mut rotated = vec![[0.0; 3]; normals.len()];
            rotate_points3d(normals, rotation, &mut rotated);
            rotated
        });

        Self {
            points,
            colors: self.colors.clone(),
            normals,
        }
    }

    /// Get the minimum bound of the point cloud, or zeros if empty.
    pub fn min_bound(&self) -> [f64; 3] {
        match self.points.first() {
            None => [0.0; 3],
            Some(first) => self.points.iter().fold(*first, |acc, p| {
                [acc[0].min(p[0]), acc[1].min(p[1]), acc[2].min(p[2])]
            }),
        }
    }

    /// Get the maximum bound of the point cloud, or zeros if empty.
    pub fn max_bound(&self) -> [f64; 3] {
        match self.points.first() {
            None => [0.0; 3],
            Some(first) => self.points.iter().fold(*first, |acc, p| {
                [acc[0].max(p[0]), acc[1].max(p[1]), acc[2].max(p[2])]
            }),
        }
    }
}
