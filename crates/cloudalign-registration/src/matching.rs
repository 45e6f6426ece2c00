//! Nearest-neighbor correspondence search in FPFH descriptor space.

use std::num::NonZeroUsize;

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use rayon::prelude::*;

use cloudalign_3d::features::{Descriptor, FPFH_DIM};

/// A candidate match `(source index, target index)` from descriptor space.
pub type FeatureMatch = (usize, usize);

/// Nearest-neighbor index over a set of descriptors.
///
/// Same `kiddo` tree as the spatial index, lifted to the 33-dimensional
/// descriptor space.
pub struct FeatureIndex {
    tree: ImmutableKdTree<f64, u32, FPFH_DIM, 32>,
}

impl FeatureIndex {
    /// Build the index over a non-empty descriptor set.
    pub fn build(descriptors: &[Descriptor]) -> Option<Self> {
        if descriptors.is_empty() {
            return None;
        }
        Some(Self {
            tree: ImmutableKdTree::new_from_slice(descriptors),
        })
    }

    /// Index of the nearest descriptor.
    pub fn nearest_one(&self, query: &Descriptor) -> usize {
        self.tree.nearest_one::<SquaredEuclidean>(query).item as usize
    }

    /// Indices of the `k` nearest descriptors, ascending by distance.
    pub fn nearest_n(&self, query: &Descriptor, k: usize) -> Vec<usize> {
        let Some(k) = NonZeroUsize::new(k) else {
            return Vec::new();
        };
        self.tree
            .nearest_n::<SquaredEuclidean>(query, k)
            .into_iter()
            .map(|nn| nn.item as usize)
            .collect()
    }
}

/// For every source descriptor, its nearest target descriptor.
///
/// Returns one match per source point, in source order.
pub fn match_features(
    source_descriptors: &[Descriptor],
    target_descriptors: &[Descriptor],
) -> Vec<FeatureMatch> {
    let Some(target_index) = FeatureIndex::build(target_descriptors) else {
        return Vec::new();
    };
    source_descriptors
        .par_iter()
        .enumerate()
        .map(|(i, descriptor)| (i, target_index.nearest_one(descriptor)))
        .collect()
}

/// Mutual (reciprocal) nearest-neighbor matches: `(i, j)` is kept only when
/// `j` is the nearest target of source `i` and `i` is the nearest source of
/// target `j`. Deterministic and free of duplicates by construction.
pub fn mutual_matches(
    source_descriptors: &[Descriptor],
    target_descriptors: &[Descriptor],
) -> Vec<FeatureMatch> {
    let (Some(source_index), Some(target_index)) = (
        FeatureIndex::build(source_descriptors),
        FeatureIndex::build(target_descriptors),
    ) else {
        return Vec::new();
    };

    source_descriptors
        .par_iter()
        .enumerate()
        .filter_map(|(i, descriptor)| {
            let j = target_index.nearest_one(descriptor);
            (source_index.nearest_one(&target_descriptors[j]) == i).then_some((i, j))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(seed: f64) -> Descriptor {
        let mut d = [0.0; FPFH_DIM];
        for (k, v) in d.iter_mut().enumerate() {
            *v = (seed + k as f64 * 0.37).sin().abs() * 100.0;
        }
        d
    }

    #[test]
    fn test_match_features_finds_identical_descriptors() {
        let descriptors: Vec<Descriptor> = (0..10).map(|i| descriptor(i as f64)).collect();
        let matches = match_features(&descriptors, &descriptors);
        assert_eq!(matches.len(), descriptors.len());
        for (i, j) in matches {
            assert_eq!(i, j);
        }
    }

    #[test]
    fn test_mutual_matches_are_reciprocal() {
        let source: Vec<Descriptor> = (0..20).map(|i| descriptor(i as f64)).collect();
        // target is a shuffled-ish subset with a few unrelated descriptors
        let mut target: Vec<Descriptor> = (5..15).map(|i| descriptor(i as f64)).collect();
        target.push(descriptor(100.0));

        let matches = mutual_matches(&source, &target);
        let exact: Vec<_> = matches.iter().filter(|&&(_, j)| j < 10).collect();
        assert_eq!(exact.len(), 10);
        for &&(i, j) in &exact {
            assert_eq!(i, j + 5, "identical descriptors should pair up");
        }
    }

    #[test]
    fn test_empty_inputs() {
        assert!(match_features(&[], &[]).is_empty());
        assert!(mutual_matches(&[descriptor(1.0)], &[]).is_empty());
    }

    #[test]
    fn test_nearest_n_ordering() {
        let descriptors: Vec<Descriptor> = (0..5).map(|i| descriptor(i as f64)).collect();
        let index = FeatureIndex::build(&descriptors).unwrap();
        let found = index.nearest_n(&descriptors[2], 3);
        assert_eq!(found[0], 2);
        assert_eq!(found.len(), 3);
    }
}
