//! End-of-scan grouping: exact duplicates, near-duplicate images and blurry
//! images.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use super::perceptual::{decode_hash, SimilarityIndex};
use crate::model::{DuplicateMember, DuplicateSet, FileDescriptor};

/// Content hash → paths, in insertion order, shared across threads.
#[derive(Debug, Default)]
pub struct HashIndex {
    inner: Mutex<HashIndexInner>,
}

#[derive(Debug, Default)]
struct HashIndexInner {
    order: Vec<String>,
    groups: HashMap<String, Vec<PathBuf>>,
}

impl HashIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: String, path: PathBuf) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.groups.contains_key(&hash) {
            inner.order.push(hash.clone());
        }
        inner.groups.entry(hash).or_default().push(path);
    }

    /// Number of hashed files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.groups.values().map(Vec::len).sum()
    }

    /// Groups with more than one path, ordered by first sighting.
    #[must_use]
    pub fn collisions(&self) -> Vec<(String, Vec<PathBuf>)> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|hash| {
                let paths = inner.groups.get(hash)?;
                (paths.len() > 1).then(|| (hash.clone(), paths.clone()))
            })
            .collect()
    }
}

/// Build duplicate sets from hash collisions, taking sizes and modification
/// times from the scan's descriptors.
#[must_use]
pub fn duplicate_sets(index: &HashIndex, descriptors: &[FileDescriptor]) -> Vec<DuplicateSet> {
    let by_path: HashMap<&PathBuf, &FileDescriptor> =
        descriptors.iter().map(|d| (&d.path, d)).collect();

    index
        .collisions()
        .into_iter()
        .filter_map(|(hash, paths)| {
            let members: Vec<DuplicateMember> = paths
                .iter()
                .filter_map(|p| by_path.get(p))
                .map(|d| DuplicateMember {
                    path: d.path.clone(),
                    modified: d.modified,
                })
                .collect();
            let size = by_path.get(&paths[0]).map_or(0, |d| d.size);
            (members.len() > 1).then_some(DuplicateSet {
                hash,
                size,
                members,
            })
        })
        .collect()
}

/// Group images whose perceptual hashes are within `max_distance` of each
/// other, transitively. Only groups of two or more are returned.
#[must_use]
pub fn image_clusters(descriptors: &[FileDescriptor], max_distance: u32) -> Vec<Vec<PathBuf>> {
    let hashed: Vec<(usize, image_hasher::ImageHash)> = descriptors
        .iter()
        .enumerate()
        .filter_map(|(i, d)| {
            let encoded = d.perceptual_hash.as_deref()?;
            match decode_hash(encoded) {
                Ok(h) => Some((i, h)),
                Err(e) => {
                    log::debug!("{}: {}", d.path.display(), e);
                    None
                }
            }
        })
        .collect();

    let mut index = SimilarityIndex::new();
    for (slot, (_, hash)) in hashed.iter().enumerate() {
        index.insert(hash.clone(), slot);
    }

    let mut assigned = vec![false; hashed.len()];
    let mut clusters = Vec::new();
    for start in 0..hashed.len() {
        if assigned[start] {
            continue;
        }
        assigned[start] = true;
        let mut members = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(slot) = queue.pop_front() {
            for near in index.within(&hashed[slot].1, max_distance) {
                if !assigned[near] {
                    assigned[near] = true;
                    members.push(near);
                    queue.push_back(near);
                }
            }
        }
        if members.len() > 1 {
            members.sort_unstable();
            clusters.push(
                members
                    .into_iter()
                    .map(|slot| descriptors[hashed[slot].0].path.clone())
                    .collect(),
            );
        }
    }
    clusters
}

/// Paths of images scoring below `threshold`.
#[must_use]
pub fn blurry_images(descriptors: &[FileDescriptor], threshold: f64) -> Vec<PathBuf> {
    descriptors
        .iter()
        .filter(|d| d.blur_score.is_some_and(|s| s < threshold))
        .map(|d| d.path.clone())
        .collect()
}
