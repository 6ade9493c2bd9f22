//! Perceptual image fingerprints: similarity hashes and blur scores.
//!
//! The perceptual hash is a DCT-based pHash computed by `image_hasher`; it
//! survives resizing and recompression, so near-identical pictures land within
//! a small Hamming distance of each other. Hashes are kept as base64 strings
//! on the descriptor and decoded again for clustering.
//!
//! The blur score is the variance of a 3×3 Laplacian over a grayscale
//! downsample. Sharp images have strong edges and a high variance; a low
//! score means blurry.

use bk_tree::{BKTree, Metric};
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};
use std::path::Path;
use thiserror::Error;

/// Longest side of the image the blur score is computed on.
const BLUR_SAMPLE_EDGE: u32 = 512;

/// Errors that can occur during perceptual analysis.
#[derive(Debug, Error)]
pub enum PerceptualError {
    /// Failed to open or decode the image.
    #[error("Failed to load image {0}: {1}")]
    LoadError(String, #[source] image::ImageError),

    /// A stored hash could not be decoded.
    #[error("Invalid perceptual hash: {0}")]
    InvalidHash(String),
}

/// Perceptual hash and blur score of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFingerprint {
    /// Base64-encoded pHash.
    pub hash: String,
    pub blur_score: f64,
}

/// Computes image fingerprints.
pub struct PerceptualHasher {
    hasher: image_hasher::Hasher,
}

impl PerceptualHasher {
    #[must_use]
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Median)
            .preproc_dct()
            .to_hasher();
        Self { hasher }
    }

    /// Decode `path` and compute its fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`PerceptualError::LoadError`] if the image cannot be decoded.
    pub fn fingerprint<P: AsRef<Path>>(&self, path: P) -> Result<ImageFingerprint, PerceptualError> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|e| PerceptualError::LoadError(path.display().to_string(), e))?;
        Ok(ImageFingerprint {
            hash: self.hasher.hash_image(&img).to_base64(),
            blur_score: blur_score(&img),
        })
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Laplacian variance of a grayscale downsample of `img`.
#[must_use]
pub fn blur_score(img: &DynamicImage) -> f64 {
    let sample = if img.width() > BLUR_SAMPLE_EDGE || img.height() > BLUR_SAMPLE_EDGE {
        img.thumbnail(BLUR_SAMPLE_EDGE, BLUR_SAMPLE_EDGE)
    } else {
        img.clone()
    };
    let gray = sample.to_luma8();
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| f64::from(gray.get_pixel(x, y)[0]);
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Decode a base64 hash produced by [`PerceptualHasher`].
///
/// # Errors
///
/// Returns [`PerceptualError::InvalidHash`] for malformed input.
pub fn decode_hash(encoded: &str) -> Result<ImageHash, PerceptualError> {
    ImageHash::from_base64(encoded).map_err(|_| PerceptualError::InvalidHash(encoded.to_string()))
}

/// An image hash tagged with the position of the image it came from.
#[derive(Debug, Clone)]
pub struct IndexedHash {
    pub hash: ImageHash,
    pub index: usize,
}

/// Hamming distance between image hashes.
#[derive(Default, Clone, Copy, Debug)]
pub struct ImageHashMetric;

impl Metric<IndexedHash> for ImageHashMetric {
    fn distance(&self, a: &IndexedHash, b: &IndexedHash) -> u32 {
        a.hash.dist(&b.hash)
    }

    fn threshold_distance(&self, a: &IndexedHash, b: &IndexedHash, threshold: u32) -> Option<u32> {
        let d = self.distance(a, b);
        (d <= threshold).then_some(d)
    }
}

/// BK-tree over image hashes for radius queries.
pub struct SimilarityIndex {
    tree: BKTree<IndexedHash, ImageHashMetric>,
    count: usize,
}

impl SimilarityIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: BKTree::new(ImageHashMetric),
            count: 0,
        }
    }

    pub fn insert(&mut self, hash: ImageHash, index: usize) {
        self.tree.add(IndexedHash { hash, index });
        self.count += 1;
    }

    /// Indices of every stored hash within `max_distance` of `hash`.
    #[must_use]
    pub fn within(&self, hash: &ImageHash, max_distance: u32) -> Vec<usize> {
        let query = IndexedHash {
            hash: hash.clone(),
            index: usize::MAX,
        };
        self.tree
            .find(&query, max_distance)
            .map(|(_, found)| found.index)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new()
    }
}
