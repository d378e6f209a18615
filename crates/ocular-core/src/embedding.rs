//! Embedding values and the provider port.
//!
//! An [`Embedding`] may be backed by resources owned by its provider (a
//! device buffer, a pooled tensor). The provider attaches a release hook
//! that runs exactly once when the embedding is dropped, so every exit path
//! of a classification tick releases by ownership alone.

use std::fmt;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use thiserror::Error;

use crate::rectify::CanonicalEyeImage;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding provider failed: {0}")]
    Provider(String),
    #[error("embedding provider returned an empty vector")]
    Empty,
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidValue,
}

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// Fixed-length feature vector for one canonical eye image.
pub struct Embedding {
    values: Arc<[f32]>,
    release: Option<ReleaseHook>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values: values.into(),
            release: None,
        }
    }

    /// Attach a hook that frees provider-side resources when this
    /// embedding is dropped.
    pub fn with_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Shared copy of the values for storage, independent of the
    /// provider's resources.
    pub fn to_example(&self) -> Arc<[f32]> {
        Arc::clone(&self.values)
    }

    /// Reject empty or non-finite vectors before they reach the store.
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::InvalidValue);
        }
        Ok(())
    }
}

impl Drop for Embedding {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("len", &self.values.len())
            .field("leased", &self.release.is_some())
            .finish()
    }
}

/// Maps a canonical eye image to an embedding.
///
/// Implementations may block; the scheduler calls them off its own task.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, image: &CanonicalEyeImage) -> Result<Embedding, EmbeddingError>;
}

/// Model-free embedder: a mean-centred `grid × grid` luma thumbnail.
#[derive(Debug, Clone, Copy)]
pub struct PixelEmbedder {
    grid: u32,
}

impl PixelEmbedder {
    pub fn new(grid: u32) -> Self {
        Self { grid: grid.max(1) }
    }
}

impl Default for PixelEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

impl EmbeddingProvider for PixelEmbedder {
    fn embed(&self, image: &CanonicalEyeImage) -> Result<Embedding, EmbeddingError> {
        let gray = imageops::grayscale(image.as_image());
        let thumb = imageops::resize(&gray, self.grid, self.grid, FilterType::Triangle);

        let mut values: Vec<f32> = thumb.as_raw().iter().map(|&p| p as f32 / 255.0).collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        for v in &mut values {
            *v -= mean;
        }

        let embedding = Embedding::new(values);
        embedding.validate()?;
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{compute_eye_region, EyeCorners};
    use crate::rectify::{rectify, Resolution};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn canonical(seed: u32) -> CanonicalEyeImage {
        let frame = RgbImage::from_fn(64, 64, |x, y| Rgb([((x * seed + y) % 256) as u8, (y * 3 % 256) as u8, 40]));
        let region = compute_eye_region(
            &EyeCorners {
                left: (20.0, 32.0).into(),
                top: (32.0, 28.0).into(),
                right: (44.0, 32.0).into(),
                bottom: (32.0, 36.0).into(),
            },
            3.0,
        );
        rectify(&frame, Resolution::new(64, 64), &region, 32)
    }

    #[test]
    fn test_release_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let e = Embedding::new(vec![1.0, 2.0]).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let stored = e.to_example();
        drop(e);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        // stored copy outlives the lease
        assert_eq!(&stored[..], &[1.0, 2.0]);
    }

    #[test]
    fn test_validate() {
        assert!(Embedding::new(vec![]).validate().is_err());
        assert!(matches!(
            Embedding::new(vec![1.0, f32::NAN]).validate(),
            Err(EmbeddingError::InvalidValue)
        ));
        assert!(Embedding::new(vec![0.0, 1.0]).validate().is_ok());
    }

    #[test]
    fn test_pixel_embedder_shape_and_determinism() {
        let embedder = PixelEmbedder::new(8);
        let img = canonical(7);
        let a = embedder.embed(&img).unwrap();
        let b = embedder.embed(&img).unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a.values(), b.values());
        let mean: f32 = a.values().iter().sum::<f32>() / 64.0;
        assert!(mean.abs() < 1e-5);
    }

    #[test]
    fn test_pixel_embedder_distinguishes_images() {
        let embedder = PixelEmbedder::default();
        let a = embedder.embed(&canonical(3)).unwrap();
        let b = embedder.embed(&canonical(11)).unwrap();
        assert_ne!(a.values(), b.values());
    }
}
