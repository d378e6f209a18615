//! Ocular core: live eye-state classification from facial landmarks.
//!
//! Landmarks bounding one eye are turned into a rotation-normalised crop
//! ([`rectify()`]), the crop into an embedding by an [`EmbeddingProvider`],
//! and the embedding is classified against examples the user records by
//! holding a per-class training control ([`KnnClassifier`],
//! [`TrainingController`]). [`spawn_scheduler`] drives the whole cycle.

pub mod classifier;
pub mod embedding;
pub mod events;
pub mod geometry;
pub mod ports;
pub mod rectify;
pub mod scheduler;
pub mod smoothing;
pub mod store;
pub mod training;

pub use classifier::{cosine_similarity, KnnClassifier, PredictionResult};
pub use embedding::{Embedding, EmbeddingError, EmbeddingProvider, PixelEmbedder};
pub use events::EventCounter;
pub use geometry::{compute_eye_region, EyeCorners, EyeLandmarkIndices, EyeRegion, LandmarkSet, Point2};
pub use ports::{CaptureDevice, CaptureError, Tracker};
pub use rectify::{rectify, CanonicalEyeImage, Resolution};
pub use scheduler::{spawn_scheduler, PipelineStatus, SchedulerConfig, SchedulerError, SchedulerHandle};
pub use smoothing::{RegionSmoother, SmoothingConfig};
pub use store::{ExampleStore, StoreError};
pub use training::{TrainingController, TrainingState};
