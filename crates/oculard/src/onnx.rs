use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use image::imageops::FilterType;
use ocular_core::{CanonicalEyeImage, Embedding, EmbeddingError, EmbeddingProvider};
use ort::session::{Session, SessionOutputs};
use ort::value::Tensor;
use thiserror::Error;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("failed to load ONNX model {path}: {message}")]
    Load { path: PathBuf, message: String },
}

/// Embedding provider backed by an ONNX feature extractor.
///
/// The canonical crop is resized to the model's square input, normalised
/// with ImageNet statistics into an NCHW tensor, and the first output is
/// flattened into the embedding.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    input_name: String,
    input_size: u32,
}

impl OnnxEmbedder {
    pub fn load(model_path: &Path, input_name: &str, input_size: u32) -> Result<Self, OnnxError> {
        let load_err = |e: ort::Error| OnnxError::Load {
            path: model_path.to_path_buf(),
            message: e.to_string(),
        };
        let session = Session::builder()
            .map_err(load_err)?
            .commit_from_file(model_path)
            .map_err(load_err)?;

        tracing::info!(path = %model_path.display(), input_size, "ONNX embedder loaded");
        Ok(Self {
            session: Mutex::new(session),
            input_name: input_name.to_string(),
            input_size,
        })
    }
}

impl EmbeddingProvider for OnnxEmbedder {
    fn embed(&self, image: &CanonicalEyeImage) -> Result<Embedding, EmbeddingError> {
        let data = preprocess(image, self.input_size);
        let side = self.input_size as usize;
        let shape = [1usize, 3, side, side];
        let tensor = Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
        let values = first_output(&outputs)?;

        Ok(Embedding::new(values))
    }
}

/// Resize to `size`×`size` and lay out as normalised planar RGB.
fn preprocess(image: &CanonicalEyeImage, size: u32) -> Vec<f32> {
    let resized = image::imageops::resize(image.as_image(), size, size, FilterType::Triangle);
    let plane = (size * size) as usize;
    let raw = resized.as_raw();

    let mut data = vec![0f32; 3 * plane];
    for idx in 0..plane {
        for c in 0..3 {
            let v = raw[idx * 3 + c] as f32 / 255.0;
            data[c * plane + idx] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    data
}

fn first_output(outputs: &SessionOutputs<'_>) -> Result<Vec<f32>, EmbeddingError> {
    let (_name, value) = outputs
        .iter()
        .next()
        .ok_or_else(|| EmbeddingError::Provider("model produced no outputs".to_string()))?;
    let (_shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
    Ok(data.to_vec())
}
