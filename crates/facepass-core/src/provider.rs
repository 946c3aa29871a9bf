//! Boundary to the external models: embedding producer and identity classifier.
//!
//! Providers are treated as opaque numeric functions. Their output is checked
//! against the contract here, and any violation is a [`ProviderError`].
//! Implementations need not be reentrant: the pipeline serializes calls.

use crate::error::ProviderError;
use crate::labels::LabelSet;
use crate::types::{EmbeddingVector, FaceCrop, ProbabilityDistribution};

/// Tolerance on `1 - Σp` for a softmax distribution.
pub const DISTRIBUTION_SUM_TOLERANCE: f32 = 1e-2;

/// Maps a fixed-size face crop to a fixed-length embedding.
pub trait EmbeddingProducer: Send {
    /// Side length of the square RGB crop the model consumes.
    fn input_size(&self) -> u32;

    /// Length of every embedding this producer returns.
    fn embedding_len(&self) -> usize;

    fn embed(&mut self, crop: &FaceCrop) -> Result<EmbeddingVector, ProviderError>;
}

/// Maps an embedding to a probability distribution over the enrolled labels.
pub trait Classifier: Send {
    fn classify(&mut self, embedding: &EmbeddingVector) -> Result<ProbabilityDistribution, ProviderError>;
}

pub fn check_embedding(embedding: &EmbeddingVector, expected: usize) -> Result<(), ProviderError> {
    if embedding.len() != expected {
        tracing::warn!(expected, actual = embedding.len(), "embedding provider broke its length contract");
        return Err(ProviderError::EmbeddingLength {
            expected,
            actual: embedding.len(),
        });
    }
    if embedding.values().iter().any(|v| !v.is_finite()) {
        return Err(ProviderError::InferenceFailed("embedding contains non-finite values".into()));
    }
    Ok(())
}

/// Check the classifier output covers exactly `labels` and sums to ≈1, and
/// return it in label registration order.
pub fn check_distribution(
    labels: &LabelSet,
    dist: &ProbabilityDistribution,
) -> Result<ProbabilityDistribution, ProviderError> {
    let aligned = labels.align(dist).map_err(|e| {
        tracing::warn!(error = %e, "classifier output does not match the label set");
        e
    })?;
    let total = aligned.total();
    if (total - 1.0).abs() > DISTRIBUTION_SUM_TOLERANCE {
        return Err(ProviderError::MalformedDistribution(format!(
            "probabilities sum to {total}, expected 1"
        )));
    }
    Ok(aligned)
}

#[cfg(feature = "onnx")]
pub use onnx::{OnnxClassifier, OnnxEmbedder};

#[cfg(feature = "onnx")]
mod onnx {
    use super::{Classifier, EmbeddingProducer};
    use crate::error::ProviderError;
    use crate::labels::LabelSet;
    use crate::types::{EmbeddingVector, FaceCrop, ProbabilityDistribution};
    use ndarray::{Array2, Array4};
    use ort::session::Session;
    use ort::value::TensorRef;
    use std::path::Path;

    const FACENET_INPUT_SIZE: u32 = 160;

    fn load_session(path: &Path, kind: &str) -> Result<Session, ProviderError> {
        if !path.exists() {
            return Err(ProviderError::ModelNotFound(path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(path)?;

        tracing::info!(
            path = %path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            kind,
            "loaded ONNX model"
        );
        Ok(session)
    }

    /// FaceNet-style embedder: 160×160 RGB NHWC input, L2-normalized output.
    pub struct OnnxEmbedder {
        session: Session,
        embedding_dim: usize,
    }

    impl OnnxEmbedder {
        pub fn load(model_path: &Path, embedding_dim: usize) -> Result<Self, ProviderError> {
            let session = load_session(model_path, "embedding")?;
            Ok(Self {
                session,
                embedding_dim,
            })
        }

        /// Per-image standardization (prewhitening) into a `[1, H, W, 3]` tensor.
        pub(crate) fn preprocess(crop: &FaceCrop) -> Array4<f32> {
            let image = crop.image();
            let (w, h) = image.dimensions();
            let n = (w * h * 3) as f32;

            let raw = image.as_raw();
            let mean = raw.iter().map(|&v| v as f32).sum::<f32>() / n;
            let var = raw.iter().map(|&v| (v as f32 - mean).powi(2)).sum::<f32>() / n;
            let std = var.sqrt().max(1.0 / n.sqrt());

            let mut tensor = Array4::<f32>::zeros((1, h as usize, w as usize, 3));
            for (x, y, px) in image.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[0, y as usize, x as usize, c]] = (px.0[c] as f32 - mean) / std;
                }
            }
            tensor
        }
    }

    impl EmbeddingProducer for OnnxEmbedder {
        fn input_size(&self) -> u32 {
            FACENET_INPUT_SIZE
        }

        fn embedding_len(&self) -> usize {
            self.embedding_dim
        }

        fn embed(&mut self, crop: &FaceCrop) -> Result<EmbeddingVector, ProviderError> {
            crop.expect_size(FACENET_INPUT_SIZE)?;
            let input = Self::preprocess(crop);
            let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| ProviderError::InferenceFailed(format!("embedding extraction: {e}")))?;
            let raw: Vec<f32> = raw_data.to_vec();

            if raw.len() != self.embedding_dim {
                return Err(ProviderError::EmbeddingLength {
                    expected: self.embedding_dim,
                    actual: raw.len(),
                });
            }

            let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
            let values = if norm > 0.0 {
                raw.iter().map(|x| x / norm).collect()
            } else {
                raw
            };
            Ok(EmbeddingVector::new(values))
        }
    }

    /// Dense softmax classifier over the enrolled labels, `[1, D]` → `[1, N]`.
    pub struct OnnxClassifier {
        session: Session,
        labels: LabelSet,
    }

    impl OnnxClassifier {
        pub fn load(model_path: &Path, labels: LabelSet) -> Result<Self, ProviderError> {
            let session = load_session(model_path, "classifier")?;
            Ok(Self { session, labels })
        }
    }

    impl Classifier for OnnxClassifier {
        fn classify(&mut self, embedding: &EmbeddingVector) -> Result<ProbabilityDistribution, ProviderError> {
            let input = Array2::from_shape_vec((1, embedding.len()), embedding.values().to_vec())
                .map_err(|e| ProviderError::InferenceFailed(format!("embedding shape: {e}")))?;
            let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, scores) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| ProviderError::InferenceFailed(format!("probability extraction: {e}")))?;
            self.labels.distribution(scores)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use image::{Rgb, RgbImage};

        #[test]
        fn test_preprocess_shape_and_standardization() {
            let image = RgbImage::from_fn(160, 160, |x, _| Rgb([(x % 256) as u8, 0, 255]));
            let tensor = OnnxEmbedder::preprocess(&FaceCrop::new(image));
            assert_eq!(tensor.shape(), &[1, 160, 160, 3]);
            let n = tensor.len() as f32;
            let mean = tensor.iter().sum::<f32>() / n;
            let var = tensor.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
            assert!(mean.abs() < 1e-3, "mean {mean}");
            assert!((var - 1.0).abs() < 1e-2, "var {var}");
        }

        #[test]
        fn test_preprocess_uniform_crop_is_zero() {
            let tensor = OnnxEmbedder::preprocess(&FaceCrop::new(RgbImage::from_pixel(160, 160, Rgb([90, 90, 90]))));
            assert!(tensor.iter().all(|v| v.abs() < 1e-6));
        }

        #[test]
        fn test_missing_model_reported() {
            let err = OnnxEmbedder::load(Path::new("/nonexistent/facenet.onnx"), 512).err();
            assert!(matches!(err, Some(ProviderError::ModelNotFound(_))));
        }
    }
}
