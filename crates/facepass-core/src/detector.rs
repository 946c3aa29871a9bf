//! Face detector backends.
//!
//! A detector only proposes boxes on a grayscale plane; choosing the primary
//! face, padding and cropping is the localizer's job.

use crate::config::DetectorConfig;

/// Raw detection in frame coordinates. May overhang the frame edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub score: f64,
}

/// Pluggable face detection backend.
///
/// Implementations must be reentrant: the localizer may be shared by
/// concurrent requests.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a row-major grayscale buffer of `width` × `height` bytes,
    /// in the order the backend produced them.
    fn detect(&self, gray: &[u8], width: u32, height: u32, params: &DetectorConfig) -> Vec<Detection>;
}

#[cfg(feature = "rustface")]
pub use cascade::CascadeDetector;

#[cfg(feature = "rustface")]
mod cascade {
    use super::{Detection, FaceDetector};
    use crate::config::DetectorConfig;
    use crate::error::ProviderError;
    use std::io::Cursor;
    use std::path::Path;

    /// Smallest face the SeetaFace cascade accepts.
    const CASCADE_MIN_FACE: u32 = 20;
    /// Base sliding window; frames smaller than this cannot be scanned.
    const CASCADE_WINDOW: u32 = 40;
    const CASCADE_WINDOW_STEP: u32 = 4;
    /// Cascade score floor per unit of `min_neighbors` (2.0 at the default of 5).
    const SCORE_PER_NEIGHBOR: f64 = 0.4;
    const PYRAMID_MIN: f32 = 0.1;
    const PYRAMID_MAX: f32 = 0.99;

    /// SeetaFace funnel-structured cascade detector.
    ///
    /// The model is loaded once; each call builds a lightweight detector
    /// around a clone of it, so `detect` needs no locking.
    pub struct CascadeDetector {
        model: rustface::Model,
    }

    impl CascadeDetector {
        /// Load a SeetaFace model file (e.g. `seeta_fd_frontal_v1.0.bin`).
        pub fn load(path: &Path) -> Result<Self, ProviderError> {
            if !path.exists() {
                return Err(ProviderError::ModelNotFound(path.display().to_string()));
            }
            let bytes = std::fs::read(path).map_err(|e| ProviderError::ModelLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let detector = Self::from_bytes(&bytes).map_err(|e| match e {
                ProviderError::ModelLoad { reason, .. } => ProviderError::ModelLoad {
                    path: path.display().to_string(),
                    reason,
                },
                other => other,
            })?;
            tracing::info!(path = %path.display(), "loaded SeetaFace cascade model");
            Ok(detector)
        }

        pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProviderError> {
            let model = rustface::read_model(Cursor::new(bytes)).map_err(|e| ProviderError::ModelLoad {
                path: "<memory>".into(),
                reason: e.to_string(),
            })?;
            Ok(Self { model })
        }
    }

    /// Map the cascade-style parameters onto rustface settings:
    /// (pyramid factor, smallest face, score floor).
    pub(super) fn rustface_settings(params: &DetectorConfig) -> (f32, u32, f64) {
        let pyramid = (1.0 / params.scale_factor).clamp(PYRAMID_MIN, PYRAMID_MAX);
        let min_face = params.min_face_size[0]
            .max(params.min_face_size[1])
            .max(CASCADE_MIN_FACE);
        let score = f64::from(params.min_neighbors.max(1)) * SCORE_PER_NEIGHBOR;
        (pyramid, min_face, score)
    }

    impl FaceDetector for CascadeDetector {
        fn detect(&self, gray: &[u8], width: u32, height: u32, params: &DetectorConfig) -> Vec<Detection> {
            if width < CASCADE_WINDOW || height < CASCADE_WINDOW {
                return Vec::new();
            }
            let (pyramid, min_face, score) = rustface_settings(params);

            let mut detector = rustface::create_detector_with_model(self.model.clone());
            detector.set_min_face_size(min_face);
            detector.set_score_thresh(score);
            detector.set_pyramid_scale_factor(pyramid);
            detector.set_slide_window_step(CASCADE_WINDOW_STEP, CASCADE_WINDOW_STEP);

            detector
                .detect(&rustface::ImageData::new(gray, width, height))
                .iter()
                .map(|face| {
                    let bbox = face.bbox();
                    Detection {
                        x: bbox.x(),
                        y: bbox.y(),
                        width: bbox.width(),
                        height: bbox.height(),
                        score: face.score(),
                    }
                })
                .collect()
        }
    }
}

#[cfg(all(test, feature = "rustface"))]
mod tests {
    use super::cascade::rustface_settings;
    use crate::config::DetectorConfig;

    #[test]
    fn test_default_settings_mapping() {
        let (pyramid, min_face, score) = rustface_settings(&DetectorConfig::default());
        assert!((pyramid - 1.0 / 1.1).abs() < 1e-6);
        assert_eq!(min_face, 60);
        assert!((score - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_settings_stay_in_rustface_bounds() {
        let params = DetectorConfig {
            scale_factor: 1.001,
            min_neighbors: 1,
            min_face_size: [8, 8],
            model_path: None,
        };
        let (pyramid, min_face, score) = rustface_settings(&params);
        assert!(pyramid <= 0.99);
        assert_eq!(min_face, 20);
        assert!(score > 0.0);

        let coarse = DetectorConfig { scale_factor: 50.0, ..params };
        assert!(rustface_settings(&coarse).0 >= 0.1);
    }
}
