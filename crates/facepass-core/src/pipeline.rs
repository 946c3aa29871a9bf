//! End-to-end authorization: frame → face crop → embedding → distribution → decision.
//!
//! Every dependency is injected. The detector must be reentrant; the
//! embedding and classifier providers are serialized behind one lock, so a
//! pipeline can be shared across threads as-is.

use crate::config::Config;
use crate::detector::FaceDetector;
use crate::engine::AuthorizationEngine;
use crate::error::{ConfigError, PipelineError, ProviderError};
use crate::labels::LabelSet;
use crate::localizer::FaceLocalizer;
use crate::provider::{check_distribution, check_embedding, Classifier, EmbeddingProducer};
use crate::types::{AuthDecision, RawFrame};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

struct Providers {
    embedder: Box<dyn EmbeddingProducer>,
    classifier: Box<dyn Classifier>,
}

pub struct AuthPipeline {
    localizer: FaceLocalizer,
    labels: LabelSet,
    providers: Mutex<Providers>,
}

impl AuthPipeline {
    pub fn new(
        localizer: FaceLocalizer,
        labels: LabelSet,
        embedder: Box<dyn EmbeddingProducer>,
        classifier: Box<dyn Classifier>,
    ) -> Result<Self, ConfigError> {
        let target = localizer.crop_config().target_size;
        if target != embedder.input_size() {
            return Err(ConfigError::InvalidCrop(format!(
                "target_size {target} does not match embedder input {}",
                embedder.input_size()
            )));
        }
        tracing::info!(
            labels = labels.len(),
            crop = target,
            embedding_len = embedder.embedding_len(),
            "authorization pipeline ready"
        );
        Ok(Self {
            localizer,
            labels,
            providers: Mutex::new(Providers { embedder, classifier }),
        })
    }

    /// Validate `config` and assemble a pipeline around the given providers.
    pub fn from_config(
        config: &Config,
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn EmbeddingProducer>,
        classifier: Box<dyn Classifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let localizer = FaceLocalizer::new(detector, config.detector.clone(), config.crop)?;
        Self::new(localizer, config.label_set()?, embedder, classifier)
    }

    /// Load the SeetaFace detector and both ONNX models named in `config`.
    #[cfg(all(feature = "rustface", feature = "onnx"))]
    pub fn load(config: &Config) -> Result<Self, PipelineError> {
        use crate::detector::CascadeDetector;
        use crate::provider::{OnnxClassifier, OnnxEmbedder};

        config.validate()?;
        let detector_path = config
            .detector
            .model_path
            .as_deref()
            .ok_or(ConfigError::MissingModel("face detector"))?;
        let embedder_path = config
            .models
            .embedder_path
            .as_deref()
            .ok_or(ConfigError::MissingModel("embedding producer"))?;
        let classifier_path = config
            .models
            .classifier_path
            .as_deref()
            .ok_or(ConfigError::MissingModel("classifier"))?;

        let detector = CascadeDetector::load(detector_path)?;
        let embedder = OnnxEmbedder::load(embedder_path, config.models.embedding_dim)?;
        let classifier = OnnxClassifier::load(classifier_path, config.label_set()?)?;
        Ok(Self::from_config(
            config,
            Box::new(detector),
            Box::new(embedder),
            Box::new(classifier),
        )?)
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn localizer(&self) -> &FaceLocalizer {
        &self.localizer
    }

    /// Run one frame through the pipeline and decide under `engine`'s policy.
    ///
    /// No face is a decision, not an error. Provider failures and contract
    /// violations abort the request with a [`PipelineError`].
    pub fn authorize(&self, frame: &RawFrame, engine: &AuthorizationEngine) -> Result<AuthDecision, PipelineError> {
        let Some((crop, face)) = self.localizer.locate(frame) else {
            tracing::debug!(authorized = false, "no face detected");
            return Ok(AuthDecision::no_face());
        };

        let distribution = {
            let mut providers = self.providers.lock().map_err(|_| ProviderError::Poisoned)?;
            let expected = providers.embedder.embedding_len();
            let embedding = providers.embedder.embed(&crop)?;
            check_embedding(&embedding, expected)?;
            let raw = providers.classifier.classify(&embedding)?;
            check_distribution(&self.labels, &raw)?
        };

        let decision = engine.authorize(&distribution).with_face_box(face);
        tracing::debug!(
            identity = decision.name(),
            confidence = decision.confidence(),
            gap = decision.confidence_gap(),
            authorized = decision.is_authorized(),
            "authorization decision"
        );
        Ok(decision)
    }
}

/// Lazily built shared value: the initializer runs at most once to
/// completion, and concurrent callers block until it has.
///
/// A failed initialization leaves the slot empty so a later call can retry.
pub struct InitOnce<T> {
    cell: OnceLock<Arc<T>>,
    init: Mutex<()>,
}

pub type SharedPipeline = InitOnce<AuthPipeline>;

impl<T> InitOnce<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        if let Some(value) = self.cell.get() {
            return Ok(Arc::clone(value));
        }

        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = self.cell.get() {
            return Ok(Arc::clone(value));
        }

        let value = Arc::new(init()?);
        // Only the lock holder sets the cell.
        let _ = self.cell.set(Arc::clone(&value));
        Ok(value)
    }
}

impl<T> Default for InitOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CropConfig, DetectorConfig};
    use crate::detector::Detection;
    use crate::engine::AuthPolicy;
    use crate::types::{
        ColorOrder, EmbeddingVector, FaceBox, FaceCrop, ProbabilityDistribution, RejectionReason, NO_FACE_IDENTITY,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedDetector(Vec<Detection>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _gray: &[u8], _w: u32, _h: u32, _p: &DetectorConfig) -> Vec<Detection> {
            self.0.clone()
        }
    }

    struct StubEmbedder {
        input_size: u32,
        len: usize,
        produce: usize,
    }

    impl EmbeddingProducer for StubEmbedder {
        fn input_size(&self) -> u32 {
            self.input_size
        }

        fn embedding_len(&self) -> usize {
            self.len
        }

        fn embed(&mut self, crop: &FaceCrop) -> Result<EmbeddingVector, ProviderError> {
            crop.expect_size(self.input_size)?;
            Ok(EmbeddingVector::new(vec![0.1; self.produce]))
        }
    }

    struct StubClassifier(Vec<(&'static str, f32)>);

    impl Classifier for StubClassifier {
        fn classify(&mut self, _embedding: &EmbeddingVector) -> Result<ProbabilityDistribution, ProviderError> {
            ProbabilityDistribution::new(self.0.iter().copied())
        }
    }

    fn embedder(produce: usize) -> Box<dyn EmbeddingProducer> {
        Box::new(StubEmbedder {
            input_size: 160,
            len: 512,
            produce,
        })
    }

    fn pipeline(
        faces: Vec<Detection>,
        embedder: Box<dyn EmbeddingProducer>,
        scores: Vec<(&'static str, f32)>,
    ) -> AuthPipeline {
        let config = Config {
            labels: vec!["Alice".into(), "Bob".into(), "Carol".into()],
            ..Config::default()
        };
        AuthPipeline::from_config(
            &config,
            Box::new(FixedDetector(faces)),
            embedder,
            Box::new(StubClassifier(scores)),
        )
        .unwrap()
    }

    fn face() -> Vec<Detection> {
        vec![Detection {
            x: 100,
            y: 80,
            width: 120,
            height: 120,
            score: 3.0,
        }]
    }

    fn frame() -> RawFrame {
        RawFrame::new(vec![128; 320 * 240 * 3], 320, 240, ColorOrder::Bgr).unwrap()
    }

    fn login() -> AuthorizationEngine {
        AuthorizationEngine::new(AuthPolicy::login())
    }

    #[test]
    fn test_authorized_end_to_end() {
        let p = pipeline(face(), embedder(512), vec![("Bob", 0.05), ("Alice", 0.92), ("Carol", 0.03)]);
        let d = p.authorize(&frame(), &login()).unwrap();
        assert!(d.is_authorized());
        assert_eq!(d.name(), "Alice");
        assert_eq!(d.face_box(), Some(FaceBox { x: 100, y: 80, w: 120, h: 120 }));
        assert_eq!(d.rejection_reasons(), &[RejectionReason::Authorized]);
        assert_eq!(d.top_predictions().len(), 3);
    }

    #[test]
    fn test_no_face_decision() {
        let p = pipeline(vec![], embedder(512), vec![("Alice", 1.0), ("Bob", 0.0), ("Carol", 0.0)]);
        let d = p.authorize(&frame(), &login()).unwrap();
        assert!(!d.face_detected());
        assert!(!d.is_authorized());
        assert_eq!(d.name(), NO_FACE_IDENTITY);
        assert!(d.face_box().is_none());
    }

    #[test]
    fn test_same_frame_under_two_policies() {
        let p = pipeline(face(), embedder(512), vec![("Alice", 0.78), ("Bob", 0.12), ("Carol", 0.10)]);
        let login = p.authorize(&frame(), &login()).unwrap();
        let continuous = p
            .authorize(&frame(), &AuthorizationEngine::new(AuthPolicy::continuous()))
            .unwrap();
        assert!(!login.is_authorized());
        assert!(continuous.is_authorized());
    }

    #[test]
    fn test_embedding_length_violation() {
        let p = pipeline(face(), embedder(128), vec![("Alice", 1.0), ("Bob", 0.0), ("Carol", 0.0)]);
        assert!(matches!(
            p.authorize(&frame(), &login()),
            Err(PipelineError::Provider(ProviderError::EmbeddingLength { expected: 512, actual: 128 }))
        ));
    }

    #[test]
    fn test_classifier_domain_violations() {
        let short = pipeline(face(), embedder(512), vec![("Alice", 0.6), ("Bob", 0.4)]);
        assert!(matches!(
            short.authorize(&frame(), &login()),
            Err(PipelineError::Provider(ProviderError::DomainSize { expected: 3, actual: 2 }))
        ));

        let not_softmax = pipeline(face(), embedder(512), vec![("Alice", 0.9), ("Bob", 0.9), ("Carol", 0.9)]);
        assert!(matches!(
            not_softmax.authorize(&frame(), &login()),
            Err(PipelineError::Provider(ProviderError::MalformedDistribution(_)))
        ));
    }

    #[test]
    fn test_crop_size_must_match_embedder() {
        let config = Config {
            labels: vec!["Alice".into()],
            crop: CropConfig {
                target_size: 112,
                ..CropConfig::default()
            },
            ..Config::default()
        };
        let result = AuthPipeline::from_config(
            &config,
            Box::new(FixedDetector(vec![])),
            embedder(512),
            Box::new(StubClassifier(vec![("Alice", 1.0)])),
        );
        assert!(matches!(result, Err(ConfigError::InvalidCrop(_))));
    }

    #[test]
    fn test_invalid_config_rejected_before_use() {
        let result = AuthPipeline::from_config(
            &Config::default(),
            Box::new(FixedDetector(vec![])),
            embedder(512),
            Box::new(StubClassifier(vec![])),
        );
        assert!(matches!(result, Err(ConfigError::EmptyLabelSet)));
    }

    #[test]
    fn test_concurrent_init_runs_once() {
        let shared: InitOnce<usize> = InitOnce::new();
        let calls = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let value = shared
                        .get_or_try_init(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            Ok::<_, ConfigError>(42)
                        })
                        .unwrap();
                    assert_eq!(*value, 42);
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared.get().as_deref(), Some(&42));
    }

    #[test]
    fn test_failed_init_can_retry() {
        let shared: InitOnce<u8> = InitOnce::default();
        assert!(shared.get_or_try_init(|| Err(ConfigError::EmptyLabelSet)).is_err());
        assert!(shared.get().is_none());
        assert_eq!(*shared.get_or_try_init(|| Ok::<_, ConfigError>(7)).unwrap(), 7);
    }

    #[test]
    fn test_shared_pipeline_across_threads() {
        static PIPELINE: SharedPipeline = SharedPipeline::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let p = PIPELINE
                        .get_or_try_init(|| {
                            Ok::<_, ConfigError>(pipeline(
                                face(),
                                embedder(512),
                                vec![("Alice", 0.1), ("Bob", 0.85), ("Carol", 0.05)],
                            ))
                        })
                        .unwrap();
                    assert_eq!(p.authorize(&frame(), &login()).unwrap().name(), "Bob");
                });
            }
        });
    }
}
