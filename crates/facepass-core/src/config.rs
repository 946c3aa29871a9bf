//! Configuration surface, loaded from TOML with `FACEPASS_*` environment overrides.
//!
//! Everything is validated eagerly by [`Config::validate`] so that a bad
//! threshold or an empty label set is reported before any request is served.

use crate::engine::{AuthPolicy, DEFAULT_MIN_CONFIDENCE_GAP, DEFAULT_THRESHOLD};
use crate::error::ConfigError;
use crate::labels::LabelSet;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the policy built from the top-level `threshold` / `min_confidence_gap`.
pub const LOGIN_PROFILE: &str = "login";
/// Name of the built-in continuous verification policy.
pub const CONTINUOUS_PROFILE: &str = "continuous";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum top-1 probability for the login policy.
    pub threshold: f32,
    /// Minimum margin between top-1 and top-2 for the login policy.
    pub min_confidence_gap: f32,
    /// Additional named policies, e.g. `[profiles.continuous]`.
    pub profiles: BTreeMap<String, ProfileConfig>,
    pub detector: DetectorConfig,
    pub crop: CropConfig,
    /// Enrolled identities in class-index order.
    pub labels: Vec<String>,
    /// Alternative to `labels`: a text artifact with one label per line.
    pub labels_file: Option<PathBuf>,
    pub models: ModelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ProfileConfig {
    pub threshold: f32,
    /// Omitted means no gap check.
    #[serde(default)]
    pub min_confidence_gap: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Ratio between successive detection scales (> 1).
    #[serde(alias = "scaleFactor")]
    pub scale_factor: f32,
    /// Detection strictness; higher rejects more weak candidates.
    #[serde(alias = "minNeighbors")]
    pub min_neighbors: u32,
    /// Smallest face considered, `[width, height]` in pixels.
    #[serde(alias = "minFaceSize")]
    pub min_face_size: [u32; 2],
    /// Detector model file (SeetaFace `.bin` for the cascade backend).
    pub model_path: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_face_size: [60, 60],
            model_path: None,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(ConfigError::InvalidDetector(format!(
                "scale_factor must be > 1.0, got {}",
                self.scale_factor
            )));
        }
        if self.min_neighbors == 0 {
            return Err(ConfigError::InvalidDetector("min_neighbors must be >= 1".into()));
        }
        if self.min_face_size.contains(&0) {
            return Err(ConfigError::InvalidDetector(format!(
                "min_face_size must be non-zero, got {:?}",
                self.min_face_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    /// Pixels added on each side of the detected box before cropping.
    pub padding: u32,
    /// Side length of the square crop handed to the embedder.
    #[serde(alias = "targetSize")]
    pub target_size: u32,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            padding: 20,
            target_size: 160,
        }
    }
}

impl CropConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_size == 0 {
            return Err(ConfigError::InvalidCrop("target_size must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// FaceNet-style embedding model (ONNX).
    pub embedder_path: Option<PathBuf>,
    /// Softmax classifier over `labels` (ONNX).
    pub classifier_path: Option<PathBuf>,
    /// Length of the embedding vector.
    pub embedding_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedder_path: None,
            classifier_path: None,
            embedding_dim: 512,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let continuous = AuthPolicy::continuous();
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_confidence_gap: DEFAULT_MIN_CONFIDENCE_GAP,
            profiles: BTreeMap::from([(
                CONTINUOUS_PROFILE.to_string(),
                ProfileConfig {
                    threshold: continuous.threshold(),
                    min_confidence_gap: continuous.min_confidence_gap(),
                },
            )]),
            detector: DetectorConfig::default(),
            crop: CropConfig::default(),
            labels: Vec::new(),
            labels_file: None,
            models: ModelConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file, then apply `FACEPASS_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Defaults plus `FACEPASS_*` environment overrides, without a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;
        // A file that declares its own profiles still gets the built-in continuous one.
        if !config.profiles.contains_key(CONTINUOUS_PROFILE) {
            let continuous = AuthPolicy::continuous();
            config.profiles.insert(
                CONTINUOUS_PROFILE.to_string(),
                ProfileConfig {
                    threshold: continuous.threshold(),
                    min_confidence_gap: continuous.min_confidence_gap(),
                },
            );
        }
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_f32(&lookup, "FACEPASS_THRESHOLD", &mut self.threshold);
        override_f32(&lookup, "FACEPASS_MIN_CONFIDENCE_GAP", &mut self.min_confidence_gap);
        if let Some(path) = lookup("FACEPASS_LABELS_FILE") {
            self.labels_file = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("FACEPASS_DETECTOR_MODEL") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
    }

    /// Check every option. Must succeed before a pipeline is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.label_set()?;
        self.policy(None)?;
        for name in self.profiles.keys() {
            self.policy(Some(name))?;
        }
        self.detector.validate()?;
        self.crop.validate()?;
        Ok(())
    }

    /// The enrolled label set: inline `labels` take precedence over `labels_file`.
    pub fn label_set(&self) -> Result<LabelSet, ConfigError> {
        match (&self.labels_file, self.labels.is_empty()) {
            (Some(path), true) => LabelSet::from_file(path),
            _ => LabelSet::new(self.labels.iter().cloned()),
        }
    }

    /// Resolve a policy by profile name; `None` or `"login"` is the top-level policy.
    pub fn policy(&self, profile: Option<&str>) -> Result<AuthPolicy, ConfigError> {
        match profile {
            None | Some(LOGIN_PROFILE) => AuthPolicy::new(self.threshold, self.min_confidence_gap),
            Some(name) => {
                let p = self
                    .profiles
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
                AuthPolicy::new(p.threshold, p.min_confidence_gap)
            }
        }
    }

    /// Names of every resolvable profile.
    pub fn profile_names(&self) -> Vec<&str> {
        std::iter::once(LOGIN_PROFILE)
            .chain(self.profiles.keys().map(String::as_str).filter(|n| *n != LOGIN_PROFILE))
            .collect()
    }
}

fn override_f32(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut f32) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<f32>() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.threshold, 0.80);
        assert_eq!(config.min_confidence_gap, 0.20);
        assert_eq!(config.detector.scale_factor, 1.1);
        assert_eq!(config.detector.min_neighbors, 5);
        assert_eq!(config.detector.min_face_size, [60, 60]);
        assert_eq!(config.crop, CropConfig { padding: 20, target_size: 160 });
        let continuous = config.policy(Some(CONTINUOUS_PROFILE)).unwrap();
        assert_eq!(continuous, AuthPolicy::continuous());
    }

    #[test]
    fn test_parse_toml_with_camel_case_aliases() {
        let config = Config::from_toml_str(
            r#"
            threshold = 0.9
            min_confidence_gap = 0.1
            labels = ["Alice", "Bob"]

            [detector]
            scaleFactor = 1.2
            minNeighbors = 3
            minFaceSize = [40, 48]

            [crop]
            padding = 10
            targetSize = 112

            [profiles.kiosk]
            threshold = 0.7
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.detector.scale_factor, 1.2);
        assert_eq!(config.detector.min_neighbors, 3);
        assert_eq!(config.detector.min_face_size, [40, 48]);
        assert_eq!(config.crop.target_size, 112);
        assert_eq!(config.label_set().unwrap().len(), 2);
        let kiosk = config.policy(Some("kiosk")).unwrap();
        assert_eq!(kiosk.threshold(), 0.7);
        assert_eq!(kiosk.min_confidence_gap(), 0.0);
        // built-in profile survives a file that declares its own
        assert!(config.policy(Some(CONTINUOUS_PROFILE)).is_ok());
        assert_eq!(config.profile_names(), vec!["login", "continuous", "kiosk"]);
    }

    #[test]
    fn test_validate_fails_fast() {
        let mut config = Config {
            labels: vec!["Alice".into()],
            ..Config::default()
        };
        config.validate().unwrap();

        config.threshold = 1.2;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { name: "threshold", .. })));
        config.threshold = 0.8;

        config.labels.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyLabelSet)));
        config.labels.push("Alice".into());

        config.detector.scale_factor = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDetector(_))));
        config.detector.scale_factor = 1.1;

        config.crop.target_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCrop(_))));
        config.crop.target_size = 160;

        config.profiles.insert("bad".into(), ProfileConfig { threshold: 0.5, min_confidence_gap: 2.0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_profile() {
        assert!(matches!(
            Config::default().policy(Some("nope")),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "FACEPASS_THRESHOLD" => Some("0.95".into()),
            "FACEPASS_MIN_CONFIDENCE_GAP" => Some("not-a-number".into()),
            "FACEPASS_LABELS_FILE" => Some("/etc/facepass/labels.txt".into()),
            _ => None,
        });
        assert_eq!(config.threshold, 0.95);
        assert_eq!(config.min_confidence_gap, 0.20);
        assert_eq!(config.labels_file, Some(PathBuf::from("/etc/facepass/labels.txt")));
    }

    #[test]
    fn test_rejects_unparsable_toml() {
        assert!(matches!(Config::from_toml_str("threshold = ["), Err(ConfigError::Parse(_))));
    }
}
