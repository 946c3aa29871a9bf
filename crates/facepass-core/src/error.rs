//! Error taxonomy for the authorization pipeline.
//!
//! A missing face is not an error: it is a valid terminal decision
//! (see [`AuthDecision::no_face`](crate::types::AuthDecision::no_face)).

use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration, detected eagerly before any request is served.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a finite value in [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("label set is empty, at least one enrolled identity is required")]
    EmptyLabelSet,
    #[error("label set contains a blank label at position {0}")]
    BlankLabel(usize),
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("label {0:?} collides with a reserved sentinel identity")]
    ReservedLabel(String),
    #[error("invalid detector parameter: {0}")]
    InvalidDetector(String),
    #[error("invalid crop parameter: {0}")]
    InvalidCrop(String),
    #[error("no model path configured for the {0}")]
    MissingModel(&'static str),
    #[error("unknown policy profile: {0}")]
    UnknownProfile(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("font could not be parsed: {0}")]
    InvalidFont(PathBuf),
}

/// Invalid or corrupt image input.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },
    #[error("pixel buffer length mismatch: expected {expected} bytes, got {actual}")]
    BufferLength { expected: usize, actual: usize },
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Failure or contract violation by the detector, embedding or classifier provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("face crop is {actual}x{actual}, provider expects {expected}x{expected}")]
    CropSize { expected: u32, actual: u32 },
    #[error("expected {expected}-dim embedding, got {actual}")]
    EmbeddingLength { expected: usize, actual: usize },
    #[error("distribution covers {actual} labels, label set has {expected}")]
    DomainSize { expected: usize, actual: usize },
    #[error("distribution contains label {0:?} outside the configured label set")]
    UnknownLabel(String),
    #[error("malformed distribution: {0}")]
    MalformedDistribution(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("provider lock poisoned by a previous panic")]
    Poisoned,
    #[cfg(feature = "onnx")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Any failure that prevents an authorization decision from being produced.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}
