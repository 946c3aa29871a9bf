//! facepass-core — face-authentication decisions from a single frame.
//!
//! A frame is localized to its most prominent face, embedded, classified
//! against the enrolled label set, and the resulting distribution is turned
//! into an allow/deny decision by a threshold + margin policy. Detection and
//! the two models are injected behind traits.

pub mod config;
pub mod decode;
pub mod detector;
pub mod engine;
pub mod error;
pub mod labels;
pub mod localizer;
pub mod pipeline;
pub mod provider;
pub mod renderer;
pub mod types;

pub use config::Config;
pub use engine::{AuthPolicy, AuthorizationEngine};
pub use error::{ConfigError, DecodeError, PipelineError, ProviderError};
pub use labels::LabelSet;
pub use localizer::FaceLocalizer;
pub use pipeline::{AuthPipeline, SharedPipeline};
pub use renderer::{RenderedFrame, ResultRenderer};
pub use types::{AuthDecision, FaceBox, RawFrame, RejectionReason, VerificationSummary};
