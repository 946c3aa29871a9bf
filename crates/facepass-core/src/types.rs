use crate::error::{DecodeError, ProviderError};
use image::{Rgb, RgbImage};
use serde::{Serialize, Serializer};
use std::fmt;

/// Identity reported when a face was found but the policy rejected it.
pub const UNKNOWN_IDENTITY: &str = "Unknown";
/// Identity reported when no face was found in the frame.
pub const NO_FACE_IDENTITY: &str = "No face detected";

/// Channel order of a 3-channel interleaved pixel buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    /// Camera/OpenCV order.
    #[default]
    Bgr,
    Rgb,
}

/// A decoded camera frame: interleaved 8-bit, 3 channels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    order: ColorOrder,
}

impl RawFrame {
    /// Wrap a pixel buffer, checking that it is non-empty and exactly `width * height * 3` bytes.
    pub fn new(data: Vec<u8>, width: u32, height: u32, order: ColorOrder) -> Result<Self, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroDimensions { width, height });
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(DecodeError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            order,
        })
    }

    pub fn from_rgb_image(image: RgbImage) -> Result<Self, DecodeError> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, ColorOrder::Rgb)
    }

    /// Rebuild a frame in `order` from an RGB image whose dimensions came from
    /// a valid frame.
    pub(crate) fn from_rgb_in_order(image: RgbImage, order: ColorOrder) -> Self {
        let (width, height) = image.dimensions();
        let mut data = image.into_raw();
        if order == ColorOrder::Bgr {
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }
        Self {
            data,
            width,
            height,
            order,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> ColorOrder {
        self.order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at (x, y) as `[r, g, b]` regardless of storage order.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        let px = [self.data[i], self.data[i + 1], self.data[i + 2]];
        match self.order {
            ColorOrder::Rgb => px,
            ColorOrder::Bgr => [px[2], px[1], px[0]],
        }
    }

    /// Copy into an RGB image buffer.
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| Rgb(self.rgb_at(x, y)))
    }

    /// Luma plane (ITU-R BT.601 weights), `width * height` bytes. Used for detection only.
    pub fn to_grayscale(&self) -> Vec<u8> {
        let mut gray = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let [r, g, b] = self.rgb_at(x, y);
                let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                gray.push(luma.round().clamp(0.0, 255.0) as u8);
            }
        }
        gray
    }
}

/// Face region in frame coordinates. Always lies fully inside the frame it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl FaceBox {
    /// Intersect a raw detector box (which may overhang the frame) with the frame.
    /// Returns `None` when nothing of the box remains.
    pub fn clamped(x: i32, y: i32, w: u32, h: u32, frame_width: u32, frame_height: u32) -> Option<Self> {
        let x0 = (x as i64).clamp(0, frame_width as i64);
        let y0 = (y as i64).clamp(0, frame_height as i64);
        let x1 = (x as i64 + w as i64).clamp(0, frame_width as i64);
        let y1 = (y as i64 + h as i64).clamp(0, frame_height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            w: (x1 - x0) as u32,
            h: (y1 - y0) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

/// Normalized square RGB face image at the embedding input size.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCrop {
    image: RgbImage,
}

impl FaceCrop {
    /// Only the localizer (and tests) build crops, so the size invariant holds by construction.
    pub(crate) fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Side length in pixels.
    pub fn size(&self) -> u32 {
        self.image.width()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Check the crop matches the size a provider expects.
    pub fn expect_size(&self, expected: u32) -> Result<(), ProviderError> {
        if self.image.width() != expected || self.image.height() != expected {
            return Err(ProviderError::CropSize {
                expected,
                actual: self.image.width(),
            });
        }
        Ok(())
    }
}

/// Fixed-length identity signature produced by an embedding provider.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
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
}

/// Classifier output: one probability per label.
///
/// Entry order is significant: it is the tie-break order used when ranking,
/// so distributions entering the engine should be aligned to the label set
/// registration order with [`LabelSet::align`](crate::labels::LabelSet::align).
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityDistribution {
    entries: Vec<(String, f32)>,
}

impl ProbabilityDistribution {
    /// Build from `(label, probability)` pairs. Rejects empty input, duplicate
    /// labels and probabilities that are non-finite or outside [0, 1].
    pub fn new<I, S>(entries: I) -> Result<Self, ProviderError>
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        let entries: Vec<(String, f32)> = entries.into_iter().map(|(l, p)| (l.into(), p)).collect();
        if entries.is_empty() {
            return Err(ProviderError::MalformedDistribution("no entries".into()));
        }
        for (i, (label, p)) in entries.iter().enumerate() {
            if !p.is_finite() || !(0.0..=1.0).contains(p) {
                return Err(ProviderError::MalformedDistribution(format!(
                    "probability for {label:?} is {p}, outside [0, 1]"
                )));
            }
            if entries[..i].iter().any(|(other, _)| other == label) {
                return Err(ProviderError::MalformedDistribution(format!(
                    "label {label:?} appears more than once"
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(String, f32)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, p)| *p)
    }

    /// Sum of all probabilities (≈1 for a softmax output).
    pub fn total(&self) -> f32 {
        self.entries.iter().map(|(_, p)| p).sum()
    }
}

/// One entry of the top-k ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPrediction {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
}

/// Why a decision came out the way it did.
///
/// An authorized decision carries exactly `[Authorized]`; a rejected one carries
/// one or two of the other variants. Serialized in the compact text form,
/// e.g. `confidence_too_low_60.00%<80%`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectionReason {
    Authorized,
    NoFaceDetected,
    ConfidenceTooLow { observed: f32, required: f32 },
    GapTooSmall { observed: f32, required: f32 },
}

impl RejectionReason {
    /// Stable machine code without the numeric payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::NoFaceDetected => "no_face_detected",
            Self::ConfidenceTooLow { .. } => "confidence_too_low",
            Self::GapTooSmall { .. } => "gap_too_small",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfidenceTooLow { observed, required } | Self::GapTooSmall { observed, required } => write!(
                f,
                "{}_{:.2}%<{:.0}%",
                self.code(),
                observed * 100.0,
                required * 100.0
            ),
            _ => f.write_str(self.code()),
        }
    }
}

impl Serialize for RejectionReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Final verdict of one authorization request. The only value that leaves the core.
///
/// Fields are private so that `authorized` and `rejection_reasons` can never
/// disagree: decisions are only built by the engine or [`AuthDecision::no_face`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthDecision {
    name: String,
    confidence: f32,
    confidence_gap: f32,
    face_detected: bool,
    face_box: Option<FaceBox>,
    authorized: bool,
    top_predictions: Vec<RankedPrediction>,
    rejection_reasons: Vec<RejectionReason>,
}

impl AuthDecision {
    /// Short-circuit decision for a frame without a face.
    pub fn no_face() -> Self {
        Self {
            name: NO_FACE_IDENTITY.to_string(),
            confidence: 0.0,
            confidence_gap: 0.0,
            face_detected: false,
            face_box: None,
            authorized: false,
            top_predictions: Vec::new(),
            rejection_reasons: vec![RejectionReason::NoFaceDetected],
        }
    }

    pub(crate) fn granted(
        identity: String,
        confidence: f32,
        confidence_gap: f32,
        top_predictions: Vec<RankedPrediction>,
    ) -> Self {
        Self {
            name: identity,
            confidence,
            confidence_gap,
            face_detected: true,
            face_box: None,
            authorized: true,
            top_predictions,
            rejection_reasons: vec![RejectionReason::Authorized],
        }
    }

    pub(crate) fn denied(
        confidence: f32,
        confidence_gap: f32,
        top_predictions: Vec<RankedPrediction>,
        reasons: Vec<RejectionReason>,
    ) -> Self {
        debug_assert!(!reasons.is_empty() && reasons.len() <= 2);
        Self {
            name: UNKNOWN_IDENTITY.to_string(),
            confidence,
            confidence_gap,
            face_detected: true,
            face_box: None,
            authorized: false,
            top_predictions,
            rejection_reasons: reasons,
        }
    }

    /// Attach the localized face region to a face-detected decision.
    pub fn with_face_box(mut self, face_box: FaceBox) -> Self {
        if self.face_detected {
            self.face_box = Some(face_box);
        }
        self
    }

    /// Identity label, or one of the sentinel identities.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn confidence_gap(&self) -> f32 {
        self.confidence_gap
    }

    pub fn face_detected(&self) -> bool {
        self.face_detected
    }

    pub fn face_box(&self) -> Option<FaceBox> {
        self.face_box
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn top_predictions(&self) -> &[RankedPrediction] {
        &self.top_predictions
    }

    pub fn rejection_reasons(&self) -> &[RejectionReason] {
        &self.rejection_reasons
    }

    /// Reduced view reported by the continuous verification flow.
    pub fn summary(&self) -> VerificationSummary {
        VerificationSummary {
            name: self.name.clone(),
            confidence: self.confidence,
            authorized: self.authorized,
            face_detected: self.face_detected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationSummary {
    pub name: String,
    pub confidence: f32,
    pub authorized: bool,
    pub face_detected: bool,
}
