//! Face localization: find the primary face in a frame and cut a normalized crop.
//!
//! Detection runs on a grayscale copy; the crop is taken from the color
//! frame, padded, clamped to the frame, resized to the embedder input size
//! and delivered in RGB order.

use crate::config::{CropConfig, DetectorConfig};
use crate::detector::FaceDetector;
use crate::error::ConfigError;
use crate::types::{FaceBox, FaceCrop, RawFrame};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

pub struct FaceLocalizer {
    detector: Box<dyn FaceDetector>,
    detector_config: DetectorConfig,
    crop: CropConfig,
}

impl FaceLocalizer {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        detector_config: DetectorConfig,
        crop: CropConfig,
    ) -> Result<Self, ConfigError> {
        detector_config.validate()?;
        crop.validate()?;
        Ok(Self {
            detector,
            detector_config,
            crop,
        })
    }

    pub fn crop_config(&self) -> &CropConfig {
        &self.crop
    }

    /// Locate the most prominent face and return its crop and box.
    ///
    /// `None` means no face: a normal outcome, not an error.
    pub fn locate(&self, frame: &RawFrame) -> Option<(FaceCrop, FaceBox)> {
        let face = self.find_face(frame)?;
        let region = padded_region(face, self.crop.padding, frame.width(), frame.height());
        let crop = crop_and_resize(frame, region, self.crop.target_size);
        Some((crop, face))
    }

    /// Detection and primary-face selection only, without cropping.
    pub fn find_face(&self, frame: &RawFrame) -> Option<FaceBox> {
        let gray = frame.to_grayscale();
        let detections = self
            .detector
            .detect(&gray, frame.width(), frame.height(), &self.detector_config);
        let [min_w, min_h] = self.detector_config.min_face_size;

        // Minimum size applies to the detector's box, before clamping to the frame.
        let candidates = detections
            .iter()
            .filter(|d| d.width >= min_w && d.height >= min_h)
            .filter_map(|d| FaceBox::clamped(d.x, d.y, d.width, d.height, frame.width(), frame.height()));
        let face = select_largest(candidates);

        tracing::debug!(
            detections = detections.len(),
            face = ?face,
            "face localization"
        );
        face
    }
}

/// The box with the largest area; the first one wins a tie.
///
/// At most one identity is authenticated per frame and the largest face is
/// taken to be the subject in front of the camera.
pub fn select_largest(boxes: impl IntoIterator<Item = FaceBox>) -> Option<FaceBox> {
    boxes.into_iter().fold(None, |best, b| match best {
        Some(current) if current.area() >= b.area() => Some(current),
        _ => Some(b),
    })
}

/// Grow `face` by `padding` on every side, clamped so that the region never
/// leaves `[0, frame_width) × [0, frame_height)`.
pub fn padded_region(face: FaceBox, padding: u32, frame_width: u32, frame_height: u32) -> FaceBox {
    let left = face.x.saturating_sub(padding);
    let top = face.y.saturating_sub(padding);
    let right = face.x.saturating_add(face.w).saturating_add(padding).min(frame_width);
    let bottom = face.y.saturating_add(face.h).saturating_add(padding).min(frame_height);
    FaceBox {
        x: left,
        y: top,
        w: right.saturating_sub(left),
        h: bottom.saturating_sub(top),
    }
}

/// Copy `region` out of the frame in RGB order and resize it (bilinear) to `size`×`size`.
fn crop_and_resize(frame: &RawFrame, region: FaceBox, size: u32) -> FaceCrop {
    let cropped = RgbImage::from_fn(region.w, region.h, |x, y| Rgb(frame.rgb_at(region.x + x, region.y + y)));
    let resized = if region.w == size && region.h == size {
        cropped
    } else {
        imageops::resize(&cropped, size, size, FilterType::Triangle)
    };
    FaceCrop::new(resized)
}
