//! Decode step: encoded image bytes or a base64 data URL into a [`RawFrame`].
//!
//! Decode failures are surfaced as [`DecodeError`]; a corrupt image is never
//! treated as a frame without a face.

use crate::error::DecodeError;
use crate::types::RawFrame;
use base64::Engine;

/// Decode JPEG/PNG (or any format enabled in `image`) into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> Result<RawFrame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?.to_rgb8();
    tracing::debug!(width = image.width(), height = image.height(), "decoded frame");
    RawFrame::from_rgb_image(image)
}

/// Decode a base64 payload, with or without a `data:image/...;base64,` prefix.
pub fn decode_data_url(payload: &str) -> Result<RawFrame, DecodeError> {
    let encoded = match payload.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => payload,
    };
    let encoded: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = base64::prelude::BASE64_STANDARD.decode(encoded)?;
    decode_image(&bytes)
}
