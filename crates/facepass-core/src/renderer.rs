//! Operator feedback: draw a decision over a copy of its frame.

use crate::error::ConfigError;
use crate::types::{AuthDecision, FaceBox, RawFrame};
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

pub const AUTHORIZED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const REJECTED_COLOR: Rgb<u8> = Rgb([255, 165, 0]);
pub const NO_FACE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Detection-only overlay, no decision attached.
pub const LOCATED_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Minimum room above the box (pixels) for the label to go on top.
const LABEL_MARGIN: u32 = 40;
/// Label background spans `baseline - 25 ..= baseline + 5`.
const LABEL_ABOVE: i32 = 25;
const LABEL_HEIGHT: u32 = 30;
const TEXT_INSET: i32 = 5;

const NAME_SCALE: f32 = 16.0;
const DETAIL_SCALE: f32 = 12.0;
const BANNER_SCALE: f32 = 24.0;
const BANNER_ORIGIN: (i32, i32) = (10, 10);

/// Bundled overlay font (DejaVu Sans).
static DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// A decision drawn over a copy of the input frame; same size and channel order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFrame {
    frame: RawFrame,
}

impl RenderedFrame {
    pub fn frame(&self) -> &RawFrame {
        &self.frame
    }

    pub fn into_frame(self) -> RawFrame {
        self.frame
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        self.frame.to_rgb_image()
    }
}

/// Draws decisions with the bundled font unless another one is supplied.
#[derive(Clone)]
pub struct ResultRenderer {
    font: Option<FontArc>,
}

impl Default for ResultRenderer {
    fn default() -> Self {
        let font = FontArc::try_from_slice(DEFAULT_FONT)
            .map_err(|e| tracing::warn!(error = %e, "bundled font unreadable, text overlay disabled"))
            .ok();
        Self { font }
    }
}

impl ResultRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Load a TrueType/OpenType font for the text overlay.
    pub fn from_font_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontArc::try_from_vec(bytes).map_err(|_| ConfigError::InvalidFont(path.to_path_buf()))?;
        Ok(Self::with_font(font))
    }

    /// Draw `decision` over a copy of `frame`. The input frame is never modified.
    pub fn render(&self, frame: &RawFrame, decision: &AuthDecision) -> RenderedFrame {
        let mut canvas = frame.to_rgb_image();

        match decision.face_box().filter(|_| decision.face_detected()) {
            None => {
                if let Some(font) = &self.font {
                    let (x, y) = BANNER_ORIGIN;
                    draw_text_mut(&mut canvas, NO_FACE_COLOR, x, y, PxScale::from(BANNER_SCALE), font, decision.name());
                }
            }
            Some(face) if face.w > 0 && face.h > 0 => {
                let color = if decision.is_authorized() {
                    AUTHORIZED_COLOR
                } else {
                    REJECTED_COLOR
                };
                self.draw_face(&mut canvas, face, color, decision);
            }
            Some(_) => {}
        }

        RenderedFrame {
            frame: RawFrame::from_rgb_in_order(canvas, frame.order()),
        }
    }

    /// Outline a located face without any decision text.
    pub fn outline(&self, frame: &RawFrame, face: FaceBox) -> RenderedFrame {
        let mut canvas = frame.to_rgb_image();
        draw_outline(&mut canvas, face, LOCATED_COLOR);
        RenderedFrame {
            frame: RawFrame::from_rgb_in_order(canvas, frame.order()),
        }
    }

    fn draw_face(&self, canvas: &mut RgbImage, face: FaceBox, color: Rgb<u8>, decision: &AuthDecision) {
        let x = face.x as i32;
        draw_outline(canvas, face, color);

        let baseline = label_baseline(face);
        draw_filled_rect_mut(
            canvas,
            Rect::at(x, baseline - LABEL_ABOVE).of_size(face.w, LABEL_HEIGHT),
            color,
        );

        if let Some(font) = &self.font {
            let confidence = format!("Confidence: {:.1}%", decision.confidence() * 100.0);
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                x + TEXT_INSET,
                baseline - LABEL_ABOVE + 1,
                PxScale::from(NAME_SCALE),
                font,
                decision.name(),
            );
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                x + TEXT_INSET,
                baseline - LABEL_ABOVE + 1 + NAME_SCALE as i32,
                PxScale::from(DETAIL_SCALE),
                font,
                &confidence,
            );
        }
    }
}

/// Two-pixel box outline; empty boxes draw nothing.
fn draw_outline(canvas: &mut RgbImage, face: FaceBox, color: Rgb<u8>) {
    if face.w == 0 || face.h == 0 {
        return;
    }
    let (x, y) = (face.x as i32, face.y as i32);
    draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(face.w, face.h), color);
    if face.w > 2 && face.h > 2 {
        draw_hollow_rect_mut(canvas, Rect::at(x + 1, y + 1).of_size(face.w - 2, face.h - 2), color);
    }
}

/// Vertical anchor of the label: above the box when there are more than
/// 40 pixels of room, otherwise below it.
pub fn label_baseline(face: FaceBox) -> i32 {
    if face.y > LABEL_MARGIN {
        face.y as i32 - 10
    } else {
        (face.y + face.h) as i32 + 25
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AuthPolicy, AuthorizationEngine};
    use crate::types::{ColorOrder, ProbabilityDistribution};

    fn black(width: u32, height: u32, order: ColorOrder) -> RawFrame {
        RawFrame::new(vec![0; (width * height * 3) as usize], width, height, order).unwrap()
    }

    fn decision(p_top: f32, face: FaceBox) -> AuthDecision {
        let dist = ProbabilityDistribution::new([("Alice", p_top), ("Bob", 1.0 - p_top)]).unwrap();
        AuthorizationEngine::new(AuthPolicy::login()).authorize(&dist).with_face_box(face)
    }

    #[test]
    fn test_label_placement_rule() {
        assert_eq!(label_baseline(FaceBox { x: 0, y: 41, w: 10, h: 10 }), 31);
        assert_eq!(label_baseline(FaceBox { x: 0, y: 40, w: 10, h: 100 }), 165);
        assert_eq!(label_baseline(FaceBox { x: 0, y: 0, w: 10, h: 50 }), 75);
    }

    #[test]
    fn test_authorized_box_is_green() {
        let frame = black(300, 300, ColorOrder::Rgb);
        let face = FaceBox { x: 50, y: 60, w: 100, h: 100 };
        let out = ResultRenderer::new().render(&frame, &decision(0.95, face)).to_rgb_image();
        assert_eq!(out.get_pixel(50, 60), &AUTHORIZED_COLOR);
        assert_eq!(out.get_pixel(149, 159), &AUTHORIZED_COLOR);
        // label background above the box: rows 25..55, right of the name text
        assert_eq!(out.get_pixel(145, 27), &AUTHORIZED_COLOR);
        // box interior untouched
        assert_eq!(out.get_pixel(100, 110), &Rgb([0, 0, 0]));
        // input frame untouched
        assert!(frame.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejected_box_label_below_near_top() {
        let frame = black(300, 300, ColorOrder::Rgb);
        let face = FaceBox { x: 50, y: 20, w: 100, h: 100 };
        let out = ResultRenderer::new().render(&frame, &decision(0.5, face)).to_rgb_image();
        assert_eq!(out.get_pixel(50, 20), &REJECTED_COLOR);
        // baseline 145 -> background rows 120..150
        assert_eq!(out.get_pixel(145, 122), &REJECTED_COLOR);
        assert_eq!(out.get_pixel(100, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_bgr_frame_stays_bgr() {
        let frame = black(200, 200, ColorOrder::Bgr);
        let face = FaceBox { x: 60, y: 60, w: 80, h: 80 };
        let rendered = ResultRenderer::new().render(&frame, &decision(0.5, face));
        let out = rendered.frame();
        assert_eq!(out.order(), ColorOrder::Bgr);
        assert_eq!((out.width(), out.height()), (200, 200));
        let i = (60 * 200 + 60) * 3;
        assert_eq!(&out.data()[i..i + 3], &[0, 165, 255]);
    }

    #[test]
    fn test_no_face_banner_is_drawn() {
        let frame = black(200, 100, ColorOrder::Bgr);
        let out = ResultRenderer::new().render(&frame, &AuthDecision::no_face()).to_rgb_image();
        let red = out.pixels().filter(|p| p.0[0] > 0 && p.0[1] == 0 && p.0[2] == 0).count();
        assert!(red > 0, "no banner text drawn");
        // no box, text stays in the top-left region
        assert!(out.enumerate_pixels().all(|(_, y, p)| y < 50 || p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_label_text_is_drawn() {
        let frame = black(300, 300, ColorOrder::Rgb);
        let face = FaceBox { x: 50, y: 60, w: 200, h: 100 };
        let out = ResultRenderer::new().render(&frame, &decision(0.95, face)).to_rgb_image();
        // white text blended onto the green bar (rows 25..55) lifts red and blue
        let text = (25..55)
            .flat_map(|y| (50..250).map(move |x| (x, y)))
            .filter(|&(x, y)| {
                let p = out.get_pixel(x, y).0;
                p[0] > 0 && p[2] > 0
            })
            .count();
        assert!(text > 0, "no label text drawn");
    }

    #[test]
    fn test_outline_only() {
        let frame = black(100, 100, ColorOrder::Rgb);
        let out = ResultRenderer::new()
            .outline(&frame, FaceBox { x: 10, y: 50, w: 30, h: 30 })
            .to_rgb_image();
        assert_eq!(out.get_pixel(11, 51), &LOCATED_COLOR);
        assert_eq!(out.get_pixel(25, 65), &Rgb([0, 0, 0]));
        // no label background
        assert_eq!(out.get_pixel(25, 30), &Rgb([0, 0, 0]));
        let empty = ResultRenderer::new().outline(&frame, FaceBox { x: 10, y: 10, w: 0, h: 5 });
        assert_eq!(empty.into_frame(), frame);
    }

    #[test]
    fn test_missing_font_file() {
        assert!(matches!(
            ResultRenderer::from_font_file(Path::new("/nonexistent/font.ttf")),
            Err(ConfigError::Io { .. })
        ));
    }
}
