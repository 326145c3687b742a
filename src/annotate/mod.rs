//! Overlay drawing for display frames.
//!
//! The annotator only touches the output image; detection state is read, never
//! modified.

use std::sync::OnceLock;

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::{BoundingBox, DetectionSet};

const FONT_DATA: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BACKDROP_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const PLACEHOLDER_BACKGROUND: Rgb<u8> = Rgb([40, 0, 0]);
const PLACEHOLDER_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const MARGIN: u32 = 10;
const LABEL_PADDING: u32 = 2;

/// Embedded overlay font, parsed once. `None` only if the embedded bytes are
/// not a usable font, in which case labels are skipped.
fn overlay_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(FONT_DATA) {
        Ok(font) => Some(font),
        Err(err) => {
            log::warn!("overlay font unusable, labels disabled: {}", err);
            None
        }
    })
    .as_ref()
}

/// Draws detection boxes, the occupancy count and the measured frame rate.
#[derive(Clone, Debug)]
pub struct FrameAnnotator {
    box_color: Rgb<u8>,
    text_color: Rgb<u8>,
    thickness: u32,
    text_height: f32,
    show_fps: bool,
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FrameAnnotator {
    pub fn new(show_fps: bool) -> Self {
        Self {
            box_color: BOX_COLOR,
            text_color: TEXT_COLOR,
            thickness: 2,
            text_height: 24.0,
            show_fps,
        }
    }

    pub fn set_show_fps(&mut self, show_fps: bool) {
        self.show_fps = show_fps;
    }

    /// Draw one rectangle per detection, then the count and FPS labels.
    pub fn annotate(
        &self,
        image: &mut RgbImage,
        detections: &DetectionSet,
        count: usize,
        fps: Option<f32>,
    ) {
        for detection in detections {
            draw_box(image, &detection.bbox, self.box_color, self.thickness);
        }

        let line_height = self.text_height.ceil() as u32 + 3 * LABEL_PADDING;
        draw_label(
            image,
            MARGIN,
            MARGIN,
            &format!("Count: {}", count),
            self.text_color,
            self.text_height,
        );
        if self.show_fps {
            if let Some(fps) = fps {
                draw_label(
                    image,
                    MARGIN,
                    MARGIN + line_height,
                    &format!("FPS: {:.1}", fps),
                    self.text_color,
                    self.text_height,
                );
            }
        }
    }
}

/// A frame that carries an error message in place of video.
pub fn render_placeholder(width: u32, height: u32, message: &str) -> RgbImage {
    let mut image = RgbImage::from_pixel(width.max(1), height.max(1), PLACEHOLDER_BACKGROUND);
    let text_height = if width >= 480 { 28.0 } else { 16.0 };
    let y = (height / 2).saturating_sub(text_height as u32 / 2);
    draw_label(&mut image, MARGIN, y, message, PLACEHOLDER_TEXT, text_height);
    image
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (img_w, img_h) = image.dimensions();
    if bbox.x >= img_w || bbox.y >= img_h {
        return;
    }
    let w = bbox.w.min(img_w - bbox.x);
    let h = bbox.h.min(img_h - bbox.y);
    for inset in 0..thickness {
        let (Some(rw), Some(rh)) = (
            w.checked_sub(inset * 2).filter(|v| *v > 0),
            h.checked_sub(inset * 2).filter(|v| *v > 0),
        ) else {
            break;
        };
        let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32).of_size(rw, rh);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Draw `text` with a dark backdrop, clipped to the image.
pub(crate) fn draw_label(
    image: &mut RgbImage,
    x: u32,
    y: u32,
    text: &str,
    color: Rgb<u8>,
    height: f32,
) {
    let (img_w, img_h) = image.dimensions();
    if x >= img_w || y >= img_h || text.is_empty() {
        return;
    }
    let Some(font) = overlay_font() else {
        return;
    };

    let scale = PxScale::from(height);
    let (text_w, _) = text_size(scale, font, text);
    let backdrop_w = (text_w + 2 * LABEL_PADDING).min(img_w - x);
    let backdrop_h = (height.ceil() as u32 + 2 * LABEL_PADDING).min(img_h - y);
    if backdrop_w > 0 && backdrop_h > 0 {
        let rect = Rect::at(x as i32, y as i32).of_size(backdrop_w, backdrop_h);
        draw_filled_rect_mut(image, rect, BACKDROP_COLOR);
    }

    draw_text_mut(
        image,
        color,
        (x + LABEL_PADDING) as i32,
        (y + LABEL_PADDING) as i32,
        scale,
        font,
        text,
    );
}
