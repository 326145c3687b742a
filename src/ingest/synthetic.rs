use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

use crate::annotate::draw_label;
use crate::frame::{Frame, FrameOrigin};

const BACKGROUND: Rgb<u8> = Rgb([50, 50, 50]);
const MARKER_COLOR: Rgb<u8> = Rgb([255, 120, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MARKER_RADIUS: i32 = 15;
const EDGE_MARGIN: i32 = 20;
const VELOCITY: (i32, i32) = (5, 3);

/// Moving-marker test pattern.
///
/// The marker advances by a fixed velocity each frame and reflects off the
/// frame edges. Every frame carries a text label so synthetic video is never
/// mistaken for a live camera.
#[derive(Clone, Debug)]
pub struct SyntheticScene {
    width: u32,
    height: u32,
    position: (i32, i32),
    velocity: (i32, i32),
    label: String,
}

impl SyntheticScene {
    pub fn new(width: u32, height: u32, label: impl Into<String>) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            position: ((width / 2) as i32, (height / 2) as i32),
            velocity: VELOCITY,
            label: label.into(),
        }
    }

    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn step(&mut self) {
        let (w, h) = (self.width as i32, self.height as i32);
        self.position.0 += self.velocity.0;
        self.position.1 += self.velocity.1;
        if self.position.0 <= EDGE_MARGIN || self.position.0 >= w - EDGE_MARGIN {
            self.velocity.0 = -self.velocity.0;
        }
        if self.position.1 <= EDGE_MARGIN || self.position.1 >= h - EDGE_MARGIN {
            self.velocity.1 = -self.velocity.1;
        }
        self.position.0 = self.position.0.clamp(0, w.max(1) - 1);
        self.position.1 = self.position.1.clamp(0, h.max(1) - 1);
    }

    pub fn next_image(&mut self) -> RgbImage {
        self.step();
        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        draw_filled_circle_mut(&mut image, self.position, MARKER_RADIUS, MARKER_COLOR);
        let text_height = if self.width >= 480 { 28.0 } else { 16.0 };
        draw_label(&mut image, 10, 10, &self.label, LABEL_COLOR, text_height);
        image
    }

    pub fn next_frame(&mut self) -> Frame {
        Frame::from_image(self.next_image(), FrameOrigin::Synthetic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_moves_and_stays_inside() {
        let mut scene = SyntheticScene::new(80, 60, "MOCK CAMERA FEED");
        let start = scene.position();
        let frame = scene.next_frame();
        assert!(frame.is_synthetic());
        assert_eq!((frame.width, frame.height), (80, 60));
        assert_ne!(scene.position(), start);

        for _ in 0..500 {
            scene.next_frame();
            let (x, y) = scene.position();
            assert!((0..80).contains(&x));
            assert!((0..60).contains(&y));
        }
    }

    #[test]
    fn marker_reflects_at_edges() {
        let mut scene = SyntheticScene::new(100, 100, "");
        let mut xs = Vec::new();
        for _ in 0..40 {
            scene.next_image();
            xs.push(scene.position().0);
        }
        let max = *xs.iter().max().unwrap();
        assert!(max >= 100 - EDGE_MARGIN);
        assert!(xs.last().copied().unwrap() < max);
    }

    #[test]
    fn frames_are_labelled() {
        let mut scene = SyntheticScene::new(200, 100, "MOCK");
        let image = scene.next_image();
        // label backdrop is black
        assert_eq!(image.get_pixel(11, 11).0, [0, 0, 0]);
    }
}
