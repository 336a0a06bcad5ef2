//! Off-screen drawing surface.
//!
//! Stands in for the canvas a browser benchmark draws each frame into. The
//! per-frame draw is a nearest-neighbour scale of the delivered frame onto a
//! surface sized to the trial's resolution, so its cost grows with the
//! configured geometry the way a real composite does.

use crate::hardware::capabilities::{Frame, FrameEvent};
use crate::sampler::FrameProcessor;

/// 8-bit luma surface.
#[derive(Debug, Clone, Default)]
pub struct OffscreenSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    draws: u64,
}

impl OffscreenSurface {
    /// Surface of the given size, cleared to black.
    pub fn new(width: u32, height: u32) -> Self {
        let mut surface = Self::default();
        surface.resize(width, height);
        surface
    }

    /// Reallocate for a new geometry and clear.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width as usize * height as usize, 0);
        self.draws = 0;
    }

    /// Surface width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frames drawn since the last resize.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Pixel at (x, y), if inside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Scale `frame` onto the whole surface.
    pub fn draw(&mut self, frame: &Frame) {
        self.draws += 1;
        if frame.width == 0 || frame.height == 0 || self.pixels.is_empty() {
            return;
        }
        let (sw, sh) = (frame.width as usize, frame.height as usize);
        let (dw, dh) = (self.width as usize, self.height as usize);

        for (y, row) in self.pixels.chunks_exact_mut(dw).enumerate() {
            let src_row = (y * sh / dh) * sw;
            for (x, px) in row.iter_mut().enumerate() {
                if let Some(&value) = frame.pixels.get(src_row + x * sw / dw) {
                    *px = value;
                }
            }
        }
    }
}

impl FrameProcessor for OffscreenSurface {
    fn process(&mut self, event: &FrameEvent) {
        if let Some(frame) = &event.frame {
            self.draw(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_same_size_copies_pixels() {
        let frame = Frame::test_pattern(8, 4);
        let mut surface = OffscreenSurface::new(8, 4);
        surface.draw(&frame);
        assert_eq!(surface.pixel(3, 2), Some(5));
        assert_eq!(surface.pixel(7, 3), Some(10));
        assert_eq!(surface.draws(), 1);
    }

    #[test]
    fn test_draw_scales_to_surface() {
        let frame = Frame::new(2, 1, vec![10, 200]);
        let mut surface = OffscreenSurface::new(4, 2);
        surface.draw(&frame);
        assert_eq!(surface.pixel(0, 0), Some(10));
        assert_eq!(surface.pixel(1, 1), Some(10));
        assert_eq!(surface.pixel(2, 0), Some(200));
        assert_eq!(surface.pixel(3, 1), Some(200));
        assert_eq!(surface.pixel(4, 0), None);
    }

    #[test]
    fn test_resize_clears() {
        let mut surface = OffscreenSurface::new(2, 2);
        surface.draw(&Frame::new(1, 1, vec![99]));
        surface.resize(3, 3);
        assert_eq!(surface.pixel(2, 2), Some(0));
        assert_eq!(surface.draws(), 0);
    }

    #[test]
    fn test_process_skips_events_without_frame() {
        let mut surface = OffscreenSurface::new(2, 2);
        surface.process(&FrameEvent {
            timestamp_ms: 0.0,
            frame: None,
            metadata: None,
        });
        assert_eq!(surface.draws(), 0);
    }
}
