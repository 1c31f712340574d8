//! Software drawing surface
//!
//! [`Canvas`] is a fixed-size RGBA surface implementing the small subset of
//! 2D drawing the compositor needs: clearing, stretched image drawing,
//! circular clipping with a save/restore stack. It can also be captured as a
//! live video track that receives every composited frame.

use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capture::{MediaStream, MediaTrack, VideoTrackWriter};
use crate::types::Frame;

/// Rendering boundary used by the compositor
pub trait Surface2d {
    /// Width in pixels
    fn width(&self) -> u32;

    /// Height in pixels
    fn height(&self) -> u32;

    /// Make a rectangle fully transparent, honoring the current clip
    fn clear_rect(&mut self, x: f64, y: f64, w: f64, h: f64);

    /// Draw `image` scaled into the destination rectangle
    fn draw_image(&mut self, image: &Frame, dx: f64, dy: f64, dw: f64, dh: f64);

    /// Intersect the clip region with a circle
    fn clip_circle(&mut self, cx: f64, cy: f64, radius: f64);

    /// Push the drawing state (clip region)
    fn save(&mut self);

    /// Pop the drawing state pushed by the matching [`Surface2d::save`]
    fn restore(&mut self);
}

/// Circular clip region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub cx: f64,
    pub cy: f64,
    pub radius: f64,
}

impl Circle {
    /// Whether the center of pixel `(x, y)` lies inside the circle
    pub fn contains_pixel(&self, x: u32, y: u32) -> bool {
        let dx = x as f64 + 0.5 - self.cx;
        let dy = y as f64 + 0.5 - self.cy;
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

/// RGBA canvas
pub struct Canvas {
    frame: Frame,
    clips: Vec<Circle>,
    stack: Vec<Vec<Circle>>,
    captures: Vec<VideoTrackWriter>,
}

impl Canvas {
    /// Create a transparent canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: Frame::new(width, height),
            clips: Vec::new(),
            stack: Vec::new(),
            captures: Vec::new(),
        }
    }

    /// Change the pixel dimensions
    ///
    /// Like resizing an HTML canvas, this discards the content and resets
    /// the drawing state. Live captures keep running at the new size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.frame = Frame::new(width, height);
        self.clips.clear();
        self.stack.clear();
        debug!("Canvas resized to {}x{}", width, height);
    }

    /// Current pixels
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Read one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.frame.pixel(x, y)
    }

    /// Whether a clip region is in effect
    pub fn is_clipped(&self) -> bool {
        !self.clips.is_empty()
    }

    /// Capture the canvas as a live video stream
    ///
    /// Every frame published with [`Canvas::publish_capture`] is delivered to
    /// the returned track until it is stopped.
    pub fn capture_stream(&mut self) -> MediaStream {
        let (track, writer) =
            MediaTrack::video("Canvas Capture", self.frame.width, self.frame.height);
        self.captures.push(writer);
        MediaStream::from_tracks([track])
    }

    /// Number of live captures
    pub fn capture_count(&self) -> usize {
        self.captures.iter().filter(|w| !w.is_stopped()).count()
    }

    /// Push the current pixels to every live capture
    ///
    /// Stopped captures are dropped. Returns how many captures received the
    /// frame.
    pub fn publish_capture(&mut self, pts: u64) -> usize {
        self.captures.retain(|w| !w.is_stopped());
        if self.captures.is_empty() {
            return 0;
        }
        let frame = Arc::new(self.frame.clone().with_pts(pts));
        self.captures
            .iter()
            .filter(|w| w.publish(frame.clone()))
            .count()
    }

    fn visible(&self, x: u32, y: u32) -> bool {
        self.clips.iter().all(|c| c.contains_pixel(x, y))
    }
}

/// Pixels whose centers fall in `[start, start + len)`, clamped to `limit`
fn span(start: f64, len: f64, limit: u32) -> Range<u32> {
    if len.is_nan() || len <= 0.0 || !start.is_finite() {
        return 0..0;
    }
    let lo = (start - 0.5).ceil().max(0.0);
    let hi = (start + len - 0.5).ceil().min(limit as f64);
    if hi <= lo {
        return 0..0;
    }
    lo as u32..hi as u32
}

/// Source-over blend of one non-premultiplied RGBA pixel
fn blend(dst: &mut [u8], src: &[u8]) {
    let a = src[3] as u32;
    match a {
        255 => dst.copy_from_slice(src),
        0 => {}
        _ => {
            let inv = 255 - a;
            for i in 0..3 {
                dst[i] = ((src[i] as u32 * a + dst[i] as u32 * inv) / 255) as u8;
            }
            dst[3] = (a + dst[3] as u32 * inv / 255) as u8;
        }
    }
}

impl Surface2d for Canvas {
    fn width(&self) -> u32 {
        self.frame.width
    }

    fn height(&self) -> u32 {
        self.frame.height
    }

    fn clear_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let xs = span(x, w, self.frame.width);
        let ys = span(y, h, self.frame.height);
        let stride = self.frame.stride();

        if self.clips.is_empty() {
            for py in ys {
                let row = py as usize * stride;
                self.frame.data[row + xs.start as usize * 4..row + xs.end as usize * 4].fill(0);
            }
            return;
        }

        for py in ys {
            for px in xs.clone() {
                if self.visible(px, py) {
                    let idx = py as usize * stride + px as usize * 4;
                    self.frame.data[idx..idx + 4].fill(0);
                }
            }
        }
    }

    fn draw_image(&mut self, image: &Frame, dx: f64, dy: f64, dw: f64, dh: f64) {
        if image.is_empty() {
            return;
        }
        let needed = image.stride() * image.height as usize;
        if image.data.len() < needed {
            warn!(
                "Skipping {}x{} frame with {} bytes of pixel data, expected {}",
                image.width,
                image.height,
                image.data.len(),
                needed
            );
            return;
        }
        let xs = span(dx, dw, self.frame.width);
        let ys = span(dy, dh, self.frame.height);
        if xs.is_empty() || ys.is_empty() {
            return;
        }

        let sx_scale = image.width as f64 / dw;
        let sy_scale = image.height as f64 / dh;
        let max_sx = image.width as i64 - 1;
        let max_sy = image.height as i64 - 1;

        // Nearest-neighbour source column for every destination column
        let columns: Vec<usize> = xs
            .clone()
            .map(|px| (((px as f64 + 0.5 - dx) * sx_scale).floor() as i64).clamp(0, max_sx) as usize)
            .collect();

        let stride = self.frame.stride();
        let src_stride = image.stride();
        let clipped = !self.clips.is_empty();

        for py in ys {
            let sy = (((py as f64 + 0.5 - dy) * sy_scale).floor() as i64).clamp(0, max_sy) as usize;
            let src_row = sy * src_stride;
            for (px, sx) in xs.clone().zip(columns.iter()) {
                if clipped && !self.visible(px, py) {
                    continue;
                }
                let dst = py as usize * stride + px as usize * 4;
                let src = src_row + sx * 4;
                blend(
                    &mut self.frame.data[dst..dst + 4],
                    &image.data[src..src + 4],
                );
            }
        }
    }

    fn clip_circle(&mut self, cx: f64, cy: f64, radius: f64) {
        self.clips.push(Circle { cx, cy, radius });
    }

    fn save(&mut self) {
        self.stack.push(self.clips.clone());
    }

    fn restore(&mut self) {
        // Unbalanced restore is ignored, as on an HTML canvas
        if let Some(clips) = self.stack.pop() {
            self.clips = clips;
        }
    }
}
