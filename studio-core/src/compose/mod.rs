//! Canvas compositing
//!
//! The compositor redraws a fixed-resolution canvas every display refresh:
//! the screen share stretched as background, the camera as a circular
//! overlay in the bottom-right corner.

pub mod canvas;
pub mod compositor;

pub use canvas::{Canvas, Circle, Surface2d};
pub use compositor::{
    camera_overlay, Compositor, CompositorHandle, CompositorStats, OverlayGeometry, OverlayMargin,
    Rect, SharedCanvas,
};
