//! Per-tick compositing
//!
//! Draws the screen share as background and the camera as a circular
//! picture-in-picture in the bottom-right corner, then publishes the result
//! to any canvas captures.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::capture::source::{snapshot, SourceSnapshot, SourceTable};
use crate::compose::{Canvas, Surface2d};

/// Canvas shared between the studio and the compositor loop
///
/// `None` until the canvas is mounted.
pub type SharedCanvas = Arc<Mutex<Option<Canvas>>>;

/// Offset of the camera overlay from the bottom-right corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayMargin {
    /// Pushed right by this many pixels
    pub x: f64,
    /// Pushed up by this many pixels
    pub y: f64,
}

impl Default for OverlayMargin {
    fn default() -> Self {
        Self { x: 20.0, y: 15.0 }
    }
}

/// Rectangle in canvas coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Placement of the circular camera overlay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayGeometry {
    /// Clip circle center
    pub center: (f64, f64),
    /// Clip circle radius
    pub radius: f64,
    /// Where the half-size camera frame is drawn
    pub dest: Rect,
}

/// Compute the camera overlay for a canvas and a camera of native size
/// `video_width x video_height`
///
/// The overlay is sized from the camera, not the canvas, so a large camera
/// can overflow the canvas edge.
pub fn camera_overlay(
    canvas_width: u32,
    canvas_height: u32,
    video_width: u32,
    video_height: u32,
    margin: OverlayMargin,
) -> OverlayGeometry {
    let (cw, ch) = (canvas_width as f64, canvas_height as f64);
    let (vw, vh) = (video_width as f64, video_height as f64);
    OverlayGeometry {
        center: (cw - vw / 4.0 + margin.x, ch - vh / 4.0 - margin.y),
        radius: vh / 4.0,
        dest: Rect {
            x: cw - vw / 2.0 + margin.x,
            y: ch - vh / 2.0 - margin.y,
            width: vw / 2.0,
            height: vh / 2.0,
        },
    }
}

/// Counters for the compositor loop
#[derive(Debug, Default)]
pub struct CompositorStats {
    ticks: AtomicU64,
    frames_rendered: AtomicU64,
    frames_captured: AtomicU64,
}

impl CompositorStats {
    /// Ticks run, including ticks with no canvas mounted
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks that drew into a mounted canvas
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Frames delivered to canvas captures
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }
}

/// Draws one composite frame per tick
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    margin: OverlayMargin,
}

impl Compositor {
    /// Create a compositor with the given camera margin
    pub fn new(margin: OverlayMargin) -> Self {
        Self { margin }
    }

    /// Camera overlay margin
    pub fn margin(&self) -> OverlayMargin {
        self.margin
    }

    /// Draw the sources onto `surface`
    ///
    /// Layer order is fixed: screen first, stretched over the whole surface,
    /// then the camera clipped to a circle.
    pub fn render<S: Surface2d>(&self, surface: &mut S, sources: &SourceSnapshot) {
        let (width, height) = (surface.width(), surface.height());
        surface.clear_rect(0.0, 0.0, width as f64, height as f64);

        if let Some(screen) = &sources.screen {
            // Aspect ratio is not preserved
            surface.draw_image(screen, 0.0, 0.0, width as f64, height as f64);
        }

        if let Some(camera) = &sources.camera {
            let overlay = camera_overlay(width, height, camera.width, camera.height, self.margin);
            surface.save();
            surface.clip_circle(overlay.center.0, overlay.center.1, overlay.radius);
            surface.draw_image(
                camera,
                overlay.dest.x,
                overlay.dest.y,
                overlay.dest.width,
                overlay.dest.height,
            );
            surface.restore();
        }

        // Audio metering is not drawn
    }

    /// Run one tick against the shared canvas
    ///
    /// Returns `false` without drawing when no canvas is mounted.
    pub fn tick(&self, canvas: &Mutex<Option<Canvas>>, sources: &RwLock<SourceTable>, pts: u64) -> bool {
        let frame_sources = snapshot(sources);
        let mut guard = canvas.lock();
        let Some(canvas) = guard.as_mut() else {
            trace!("Canvas not mounted, skipping tick");
            return false;
        };
        self.render(canvas, &frame_sources);
        canvas.publish_capture(pts);
        true
    }
}

/// Owner of the running compositor loop
///
/// Dropping the handle signals the loop to stop; [`CompositorHandle::stop`]
/// additionally waits for it to finish.
pub struct CompositorHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    stats: Arc<CompositorStats>,
}

impl CompositorHandle {
    /// Start the loop at `refresh_rate` ticks per second
    pub fn spawn(
        compositor: Compositor,
        canvas: SharedCanvas,
        sources: Arc<RwLock<SourceTable>>,
        refresh_rate: u32,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(CompositorStats::default());
        let task_stats = stats.clone();
        let period = Duration::from_secs_f64(1.0 / refresh_rate.max(1) as f64);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let started = Instant::now();
            info!("Compositor loop started at {} Hz", refresh_rate);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.wait_for(|stop| *stop) => break,
                    _ = ticker.tick() => {
                        task_stats.ticks.fetch_add(1, Ordering::Relaxed);
                        let pts = started.elapsed().as_nanos() as u64;
                        if compositor.tick(&canvas, &sources, pts) {
                            task_stats.frames_rendered.fetch_add(1, Ordering::Relaxed);
                            let captures = canvas.lock().as_ref().map_or(0, |c| c.capture_count());
                            task_stats.frames_captured.fetch_add(captures as u64, Ordering::Relaxed);
                        }
                    }
                }
            }

            debug!(
                "Compositor loop stopped after {} ticks",
                task_stats.ticks.load(Ordering::Relaxed)
            );
        });

        Self {
            shutdown,
            task: Some(task),
            stats,
        }
    }

    /// Loop counters
    pub fn stats(&self) -> Arc<CompositorStats> {
        self.stats.clone()
    }

    /// Whether the loop task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CompositorHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Frame;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const CLEAR: [u8; 4] = [0, 0, 0, 0];

    #[test]
    fn test_overlay_geometry_720p_vga_camera() {
        let g = camera_overlay(1280, 720, 640, 480, OverlayMargin::default());
        assert_eq!(g.center, (1140.0, 585.0));
        assert_eq!(g.radius, 120.0);
        assert_eq!(
            g.dest,
            Rect {
                x: 980.0,
                y: 465.0,
                width: 320.0,
                height: 240.0
            }
        );
    }

    #[test]
    fn test_overlay_can_overflow_canvas() {
        let g = camera_overlay(1280, 720, 1920, 1080, OverlayMargin::default());
        assert!(g.dest.x + g.dest.width > 1280.0);
    }

    #[test]
    fn test_render_screen_fills_canvas() {
        let mut canvas = Canvas::new(64, 36);
        let sources = SourceSnapshot {
            screen: Some(Arc::new(Frame::solid(16, 16, RED))),
            ..Default::default()
        };
        Compositor::default().render(&mut canvas, &sources);
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(63, 35), Some(RED));
    }

    #[test]
    fn test_render_camera_is_circular_overlay() {
        let mut canvas = Canvas::new(128, 72);
        let sources = SourceSnapshot {
            screen: Some(Arc::new(Frame::solid(4, 4, RED))),
            camera: Some(Arc::new(Frame::solid(64, 48, GREEN))),
            audio: false,
        };
        let compositor = Compositor::new(OverlayMargin { x: 0.0, y: 0.0 });
        compositor.render(&mut canvas, &sources);

        // center (112, 60), radius 12
        assert_eq!(canvas.pixel(112, 60), Some(GREEN));
        // inside the camera rectangle but outside the circle
        assert_eq!(canvas.pixel(97, 49), Some(RED));
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert!(!canvas.is_clipped());
    }

    #[test]
    fn test_render_clears_previous_frame() {
        let mut canvas = Canvas::new(8, 8);
        let compositor = Compositor::default();
        compositor.render(
            &mut canvas,
            &SourceSnapshot {
                screen: Some(Arc::new(Frame::solid(1, 1, RED))),
                ..Default::default()
            },
        );
        compositor.render(&mut canvas, &SourceSnapshot::default());
        assert_eq!(canvas.pixel(4, 4), Some(CLEAR));
    }

    #[test]
    fn test_tick_without_canvas_is_noop() {
        let canvas = Mutex::new(None);
        let sources = RwLock::new(SourceTable::default());
        assert!(!Compositor::default().tick(&canvas, &sources, 0));

        let canvas = Mutex::new(Some(Canvas::new(4, 4)));
        assert!(Compositor::default().tick(&canvas, &sources, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_until_stopped() {
        let canvas: SharedCanvas = Arc::new(Mutex::new(Some(Canvas::new(8, 8))));
        let sources = Arc::new(RwLock::new(SourceTable::default()));
        let handle = CompositorHandle::spawn(Compositor::default(), canvas, sources, 10);
        let stats = handle.stats();

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(handle.is_running());
        handle.stop().await;

        let ticks = stats.ticks();
        assert!(ticks >= 5, "expected at least 5 ticks, got {}", ticks);
        assert_eq!(stats.frames_rendered(), ticks);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(stats.ticks(), ticks);
    }
}
