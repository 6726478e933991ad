//! Progress-callback trait for per-page render events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] into
//! [`crate::viewer::PageRenderScheduler::with_progress`] to observe the
//! scheduler's state machine from the outside: a terminal progress bar, a
//! metrics sink, or a test double.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfchat::RenderProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl RenderProgressCallback for CountingCallback {
//!     fn on_render_complete(&self, page: u32, _scale: f32, elapsed_ms: u64) {
//!         let done = self.rendered.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("page {page} drawn in {elapsed_ms}ms ({done} total)");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the render scheduler as pages move through their states.
///
/// Renders run on spawned tasks, so methods may be called from any worker
/// thread. All methods default to no-ops.
pub trait RenderProgressCallback: Send + Sync {
    /// A draw was started for `page` at `scale`.
    fn on_render_start(&self, page: u32, scale: f32) {
        let _ = (page, scale);
    }

    /// The draw finished and the page is `Rendered`.
    fn on_render_complete(&self, page: u32, scale: f32, elapsed_ms: u64) {
        let _ = (page, scale, elapsed_ms);
    }

    /// The draw failed and the page is `Failed`.
    fn on_render_error(&self, page: u32, error: &str) {
        let _ = (page, error);
    }

    /// A finished draw was thrown away because the scale changed meanwhile.
    fn on_render_discarded(&self, page: u32, scale: f32) {
        let _ = (page, scale);
    }
}

/// A no-op implementation, the scheduler's default.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type the scheduler stores.
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl RenderProgressCallback for TrackingCallback {
        fn on_render_start(&self, _page: u32, _scale: f32) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_render_complete(&self, _page: u32, _scale: f32, _elapsed_ms: u64) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_render_error(&self, _page: u32, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_render_start(1, 1.0);
        cb.on_render_complete(1, 1.0, 12);
        cb.on_render_error(2, "surface lost");
        cb.on_render_discarded(3, 2.0);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_render_start(1, 1.0);
        tracker.on_render_complete(1, 1.0, 40);
        tracker.on_render_start(2, 1.0);
        tracker.on_render_error(2, "decode error");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_render_start(10, 1.5);
    }
}
