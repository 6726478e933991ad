//! Paginated viewer plumbing: lazy, render-once page drawing and navigation.
//!
//! ```text
//! citation click ─┐
//! outline click  ─┼─▶ NavigationCoordinator ──▶ PageRenderScheduler ──▶ PageCanvas::draw_page
//! page input     ─┘        ▲      │                    │
//!                          │      └─ ViewerCursor      └─▶ Viewport::scroll_to_page
//! visibility signal ───────┘         (watch channel)
//! ```
//!
//! The two traits below are the seams to the host UI. The crate never draws
//! or scrolls anything itself; [`crate::pdf::PdfiumCanvas`] is the one
//! drawing backend shipped with it.

pub mod navigation;
pub mod scheduler;

use futures::future::BoxFuture;

pub use navigation::{NavigationCoordinator, PageVisibility, ViewerCursor};
pub use scheduler::{PageRenderScheduler, PageRenderState, RenderStatus};

/// Paints one page into a visual surface.
///
/// The returned future is driven on a spawned task and is never cancelled,
/// so implementations clone whatever handles they need into it. A rejected
/// draw (`Err`) parks the page in `Failed` until it is observed again.
pub trait PageCanvas: Send + Sync {
    fn draw_page(&self, page: u32, scale: f32) -> BoxFuture<'static, Result<(), String>>;
}

/// Brings a page's container into view.
pub trait Viewport: Send + Sync {
    fn scroll_to_page(&self, page: u32);
}
