//! Lazy page rendering: each page is drawn at most once per scale.
//!
//! ## State machine
//!
//! ```text
//!            observe                 draw ok
//! Unseen ───────────▶ Observed ──▶ Rendering ──────────▶ Rendered
//!   ▲                    ▲             │
//!   │                    │  observe    │ draw err / panic
//!   │                    └──────── Failed ◀──┘
//!   └──── set_scale / reset (every page)
//! ```
//!
//! ## In-flight sharing
//!
//! Scroll events arrive in bursts, and a jump may land on a page whose
//! render already started. Every `observe` of a page that is `Rendering`
//! awaits the same [`Shared`] future instead of starting a second draw, so
//! the draw routine runs at most once per page at a time.
//!
//! ## Spawned draws
//!
//! A render is never aborted half-way. The draw runs on its own task, so a
//! caller that stops waiting (the page scrolled away) does not stop the
//! draw; the page simply ends up `Rendered` off-screen.
//!
//! ## Scale changes
//!
//! `set_scale` invalidates every page. Draws still running at the old scale
//! finish, but a generation counter makes their completion a no-op, so the
//! next observation redraws at the new scale. That redraw waits for the
//! invalidated draw of the same page first, so a page never has two draws
//! running and the newest scale is always painted last.
//!
//! ## Re-entrancy
//!
//! The page table lock is only held to decide and record state changes. The
//! canvas and the progress callback are always called without it, so both
//! may query the scheduler.

use super::{PageCanvas, Viewport};
use crate::config::ViewerConfig;
use crate::error::{PageError, ViewerError};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type RenderFuture = Shared<BoxFuture<'static, Result<(), PageError>>>;

/// Where a page is in its render lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenderStatus {
    Unseen,
    Observed,
    Rendering,
    Rendered,
    Failed,
}

/// Snapshot of one page's render state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRenderState {
    pub page_number: u32,
    pub scale: f32,
    pub status: RenderStatus,
    pub rendered: bool,
    pub in_flight: bool,
    /// Last draw failure, while the page is `Failed`.
    pub error: Option<PageError>,
}

struct PageEntry {
    status: RenderStatus,
    in_flight: Option<RenderFuture>,
    error: Option<PageError>,
}

impl PageEntry {
    fn unseen() -> Self {
        Self {
            status: RenderStatus::Unseen,
            in_flight: None,
            error: None,
        }
    }
}

struct PageTable {
    scale: f32,
    generation: u64,
    num_pages: u32,
    pages: HashMap<u32, PageEntry>,
    /// Draws invalidated while running, by page.
    stale: HashMap<u32, RenderFuture>,
}

impl PageTable {
    fn check_range(&self, page: u32) -> Result<(), ViewerError> {
        if page == 0 || page > self.num_pages {
            return Err(ViewerError::PageOutOfRange {
                page,
                total: self.num_pages,
            });
        }
        Ok(())
    }

    /// Start a new generation; running draws move to `stale`.
    fn invalidate(&mut self) {
        self.generation += 1;
        for (&page, entry) in self.pages.iter_mut() {
            if let Some(pending) = entry.in_flight.take() {
                self.stale.insert(page, pending);
            }
            *entry = PageEntry::unseen();
        }
        self.stale.retain(|_, pending| pending.peek().is_none());
    }
}

fn lock(table: &Mutex<PageTable>) -> MutexGuard<'_, PageTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns all render state of one open document.
///
/// One instance per document; nothing is shared across documents. Must be
/// used from within a tokio runtime, since draws run on spawned tasks.
pub struct PageRenderScheduler {
    canvas: Arc<dyn PageCanvas>,
    viewport: Arc<dyn Viewport>,
    config: ViewerConfig,
    progress: ProgressCallback,
    table: Arc<Mutex<PageTable>>,
}

impl PageRenderScheduler {
    pub fn new(
        canvas: Arc<dyn PageCanvas>,
        viewport: Arc<dyn Viewport>,
        num_pages: u32,
        config: ViewerConfig,
    ) -> Self {
        let scale = config.clamp_scale(config.initial_scale);
        Self {
            canvas,
            viewport,
            config,
            progress: Arc::new(NoopProgressCallback),
            table: Arc::new(Mutex::new(PageTable {
                scale,
                generation: 0,
                num_pages,
                pages: HashMap::new(),
                stale: HashMap::new(),
            })),
        }
    }

    /// Report render events to `progress`.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn num_pages(&self) -> u32 {
        lock(&self.table).num_pages
    }

    pub fn scale(&self) -> f32 {
        lock(&self.table).scale
    }

    /// Validate a 1-based page number against the document.
    pub fn check_page(&self, page: u32) -> Result<(), ViewerError> {
        lock(&self.table).check_range(page)
    }

    /// Make sure `page` is drawn at the current scale.
    ///
    /// Starts a draw for an `Unseen` or `Failed` page, joins the running draw
    /// of a `Rendering` page, and returns at once for a `Rendered` one.
    pub async fn observe(&self, page: u32) -> Result<(), ViewerError> {
        let pending = {
            let mut table = lock(&self.table);
            table.check_range(page)?;
            match self.begin(&mut table, page) {
                Some(pending) => pending,
                None => return Ok(()),
            }
        };
        pending.await.map_err(ViewerError::from)
    }

    /// Scroll `page` into view and guarantee it gets drawn.
    pub async fn jump_to_page(&self, page: u32) -> Result<(), ViewerError> {
        self.check_page(page)?;
        debug!("Jumping to page {}", page);
        self.viewport.scroll_to_page(page);
        self.observe(page).await
    }

    /// Change the zoom factor; every page becomes `Unseen`.
    ///
    /// Returns the applied (clamped) scale.
    pub fn set_scale(&self, scale: f32) -> f32 {
        let scale = self.config.clamp_scale(scale);
        let mut table = lock(&self.table);
        if (table.scale - scale).abs() <= f32::EPSILON {
            return table.scale;
        }
        table.scale = scale;
        table.invalidate();
        info!(
            "Scale set to {}; {} pages invalidated",
            scale,
            table.pages.len()
        );
        scale
    }

    /// Forget every page, e.g. when another document is loaded.
    pub fn reset(&self, num_pages: u32) {
        let mut table = lock(&self.table);
        table.invalidate();
        table.num_pages = num_pages;
        table.pages.clear();
        info!("Render state reset for a {}-page document", num_pages);
    }

    /// Snapshot of one page; `None` if it was never observed.
    pub fn state(&self, page: u32) -> Option<PageRenderState> {
        let table = lock(&self.table);
        table
            .pages
            .get(&page)
            .map(|entry| snapshot(page, table.scale, entry))
    }

    /// Status of a page, `Unseen` if it was never observed.
    pub fn status(&self, page: u32) -> RenderStatus {
        lock(&self.table)
            .pages
            .get(&page)
            .map_or(RenderStatus::Unseen, |e| e.status)
    }

    /// Snapshots of every observed page, by page number.
    pub fn states(&self) -> Vec<PageRenderState> {
        let table = lock(&self.table);
        let mut states: Vec<PageRenderState> = table
            .pages
            .iter()
            .map(|(&page, entry)| snapshot(page, table.scale, entry))
            .collect();
        states.sort_by_key(|s| s.page_number);
        states
    }

    /// Decide what `observe` has to wait for, starting a draw if needed.
    ///
    /// Runs with the table locked, so the spawned draw cannot record its
    /// completion before the entry is marked `Rendering`. Nothing outside
    /// the table is called here; the draw and its progress events happen on
    /// the spawned task.
    fn begin(&self, table: &mut PageTable, page: u32) -> Option<RenderFuture> {
        let scale = table.scale;
        let generation = table.generation;
        let PageTable { pages, stale, .. } = table;
        let entry = pages.entry(page).or_insert_with(PageEntry::unseen);

        match (entry.status, &entry.in_flight) {
            (RenderStatus::Rendered, _) => return None,
            (RenderStatus::Rendering, Some(pending)) => {
                debug!("Page {}: render already in flight", page);
                return Some(pending.clone());
            }
            _ => {}
        }

        entry.status = RenderStatus::Observed;
        debug!("Page {}: observed at scale {}", page, scale);

        let previous = stale
            .remove(&page)
            .filter(|pending| pending.peek().is_none());
        let canvas = Arc::clone(&self.canvas);
        let table_ref = Arc::clone(&self.table);
        let progress = Arc::clone(&self.progress);

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                debug!("Page {}: waiting for the invalidated draw to finish", page);
                let _ = previous.await;
            }
            progress.on_render_start(page, scale);
            let started = Instant::now();
            let draw = async move { canvas.draw_page(page, scale).await };
            let result = match AssertUnwindSafe(draw).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(detail)) => Err(PageError::DrawFailed { page, detail }),
                Err(_) => Err(PageError::DrawFailed {
                    page,
                    detail: "draw routine panicked".to_string(),
                }),
            };
            finish(
                &table_ref,
                &progress,
                page,
                scale,
                generation,
                &result,
                started.elapsed(),
            );
            result
        });

        let pending: RenderFuture = handle
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    Err(PageError::DrawFailed {
                        page,
                        detail: format!("render task failed: {e}"),
                    })
                })
            })
            .boxed()
            .shared();

        entry.status = RenderStatus::Rendering;
        entry.in_flight = Some(pending.clone());
        entry.error = None;
        Some(pending)
    }
}

/// Record a finished draw, unless the page was invalidated meanwhile.
fn finish(
    table: &Mutex<PageTable>,
    progress: &ProgressCallback,
    page: u32,
    scale: f32,
    generation: u64,
    result: &Result<(), PageError>,
    elapsed: Duration,
) {
    let recorded = {
        let mut table = lock(table);
        if table.generation != generation {
            false
        } else if let Some(entry) = table.pages.get_mut(&page) {
            entry.in_flight = None;
            match result {
                Ok(()) => {
                    entry.status = RenderStatus::Rendered;
                    entry.error = None;
                }
                Err(e) => {
                    entry.status = RenderStatus::Failed;
                    entry.error = Some(e.clone());
                }
            }
            true
        } else {
            false
        }
    };

    if !recorded {
        debug!("Page {}: draw at scale {} discarded (invalidated)", page, scale);
        progress.on_render_discarded(page, scale);
        return;
    }

    match result {
        Ok(()) => {
            let elapsed_ms = elapsed.as_millis() as u64;
            debug!("Page {}: rendered in {}ms", page, elapsed_ms);
            progress.on_render_complete(page, scale, elapsed_ms);
        }
        Err(e) => {
            warn!("{}", e);
            progress.on_render_error(page, &e.to_string());
        }
    }
}

fn snapshot(page: u32, scale: f32, entry: &PageEntry) -> PageRenderState {
    PageRenderState {
        page_number: page,
        scale,
        status: entry.status,
        rendered: entry.status == RenderStatus::Rendered,
        in_flight: entry.in_flight.is_some(),
        error: entry.error.clone(),
    }
}
