//! Routes citation clicks, outline clicks, page input and visibility
//! signals into one scroll-and-render path, and keeps the viewer cursor and
//! outline highlight in sync with what is on screen.
//!
//! The current page is published on a [`tokio::sync::watch`] channel: late
//! subscribers see the latest value at once, and a burst of visibility
//! updates collapses into whatever value the reader picks up next.

use super::scheduler::PageRenderScheduler;
use crate::citation::CitationToken;
use crate::error::ViewerError;
use crate::outline::{find_shallowest, OutlineNode, OutlinePath};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// What the page indicator shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewerCursor {
    /// 1-based; 0 only while no document is loaded.
    pub current_page: u32,
    pub num_pages: u32,
}

impl ViewerCursor {
    fn first_page(num_pages: u32) -> Self {
        Self {
            current_page: u32::from(num_pages > 0),
            num_pages,
        }
    }
}

/// How much of a page's container is on screen, in any consistent unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageVisibility {
    pub page: u32,
    pub visible_area: f32,
}

impl PageVisibility {
    pub fn new(page: u32, visible_area: f32) -> Self {
        Self { page, visible_area }
    }
}

#[derive(Default)]
struct OutlineState {
    expanded: BTreeSet<OutlinePath>,
    active: Option<OutlinePath>,
}

impl OutlineState {
    fn starting_at<D>(outline: &[OutlineNode<D>], page: u32) -> Self {
        let mut state = Self::default();
        state.focus(outline, page);
        state
    }

    /// Highlight and expand the shallowest entry for `page`. Never collapses.
    fn focus<D>(&mut self, outline: &[OutlineNode<D>], page: u32) {
        let target = find_shallowest(outline, page);
        if let Some(path) = &target {
            self.expanded.insert(path.clone());
        }
        self.active = target;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Navigation state of one open document.
pub struct NavigationCoordinator<D> {
    scheduler: Arc<PageRenderScheduler>,
    outline: Vec<OutlineNode<D>>,
    outline_state: Mutex<OutlineState>,
    cursor: watch::Sender<ViewerCursor>,
}

impl<D> NavigationCoordinator<D> {
    pub fn new(scheduler: Arc<PageRenderScheduler>, outline: Vec<OutlineNode<D>>) -> Self {
        let first = ViewerCursor::first_page(scheduler.num_pages());
        let (cursor, _) = watch::channel(first);
        let outline_state = OutlineState::starting_at(&outline, first.current_page);
        Self {
            scheduler,
            outline,
            outline_state: Mutex::new(outline_state),
            cursor,
        }
    }

    pub fn scheduler(&self) -> &Arc<PageRenderScheduler> {
        &self.scheduler
    }

    pub fn outline(&self) -> &[OutlineNode<D>] {
        &self.outline
    }

    /// Swap in another document: render state, outline and cursor start over.
    pub fn load_document(&mut self, num_pages: u32, outline: Vec<OutlineNode<D>>) {
        self.scheduler.reset(num_pages);
        let first = ViewerCursor::first_page(num_pages);
        *lock(&self.outline_state) = OutlineState::starting_at(&outline, first.current_page);
        self.outline = outline;
        self.cursor.send_replace(first);
        debug!("Navigation reset for a {}-page document", num_pages);
    }

    // ── Cursor ──────────────────────────────────────────────────────────

    pub fn cursor(&self) -> ViewerCursor {
        *self.cursor.borrow()
    }

    pub fn current_page(&self) -> u32 {
        self.cursor.borrow().current_page
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerCursor> {
        self.cursor.subscribe()
    }

    /// Cursor updates as a stream, starting with the current value.
    pub fn cursor_stream(&self) -> WatchStream<ViewerCursor> {
        WatchStream::new(self.cursor.subscribe())
    }

    /// Whether a citation points at the page now on screen.
    pub fn is_active_citation(&self, token: &CitationToken) -> bool {
        token.page_number == self.current_page()
    }

    // ── Navigation entry points ─────────────────────────────────────────

    /// Scroll to `page`, make it current and get it drawn.
    pub async fn jump_to_page(&self, page: u32) -> Result<(), ViewerError> {
        self.scheduler.check_page(page)?;
        self.set_current_page(page);
        self.scheduler.jump_to_page(page).await
    }

    pub async fn on_citation_click(&self, token: &CitationToken) -> Result<(), ViewerError> {
        debug!("Citation {:?} clicked", token.raw_text);
        self.jump_to_page(token.page_number).await
    }

    /// Follow an outline entry; inert entries do nothing and return `None`.
    pub async fn on_outline_click(&self, node: &OutlineNode<D>) -> Result<Option<u32>, ViewerError> {
        let Some(page) = node.resolved_page else {
            debug!("Outline entry {:?} is inert", node.title);
            return Ok(None);
        };
        self.jump_to_page(page).await?;
        Ok(Some(page))
    }

    /// React to a new set of visible pages.
    ///
    /// The page with the largest visible area becomes current (lower page on
    /// ties) and every visible page is observed. Returns the outcome of each
    /// observation; one page failing does not affect the others.
    pub async fn on_visibility_change(
        &self,
        visible: &[PageVisibility],
    ) -> Vec<(u32, Result<(), ViewerError>)> {
        let num_pages = self.scheduler.num_pages();
        let on_screen: Vec<PageVisibility> = visible
            .iter()
            .copied()
            .filter(|v| v.visible_area > 0.0 && v.page >= 1 && v.page <= num_pages)
            .collect();

        let dominant = on_screen.iter().max_by(|a, b| {
            a.visible_area
                .total_cmp(&b.visible_area)
                .then(b.page.cmp(&a.page))
        });
        if let Some(v) = dominant {
            self.set_current_page(v.page);
        }

        let observations = on_screen.iter().map(|v| async move {
            (v.page, self.scheduler.observe(v.page).await)
        });
        join_all(observations).await
    }

    // ── Outline state ───────────────────────────────────────────────────

    pub fn is_expanded(&self, path: &[usize]) -> bool {
        lock(&self.outline_state).expanded.contains(path)
    }

    /// Flip an entry's expansion; returns the new state.
    pub fn toggle_expanded(&self, path: &[usize]) -> bool {
        let mut state = lock(&self.outline_state);
        if state.expanded.remove(path) {
            false
        } else {
            state.expanded.insert(path.to_vec());
            true
        }
    }

    pub fn expanded_paths(&self) -> Vec<OutlinePath> {
        lock(&self.outline_state).expanded.iter().cloned().collect()
    }

    /// The highlighted outline entry: the shallowest one for the current page.
    pub fn active_outline_path(&self) -> Option<OutlinePath> {
        lock(&self.outline_state).active.clone()
    }

    /// Moves the cursor and the outline highlight together, under the
    /// outline lock, so concurrent navigations cannot leave them disagreeing.
    fn set_current_page(&self, page: u32) {
        let mut state = lock(&self.outline_state);
        let changed = self.cursor.send_if_modified(|c| {
            if c.current_page == page {
                false
            } else {
                c.current_page = page;
                true
            }
        });
        if !changed {
            return;
        }
        debug!("Current page is now {}", page);
        state.focus(&self.outline, page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::CitationTokenizer;
    use crate::config::ViewerConfig;
    use crate::outline::{OutlineResolver, RawOutlineNode};
    use crate::viewer::{PageCanvas, RenderStatus, Viewport};
    use futures::future::BoxFuture;
    use tokio_stream::StreamExt;

    #[derive(Default)]
    struct CountingCanvas {
        draws: Mutex<Vec<u32>>,
    }

    impl PageCanvas for CountingCanvas {
        fn draw_page(&self, page: u32, _scale: f32) -> BoxFuture<'static, Result<(), String>> {
            lock(&self.draws).push(page);
            Box::pin(async move {
                if page == 13 {
                    Err("bad page".to_string())
                } else {
                    Ok(())
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingViewport {
        scrolls: Mutex<Vec<u32>>,
    }

    impl Viewport for RecordingViewport {
        fn scroll_to_page(&self, page: u32) {
            lock(&self.scrolls).push(page);
        }
    }

    struct Fixture {
        nav: NavigationCoordinator<&'static str>,
        canvas: Arc<CountingCanvas>,
        viewport: Arc<RecordingViewport>,
    }

    fn fixture(num_pages: u32) -> Fixture {
        let canvas = Arc::new(CountingCanvas::default());
        let viewport = Arc::new(RecordingViewport::default());
        let scheduler = Arc::new(PageRenderScheduler::new(
            Arc::clone(&canvas) as Arc<dyn PageCanvas>,
            Arc::clone(&viewport) as Arc<dyn Viewport>,
            num_pages,
            ViewerConfig::default(),
        ));
        let raw = vec![
            RawOutlineNode::new("Intro", "intro"),
            RawOutlineNode::new("Methods", "methods").with_children(vec![
                RawOutlineNode::new("Setup", "setup"),
                RawOutlineNode::new("Broken", "missing"),
            ]),
        ];
        let outline = OutlineResolver::resolve(raw, |d: &&str| match *d {
            "intro" => Some(1),
            "methods" => Some(4),
            "setup" => Some(6),
            _ => None,
        });
        Fixture {
            nav: NavigationCoordinator::new(scheduler, outline),
            canvas,
            viewport,
        }
    }

    #[tokio::test]
    async fn citation_click_scrolls_and_renders() {
        let f = fixture(20);
        let toks = CitationTokenizer::default().citations("see (page 6)");

        f.nav.on_citation_click(&toks[0]).await.unwrap();

        assert_eq!(*lock(&f.viewport.scrolls), vec![6]);
        assert_eq!(*lock(&f.canvas.draws), vec![6]);
        assert_eq!(f.nav.current_page(), 6);
        assert!(f.nav.is_active_citation(&toks[0]));
    }

    #[tokio::test]
    async fn citation_past_the_end_is_rejected() {
        let f = fixture(5);
        let toks = CitationTokenizer::default().citations("【9】");
        let err = f.nav.on_citation_click(&toks[0]).await.unwrap_err();
        assert_eq!(err, ViewerError::PageOutOfRange { page: 9, total: 5 });
        assert_eq!(f.nav.current_page(), 1);
        assert!(lock(&f.viewport.scrolls).is_empty());
    }

    #[tokio::test]
    async fn inert_outline_click_does_nothing() {
        let f = fixture(20);
        let broken = f.nav.outline()[1].children[1].clone();
        assert_eq!(f.nav.on_outline_click(&broken).await, Ok(None));
        assert!(lock(&f.viewport.scrolls).is_empty());
        assert!(lock(&f.canvas.draws).is_empty());
    }

    #[tokio::test]
    async fn outline_click_navigates() {
        let f = fixture(20);
        let setup = f.nav.outline()[1].children[0].clone();
        assert_eq!(f.nav.on_outline_click(&setup).await, Ok(Some(6)));
        assert_eq!(f.nav.current_page(), 6);
        assert_eq!(f.nav.active_outline_path(), Some(vec![1, 0]));
    }

    #[tokio::test]
    async fn dominant_visible_page_becomes_current() {
        let f = fixture(20);
        let results = f
            .nav
            .on_visibility_change(&[
                PageVisibility::new(3, 120.0),
                PageVisibility::new(4, 480.0),
                PageVisibility::new(5, 0.0),
            ])
            .await;

        assert_eq!(f.nav.current_page(), 4);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(f.nav.scheduler().status(3), RenderStatus::Rendered);
        assert_eq!(f.nav.scheduler().status(5), RenderStatus::Unseen);
        // Visibility never scrolls.
        assert!(lock(&f.viewport.scrolls).is_empty());
    }

    #[tokio::test]
    async fn visibility_tie_prefers_lower_page() {
        let f = fixture(20);
        f.nav
            .on_visibility_change(&[PageVisibility::new(8, 50.0), PageVisibility::new(7, 50.0)])
            .await;
        assert_eq!(f.nav.current_page(), 7);
    }

    #[tokio::test]
    async fn one_failed_page_does_not_block_others() {
        let f = fixture(20);
        let results = f
            .nav
            .on_visibility_change(&[PageVisibility::new(12, 10.0), PageVisibility::new(13, 90.0)])
            .await;
        let failed: Vec<u32> = results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(p, _)| *p)
            .collect();
        assert_eq!(failed, vec![13]);
        assert_eq!(f.nav.scheduler().status(12), RenderStatus::Rendered);
        assert_eq!(f.nav.scheduler().status(13), RenderStatus::Failed);
    }

    #[tokio::test]
    async fn current_page_expands_outline_without_collapsing() {
        let f = fixture(20);
        assert!(f.nav.toggle_expanded(&[1, 1]));

        f.nav.jump_to_page(4).await.unwrap();
        assert!(f.nav.is_expanded(&[1]));
        assert!(f.nav.is_expanded(&[1, 1]));
        assert!(f.nav.is_expanded(&[0]));
        assert_eq!(f.nav.active_outline_path(), Some(vec![1]));

        f.nav.jump_to_page(10).await.unwrap();
        assert_eq!(f.nav.active_outline_path(), None);
        assert!(f.nav.is_expanded(&[1]));

        assert!(!f.nav.toggle_expanded(&[1]));
        assert_eq!(f.nav.expanded_paths(), vec![vec![0], vec![1, 1]]);
    }

    #[tokio::test]
    async fn first_page_entry_is_highlighted_on_open() {
        let mut f = fixture(20);
        assert_eq!(f.nav.active_outline_path(), Some(vec![0]));
        assert!(f.nav.is_expanded(&[0]));

        f.nav.on_visibility_change(&[PageVisibility::new(1, 100.0)]).await;
        assert_eq!(f.nav.active_outline_path(), Some(vec![0]));

        let outline = OutlineResolver::resolve(
            vec![
                RawOutlineNode::new("Preface", "preface"),
                RawOutlineNode::new("Cover", "cover"),
            ],
            |d: &&str| (*d == "cover").then_some(1),
        );
        f.nav.load_document(3, outline);
        assert_eq!(f.nav.active_outline_path(), Some(vec![1]));
        assert_eq!(f.nav.expanded_paths(), vec![vec![1]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_navigation_keeps_highlight_on_current_page() {
        let f = fixture(20);
        let nav = Arc::new(f.nav);

        for round in 0..20u32 {
            let jumps: Vec<_> = [1u32, 4, 6, 9]
                .into_iter()
                .map(|page| {
                    let nav = Arc::clone(&nav);
                    tokio::spawn(async move {
                        if (page + round) % 2 == 0 {
                            nav.jump_to_page(page).await
                        } else {
                            nav.on_visibility_change(&[PageVisibility::new(page, 1.0)])
                                .await;
                            Ok(())
                        }
                    })
                })
                .collect();
            for jump in join_all(jumps).await {
                jump.unwrap().unwrap();
            }

            let current = nav.current_page();
            assert_eq!(
                nav.active_outline_path(),
                find_shallowest(nav.outline(), current),
                "round {round}: page {current}"
            );
        }
    }

    #[tokio::test]
    async fn cursor_stream_sees_latest_page() {
        let f = fixture(20);
        let mut stream = f.nav.cursor_stream();
        assert_eq!(
            stream.next().await,
            Some(ViewerCursor {
                current_page: 1,
                num_pages: 20
            })
        );

        f.nav.jump_to_page(2).await.unwrap();
        f.nav.jump_to_page(3).await.unwrap();
        assert_eq!(stream.next().await.map(|c| c.current_page), Some(3));
    }

    #[tokio::test]
    async fn load_document_starts_over() {
        let mut f = fixture(20);
        f.nav.jump_to_page(4).await.unwrap();
        f.nav.load_document(3, Vec::new());

        assert_eq!(
            f.nav.cursor(),
            ViewerCursor {
                current_page: 1,
                num_pages: 3
            }
        );
        assert!(f.nav.expanded_paths().is_empty());
        assert!(f.nav.scheduler().states().is_empty());
        assert!(f.nav.jump_to_page(4).await.is_err());
    }
}
