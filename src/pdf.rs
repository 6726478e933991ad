//! pdfium-backed collaborators: outline source, destination lookup and a
//! page rasteriser implementing [`PageCanvas`].
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! Every call runs inside `tokio::task::spawn_blocking` and opens its own
//! `Pdfium` binding, so nothing pdfium-owned ever crosses a thread or an
//! `.await`.
//!
//! ## Binding
//!
//! `PDFIUM_LIB_PATH` names a library explicitly; otherwise a library next to
//! the working directory is tried, then the system one.

use crate::error::ChatError;
use crate::outline::{DestinationLookup, OutlineNode, OutlineResolver, RawOutlineNode};
use crate::viewer::PageCanvas;
use futures::future::BoxFuture;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Raw bookmark destination: the 0-based page index pdfium reported, if any.
pub type PdfDestinationIndex = Option<u16>;

/// Nesting deeper than this is not read (malformed outlines can cycle).
const MAX_OUTLINE_DEPTH: usize = 64;
/// Upper bound on bookmarks read from one document.
const MAX_OUTLINE_NODES: usize = 10_000;

/// Bind to a pdfium library.
pub fn bind_pdfium() -> Result<Pdfium, ChatError> {
    if let Ok(lib) = std::env::var("PDFIUM_LIB_PATH") {
        if !lib.is_empty() {
            return Pdfium::bind_to_library(&lib)
                .map(Pdfium::new)
                .map_err(|e| ChatError::PdfiumUnavailable {
                    detail: format!("{lib}: {e}"),
                });
        }
    }
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| ChatError::PdfiumUnavailable {
            detail: e.to_string(),
        })
}

fn open_error(path: &Path, password: Option<&str>, e: PdfiumError) -> ChatError {
    let detail = format!("{:?}", e);
    let detail = if detail.to_lowercase().contains("password") && password.is_none() {
        format!("{detail} (the document is encrypted; pass a password)")
    } else {
        detail
    };
    ChatError::CorruptPdf {
        path: path.to_path_buf(),
        detail,
    }
}

async fn blocking<T, F>(what: &str, f: F) -> Result<T, ChatError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::Internal(format!("{what} task panicked: {e}")))?
}

// ── Document facts ──────────────────────────────────────────────────────

/// Number of pages in the document.
pub async fn page_count(path: impl AsRef<Path>, password: Option<&str>) -> Result<u32, ChatError> {
    let path = path.as_ref().to_path_buf();
    let password = password.map(str::to_string);
    blocking("Page count", move || {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(&path, password.as_deref())
            .map_err(|e| open_error(&path, password.as_deref(), e))?;
        Ok(document.pages().len() as u32)
    })
    .await
}

/// A document's bookmarks, read but not yet resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOutline {
    pub page_count: u32,
    pub bookmarks: Vec<RawOutlineNode<PdfDestinationIndex>>,
}

impl PdfOutline {
    /// Resolve against the document's own page count.
    pub async fn resolve(self) -> Vec<OutlineNode<PdfDestinationIndex>> {
        let lookup = PdfPageLookup::new(self.page_count);
        OutlineResolver::resolve_async(self.bookmarks, &lookup).await
    }
}

/// Read the bookmark tree of a PDF.
///
/// Bookmarks without a usable destination are kept with `None`.
pub async fn load_outline(path: impl AsRef<Path>, password: Option<&str>) -> Result<PdfOutline, ChatError> {
    let path = path.as_ref().to_path_buf();
    let password = password.map(str::to_string);
    blocking("Outline", move || {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(&path, password.as_deref())
            .map_err(|e| open_error(&path, password.as_deref(), e))?;
        let page_count = document.pages().len() as u32;

        let mut budget = MAX_OUTLINE_NODES;
        let bookmarks = read_bookmarks(document.bookmarks().root(), 0, &mut budget);
        info!(
            "Outline loaded: {} top-level entries, {} pages",
            bookmarks.len(),
            page_count
        );
        Ok(PdfOutline {
            page_count,
            bookmarks,
        })
    })
    .await
}

fn read_bookmarks(
    first: Option<PdfBookmark<'_>>,
    depth: usize,
    budget: &mut usize,
) -> Vec<RawOutlineNode<PdfDestinationIndex>> {
    let mut nodes = Vec::new();
    let mut cursor = first;
    while let Some(bookmark) = cursor {
        if *budget == 0 {
            warn!("Outline truncated after {} entries", MAX_OUTLINE_NODES);
            break;
        }
        *budget -= 1;

        let title = bookmark.title().unwrap_or_default();
        let destination = bookmark.destination().and_then(|d| match d.page_index() {
            Ok(index) => Some(index),
            Err(e) => {
                debug!("Bookmark {:?}: unreadable destination: {:?}", title, e);
                None
            }
        });
        let children = if depth < MAX_OUTLINE_DEPTH {
            read_bookmarks(bookmark.first_child(), depth + 1, budget)
        } else {
            warn!("Bookmark {:?}: nesting deeper than {} ignored", title, MAX_OUTLINE_DEPTH);
            Vec::new()
        };
        nodes.push(RawOutlineNode::new(title, destination).with_children(children));
        cursor = bookmark.next_sibling();
    }
    nodes
}

/// Maps pdfium's 0-based destination indices to 1-based pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfPageLookup {
    page_count: u32,
}

impl PdfPageLookup {
    pub fn new(page_count: u32) -> Self {
        Self { page_count }
    }

    /// Synchronous form, usable with [`OutlineResolver::try_resolve`].
    pub fn page_for(&self, destination: &PdfDestinationIndex) -> Result<Option<u32>, String> {
        match *destination {
            None => Ok(None),
            Some(index) if u32::from(index) < self.page_count => Ok(Some(u32::from(index) + 1)),
            Some(index) => Err(format!(
                "destination page index {} beyond {} pages",
                index, self.page_count
            )),
        }
    }
}

impl DestinationLookup<PdfDestinationIndex> for PdfPageLookup {
    fn lookup<'a>(
        &'a self,
        destination: &'a PdfDestinationIndex,
    ) -> BoxFuture<'a, Result<Option<u32>, String>> {
        Box::pin(async move { self.page_for(destination) })
    }
}

// ── Rasterising canvas ──────────────────────────────────────────────────

/// A page drawn by [`PdfiumCanvas`].
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page: u32,
    pub scale: f32,
    pub image: DynamicImage,
}

/// Draws pages into an in-memory surface of images, one per page.
///
/// A newer draw of the same page replaces the older image.
#[derive(Clone)]
pub struct PdfiumCanvas {
    path: PathBuf,
    password: Option<String>,
    surface: Arc<Mutex<HashMap<u32, RenderedPage>>>,
}

impl PdfiumCanvas {
    pub fn new(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            password,
            surface: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn surface(&self) -> MutexGuard<'_, HashMap<u32, RenderedPage>> {
        self.surface.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the last image drawn for `page`.
    pub fn page_image(&self, page: u32) -> Option<RenderedPage> {
        self.surface().get(&page).cloned()
    }

    /// Remove and return the last image drawn for `page`.
    pub fn take_page(&self, page: u32) -> Option<RenderedPage> {
        self.surface().remove(&page)
    }

    /// Pages currently held on the surface, ascending.
    pub fn drawn_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.surface().keys().copied().collect();
        pages.sort_unstable();
        pages
    }
}

impl PageCanvas for PdfiumCanvas {
    fn draw_page(&self, page: u32, scale: f32) -> BoxFuture<'static, Result<(), String>> {
        let path = self.path.clone();
        let password = self.password.clone();
        let surface = Arc::clone(&self.surface);
        Box::pin(async move {
            let image = tokio::task::spawn_blocking(move || {
                render_page_blocking(&path, password.as_deref(), page, scale)
            })
            .await
            .map_err(|e| format!("render task panicked: {e}"))??;

            surface
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(page, RenderedPage { page, scale, image });
            Ok(())
        })
    }
}

/// Rasterise one 1-based page at `scale`.
fn render_page_blocking(
    path: &Path,
    password: Option<&str>,
    page: u32,
    scale: f32,
) -> Result<DynamicImage, String> {
    let pdfium = bind_pdfium().map_err(|e| e.to_string())?;
    let document = pdfium
        .load_pdf_from_file(path, password)
        .map_err(|e| open_error(path, password, e).to_string())?;

    let index = page
        .checked_sub(1)
        .and_then(|i| u16::try_from(i).ok())
        .ok_or_else(|| format!("page {page} cannot be addressed"))?;
    let pdf_page = document
        .pages()
        .get(index)
        .map_err(|e| format!("{:?}", e))?;

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
    let bitmap = pdf_page
        .render_with_config(&render_config)
        .map_err(|e| format!("{:?}", e))?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} at {} → {}x{} px",
        page,
        scale,
        image.width(),
        image.height()
    );
    Ok(image)
}
