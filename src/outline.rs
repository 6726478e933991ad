//! Bookmark outline → page-indexed navigation tree.
//!
//! A PDF outline points at *destinations*, not pages: named destinations,
//! explicit destination arrays, or actions, depending on the producer. The
//! resolver asks a lookup for the page of every node exactly once and keeps
//! the tree's shape whatever the answers are: a broken bookmark becomes an
//! inert entry, its siblings and descendants still resolve.
//!
//! ```rust
//! use edgequake_pdfchat::outline::{OutlineResolver, RawOutlineNode};
//!
//! let raw = vec![RawOutlineNode::new("Ch1", "D1")
//!     .with_children(vec![RawOutlineNode::new("1.1", "D2")])];
//! let tree = OutlineResolver::resolve(raw, |dest: &&str| match *dest {
//!     "D1" => Some(1),
//!     _ => None,
//! });
//! assert_eq!(tree[0].resolved_page, Some(1));
//! assert_eq!(tree[0].children[0].resolved_page, None);
//! ```

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use tracing::debug;

/// Index path from the root list down to a node, e.g. `[0, 2]`.
pub type OutlinePath = Vec<usize>;

/// A bookmark as read from the document, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutlineNode<D> {
    pub title: String,
    pub destination: D,
    pub children: Vec<RawOutlineNode<D>>,
}

impl<D> RawOutlineNode<D> {
    pub fn new(title: impl Into<String>, destination: D) -> Self {
        Self {
            title: title.into(),
            destination,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<RawOutlineNode<D>>) -> Self {
        self.children = children;
        self
    }
}

/// A resolved bookmark. `resolved_page` is 1-based; `None` means inert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode<D> {
    pub title: String,
    pub raw_destination: D,
    pub resolved_page: Option<u32>,
    /// Depth from the root list (0). Display only.
    pub level: usize,
    pub children: Vec<OutlineNode<D>>,
}

impl<D> OutlineNode<D> {
    /// Whether clicking this node can navigate anywhere.
    pub fn is_navigable(&self) -> bool {
        self.resolved_page.is_some()
    }
}

/// Asynchronous destination → page lookup.
///
/// `Ok(None)` and `Err(_)` both leave the node inert; the error text is only
/// logged.
pub trait DestinationLookup<D>: Send + Sync {
    fn lookup<'a>(&'a self, destination: &'a D) -> BoxFuture<'a, Result<Option<u32>, String>>;
}

/// Builds [`OutlineNode`] trees.
pub struct OutlineResolver;

impl OutlineResolver {
    /// Resolve with an infallible synchronous lookup.
    pub fn resolve<D, F>(raw: Vec<RawOutlineNode<D>>, mut lookup: F) -> Vec<OutlineNode<D>>
    where
        F: FnMut(&D) -> Option<u32>,
    {
        Self::try_resolve(raw, |d| Ok::<_, Infallible>(lookup(d)))
    }

    /// Resolve with a synchronous lookup that may fail.
    pub fn try_resolve<D, F, E>(raw: Vec<RawOutlineNode<D>>, mut lookup: F) -> Vec<OutlineNode<D>>
    where
        F: FnMut(&D) -> Result<Option<u32>, E>,
        E: fmt::Display,
    {
        let mut pages = Vec::new();
        for dest in preorder_destinations(&raw) {
            pages.push(lookup(dest).map_err(|e| e.to_string()));
        }
        assemble(raw, pages)
    }

    /// Resolve with an asynchronous lookup.
    ///
    /// All lookups are issued at once; whatever order they complete in, the
    /// tree keeps the source order.
    pub async fn resolve_async<D, L>(raw: Vec<RawOutlineNode<D>>, lookup: &L) -> Vec<OutlineNode<D>>
    where
        L: DestinationLookup<D> + ?Sized,
    {
        let pages = {
            let lookups = preorder_destinations(&raw)
                .into_iter()
                .map(|dest| lookup.lookup(dest));
            join_all(lookups).await
        };
        assemble(raw, pages)
    }
}

/// Destinations in depth-first pre-order.
fn preorder_destinations<D>(raw: &[RawOutlineNode<D>]) -> Vec<&D> {
    fn walk<'a, D>(nodes: &'a [RawOutlineNode<D>], out: &mut Vec<&'a D>) {
        for node in nodes {
            out.push(&node.destination);
            walk(&node.children, out);
        }
    }
    let mut out = Vec::new();
    walk(raw, &mut out);
    out
}

/// Rebuild the tree, consuming lookup results in the same pre-order.
fn assemble<D>(
    raw: Vec<RawOutlineNode<D>>,
    pages: Vec<Result<Option<u32>, String>>,
) -> Vec<OutlineNode<D>> {
    fn build<D>(
        nodes: Vec<RawOutlineNode<D>>,
        level: usize,
        pages: &mut impl Iterator<Item = Result<Option<u32>, String>>,
    ) -> Vec<OutlineNode<D>> {
        nodes
            .into_iter()
            .map(|node| {
                let resolved_page = match pages.next() {
                    Some(Ok(Some(page))) if page > 0 => Some(page),
                    Some(Ok(_)) => {
                        debug!("Outline entry {:?} has no page; left inert", node.title);
                        None
                    }
                    Some(Err(e)) => {
                        debug!("Outline entry {:?} lookup failed: {}", node.title, e);
                        None
                    }
                    None => None,
                };
                OutlineNode {
                    title: node.title,
                    raw_destination: node.destination,
                    resolved_page,
                    level,
                    children: build(node.children, level + 1, pages),
                }
            })
            .collect()
    }

    let mut pages = pages.into_iter();
    build(raw, 0, &mut pages)
}

/// Total number of nodes in a tree.
pub fn outline_len<D>(tree: &[OutlineNode<D>]) -> usize {
    tree.iter().map(|n| 1 + outline_len(&n.children)).sum()
}

/// The node at `path`, if any.
pub fn node_at<'a, D>(tree: &'a [OutlineNode<D>], path: &[usize]) -> Option<&'a OutlineNode<D>> {
    let (first, rest) = path.split_first()?;
    let mut node = tree.get(*first)?;
    for &i in rest {
        node = node.children.get(i)?;
    }
    Some(node)
}

/// Path of the shallowest node pointing at `page`; source order breaks ties.
pub fn find_shallowest<D>(tree: &[OutlineNode<D>], page: u32) -> Option<OutlinePath> {
    let mut queue: VecDeque<(OutlinePath, &OutlineNode<D>)> = tree
        .iter()
        .enumerate()
        .map(|(i, n)| (vec![i], n))
        .collect();

    while let Some((path, node)) = queue.pop_front() {
        if node.resolved_page == Some(page) {
            return Some(path);
        }
        for (i, child) in node.children.iter().enumerate() {
            let mut child_path = path.clone();
            child_path.push(i);
            queue.push_back((child_path, child));
        }
    }
    None
}
