//! Path-based subscription registry
//!
//! Maps relative dependency paths to the renders that read them. A render
//! can be listed under many paths; a path lists each render once.
//!
//! Resolution for a changed path matches:
//! - exact subscribers of that path,
//! - subscribers of an ancestor path (a render that read `user` reacts to
//!   `user.name`),
//! - subscribers of a descendant path (a render that read `user.name`
//!   reacts to `user` being replaced).
//!
//! All matching is segment-aligned.

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxBuildHasher;
use slotmap::new_key_type;

use crate::path;

new_key_type! {
    /// Unique identifier for a registered render callback
    pub struct RenderId;
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    by_path: IndexMap<String, IndexSet<RenderId>, FxBuildHasher>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a render to a path. Returns `false` if already subscribed.
    pub fn register(&mut self, path: &str, render: RenderId) -> bool {
        match self.by_path.get_mut(path) {
            Some(renders) => renders.insert(render),
            None => {
                let mut renders = IndexSet::new();
                renders.insert(render);
                self.by_path.insert(path.to_string(), renders);
                true
            }
        }
    }

    /// Subscribe a render to every path, returning how many were new
    pub fn register_all<'a>(
        &mut self,
        paths: impl IntoIterator<Item = &'a str>,
        render: RenderId,
    ) -> usize {
        paths
            .into_iter()
            .filter(|path| self.register(path, render))
            .count()
    }

    /// Exact subscribers of a path
    pub fn subscribers(&self, path: &str) -> Option<&IndexSet<RenderId>> {
        self.by_path.get(path)
    }

    /// Collect every render affected by a change at `relative`
    ///
    /// Renders already in `out` are not duplicated, which is what makes a
    /// dispatch pass invoke each render at most once.
    pub fn resolve(&self, relative: &str, out: &mut IndexSet<RenderId>) {
        if let Some(exact) = self.by_path.get(relative) {
            out.extend(exact.iter().copied());
        }

        for (subscribed, renders) in &self.by_path {
            if path::is_strict_prefix(subscribed, relative)
                || path::is_strict_prefix(relative, subscribed)
            {
                out.extend(renders.iter().copied());
            }
        }
    }

    /// Remove a render from every path, dropping emptied paths
    pub fn remove_render(&mut self, render: RenderId) {
        self.by_path.retain(|_, renders| {
            renders.shift_remove(&render);
            !renders.is_empty()
        });
    }

    /// Paths a render is subscribed to, in registration order
    pub fn paths_for(&self, render: RenderId) -> Vec<String> {
        self.by_path
            .iter()
            .filter(|(_, renders)| renders.contains(&render))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Number of distinct subscribed paths
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Total (path, render) pairs
    pub fn subscription_count(&self) -> usize {
        self.by_path.values().map(IndexSet::len).sum()
    }

    pub fn clear(&mut self) {
        self.by_path.clear();
    }
}
