//! Diagnostic report channel
//!
//! Every [`Fault`] goes through here: it is logged via `tracing`, counted,
//! kept in a bounded ring of recent reports, and forwarded to an optional
//! host hook (dev overlays, test probes).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Fault;

/// Host callback invoked for every report
pub type ReportHook = Rc<dyn Fn(&Fault)>;

struct DiagnosticsInner {
    recent: RefCell<VecDeque<Fault>>,
    capacity: usize,
    total: Cell<u64>,
    hook: RefCell<Option<ReportHook>>,
}

/// Shared handle to the report channel (cheap to clone)
#[derive(Clone)]
pub struct Diagnostics {
    inner: Rc<DiagnosticsInner>,
}

impl Diagnostics {
    /// Create a channel keeping at most `capacity` recent reports
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Rc::new(DiagnosticsInner {
                recent: RefCell::new(VecDeque::with_capacity(capacity.min(256))),
                capacity,
                total: Cell::new(0),
                hook: RefCell::new(None),
            }),
        }
    }

    pub fn report(&self, fault: Fault) {
        tracing::warn!(kind = fault.kind(), "{}", fault);
        self.inner.total.set(self.inner.total.get() + 1);

        // Clone the hook out so it can report again without a borrow conflict
        let hook = self.inner.hook.borrow().clone();
        if let Some(hook) = hook {
            hook(&fault);
        }

        if self.inner.capacity == 0 {
            return;
        }
        let mut recent = self.inner.recent.borrow_mut();
        if recent.len() == self.inner.capacity {
            recent.pop_front();
        }
        recent.push_back(fault);
    }

    /// Install a host hook, replacing any previous one
    pub fn set_hook(&self, hook: impl Fn(&Fault) + 'static) {
        *self.inner.hook.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn clear_hook(&self) {
        self.inner.hook.borrow_mut().take();
    }

    /// Recent reports, oldest first
    pub fn recent(&self) -> Vec<Fault> {
        self.inner.recent.borrow().iter().cloned().collect()
    }

    /// Total number of reports since creation
    pub fn total(&self) -> u64 {
        self.inner.total.get()
    }

    pub fn clear(&self) {
        self.inner.recent.borrow_mut().clear();
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_REPORT_CAPACITY)
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("total", &self.total())
            .field("recent", &self.inner.recent.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(path: &str) -> Fault {
        Fault::ReadOnlyWrite {
            path: path.to_string(),
        }
    }

    #[test]
    fn test_ring_keeps_latest() {
        let diagnostics = Diagnostics::new(2);
        diagnostics.report(fault("a"));
        diagnostics.report(fault("b"));
        diagnostics.report(fault("c"));

        assert_eq!(diagnostics.total(), 3);
        assert_eq!(diagnostics.recent(), vec![fault("b"), fault("c")]);
    }

    #[test]
    fn test_hook_sees_every_report() {
        let diagnostics = Diagnostics::new(0);
        let seen = Rc::new(Cell::new(0));
        let seen_clone = seen.clone();
        diagnostics.set_hook(move |_| seen_clone.set(seen_clone.get() + 1));

        diagnostics.report(fault("a"));
        diagnostics.report(fault("b"));

        assert_eq!(seen.get(), 2);
        assert!(diagnostics.recent().is_empty());
    }
}
