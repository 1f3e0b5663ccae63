//! Frame-aligned batching
//!
//! Mutations do not notify anyone directly. The first mutation after a
//! dispatch asks the host for a frame callback and remembers the handle;
//! later mutations in the same frame see the handle and do nothing. When
//! the frame fires, every change accumulated so far is dispatched at once.
//!
//! The host's frame source is abstracted behind [`FrameHost`].
//! [`FrameQueue`] is the in-process implementation: the host (or a test)
//! drives it by calling [`FrameQueue::run_frame`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Handle to a requested frame callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

impl FrameHandle {
    pub fn to_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        FrameHandle(raw)
    }
}

/// Callback run once when a frame fires
pub type FrameCallback = Box<dyn FnOnce()>;

/// Source of frame callbacks (animation frame, vsync, event-loop tick)
pub trait FrameHost {
    /// Request `callback` to run on the next frame
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle;

    /// Cancel a previously requested callback. Unknown handles are ignored.
    fn cancel_frame(&self, handle: FrameHandle);
}

// =============================================================================
// FRAME QUEUE
// =============================================================================

/// In-process frame source driven by [`run_frame`](Self::run_frame)
#[derive(Default)]
pub struct FrameQueue {
    next_handle: Cell<u64>,
    queued: RefCell<VecDeque<(FrameHandle, FrameCallback)>>,
    frames_run: Cell<u64>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every callback requested before this call
    ///
    /// Callbacks requested while the frame runs wait for the next frame.
    /// Returns the number of callbacks run.
    pub fn run_frame(&self) -> usize {
        let due: Vec<(FrameHandle, FrameCallback)> = self.queued.borrow_mut().drain(..).collect();
        let count = due.len();
        for (_, callback) in due {
            callback();
        }
        self.frames_run.set(self.frames_run.get() + 1);
        count
    }

    /// Run frames until no callbacks remain, up to `max_frames`
    pub fn run_until_idle(&self, max_frames: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_frames {
            if self.pending() == 0 {
                break;
            }
            total += self.run_frame();
        }
        total
    }

    /// Number of callbacks waiting for the next frame
    pub fn pending(&self) -> usize {
        self.queued.borrow().len()
    }

    pub fn frames_run(&self) -> u64 {
        self.frames_run.get()
    }
}

impl FrameHost for FrameQueue {
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
        let handle = FrameHandle(self.next_handle.get());
        self.next_handle.set(handle.0 + 1);
        self.queued.borrow_mut().push_back((handle, callback));
        handle
    }

    fn cancel_frame(&self, handle: FrameHandle) {
        self.queued.borrow_mut().retain(|(queued, _)| *queued != handle);
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Coalesces scheduling requests into at most one outstanding frame
pub struct Scheduler {
    host: Rc<dyn FrameHost>,
    pending: Cell<Option<FrameHandle>>,
    frames_requested: Cell<u64>,
}

impl Scheduler {
    pub fn new(host: Rc<dyn FrameHost>) -> Self {
        Self {
            host,
            pending: Cell::new(None),
            frames_requested: Cell::new(0),
        }
    }

    /// Whether a frame has been requested and not yet fired or cancelled
    pub fn is_pending(&self) -> bool {
        self.pending.get().is_some()
    }

    /// Request a frame unless one is already pending
    ///
    /// The callback is only built when a frame is actually requested.
    /// Returns `true` if a new frame was requested.
    pub fn schedule(&self, make_callback: impl FnOnce() -> FrameCallback) -> bool {
        if self.is_pending() {
            return false;
        }
        let handle = self.host.request_frame(make_callback());
        self.pending.set(Some(handle));
        self.frames_requested.set(self.frames_requested.get() + 1);
        tracing::trace!(handle = handle.to_raw(), "frame requested");
        true
    }

    /// Forget the pending handle once its frame has fired
    pub fn release(&self) {
        self.pending.set(None);
    }

    /// Cancel the outstanding frame, if any
    pub fn cancel(&self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                self.host.cancel_frame(handle);
                tracing::debug!(handle = handle.to_raw(), "frame cancelled");
                true
            }
            None => false,
        }
    }

    pub fn frames_requested(&self) -> u64 {
        self.frames_requested.get()
    }
}
