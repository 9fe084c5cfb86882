//! Deferred destruction of GPU-referenced resources.
//!
//! A resource referenced by in-flight frames must outlive every frame that
//! could still touch it on the GPU. [`ResourceLifetimeTracker`] stores the
//! destructor closure together with a snapshot of the frame slots that were
//! active when destruction was requested; the per-tick sweep drains the
//! snapshot as slots complete and runs the closure exactly once when it
//! empties.
//!
//! The tracker itself is pure bookkeeping: slot completion is supplied as a
//! closure, so the frame loop can feed it real fence status and tests can
//! feed it scripted completion.

use std::collections::BTreeSet;

use tracing::{debug, warn};

/// One resource awaiting destruction.
struct DeferredEntry {
    /// Destructor, taken exactly once.
    destroy: Option<Box<dyn FnOnce()>>,
    /// Frame slots that must complete before the destructor may run.
    frames: BTreeSet<u32>,
}

impl DeferredEntry {
    fn finish(&mut self) {
        if let Some(destroy) = self.destroy.take() {
            destroy();
        }
    }
}

/// Defers resource destruction until every snapshotted frame slot completes.
#[derive(Default)]
pub struct ResourceLifetimeTracker {
    pending: Vec<DeferredEntry>,
}

impl ResourceLifetimeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests deferred destruction of a resource.
    ///
    /// `active` is the snapshot of frame slots in flight right now. If it is
    /// empty, no frame can reference the resource and the destructor runs
    /// immediately. Returns without blocking in either case.
    pub fn request_destroy(
        &mut self,
        active: impl IntoIterator<Item = u32>,
        destroy: impl FnOnce() + 'static,
    ) {
        let frames: BTreeSet<u32> = active.into_iter().collect();

        if frames.is_empty() {
            destroy();
            return;
        }

        debug!("Deferring resource destruction behind frames {:?}", frames);

        self.pending.push(DeferredEntry {
            destroy: Some(Box::new(destroy)),
            frames,
        });
    }

    /// Sweeps pending entries, called once per draw cycle.
    ///
    /// `is_complete` reports whether a frame slot's submission has finished.
    /// Entries whose pending set drains have their destructor invoked and
    /// are removed.
    pub fn sweep(&mut self, mut is_complete: impl FnMut(u32) -> bool) {
        self.pending.retain_mut(|entry| {
            entry.frames.retain(|&frame| !is_complete(frame));

            if entry.frames.is_empty() {
                entry.finish();
                false
            } else {
                true
            }
        });
    }

    /// Runs every pending destructor regardless of frame state.
    ///
    /// Only valid once the GPU is idle; the frame loop waits out the device
    /// before calling this on shutdown or across a swapchain transition.
    pub fn force_complete_all(&mut self) {
        if !self.pending.is_empty() {
            debug!("Force-completing {} deferred entries", self.pending.len());
        }

        for mut entry in self.pending.drain(..) {
            entry.finish();
        }
    }

    /// Returns the number of entries still awaiting frame completion.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for ResourceLifetimeTracker {
    fn drop(&mut self) {
        // Leaking is as unacceptable as early destruction; the owner is
        // expected to have waited for device idle by now.
        if !self.pending.is_empty() {
            warn!(
                "Lifetime tracker dropped with {} pending entries; force-completing",
                self.pending.len()
            );
            self.force_complete_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    fn counter() -> (Rc<RefCell<u32>>, impl FnOnce() + 'static) {
        let count = Rc::new(RefCell::new(0));
        let inner = count.clone();
        (count, move || *inner.borrow_mut() += 1)
    }

    #[test]
    fn test_empty_snapshot_destroys_immediately() {
        let mut tracker = ResourceLifetimeTracker::new();
        let (count, destroy) = counter();

        tracker.request_destroy([], destroy);

        assert_eq!(*count.borrow(), 1);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn test_closure_runs_only_after_all_frames_complete() {
        let mut tracker = ResourceLifetimeTracker::new();
        let (count, destroy) = counter();

        tracker.request_destroy([0, 1], destroy);
        assert_eq!(tracker.pending_len(), 1);

        // Frame 0 completes, frame 1 still in flight.
        tracker.sweep(|frame| frame == 0);
        assert_eq!(*count.borrow(), 0);
        assert_eq!(tracker.pending_len(), 1);

        // Frame 1 completes.
        tracker.sweep(|frame| frame == 1);
        assert_eq!(*count.borrow(), 1);
        assert_eq!(tracker.pending_len(), 0);

        // Further sweeps never re-run the destructor.
        tracker.sweep(|_| true);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_destruction_waits_for_every_active_slot() {
        let mut tracker = ResourceLifetimeTracker::new();
        let (count, destroy) = counter();

        tracker.request_destroy(0..3, destroy);

        for completed in 0..2u32 {
            tracker.sweep(|frame| frame <= completed);
            assert_eq!(*count.borrow(), 0, "destroyed after {} frames", completed + 1);
        }

        tracker.sweep(|_| true);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_entries_with_disjoint_frames_complete_independently() {
        let mut tracker = ResourceLifetimeTracker::new();
        let (count_a, destroy_a) = counter();
        let (count_b, destroy_b) = counter();

        tracker.request_destroy([0], destroy_a);
        tracker.request_destroy([1], destroy_b);

        tracker.sweep(|frame| frame == 1);
        assert_eq!(*count_a.borrow(), 0);
        assert_eq!(*count_b.borrow(), 1);

        tracker.sweep(|frame| frame == 0);
        assert_eq!(*count_a.borrow(), 1);
    }

    #[test]
    fn test_force_complete_runs_everything_once() {
        let mut tracker = ResourceLifetimeTracker::new();
        let (count_a, destroy_a) = counter();
        let (count_b, destroy_b) = counter();

        tracker.request_destroy([0, 1], destroy_a);
        tracker.request_destroy([2], destroy_b);

        tracker.force_complete_all();

        assert_eq!(*count_a.borrow(), 1);
        assert_eq!(*count_b.borrow(), 1);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn test_drop_force_completes_pending_entries() {
        let (count, destroy) = counter();

        {
            let mut tracker = ResourceLifetimeTracker::new();
            tracker.request_destroy([0], destroy);
        }

        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_duplicate_frame_indices_collapse() {
        let mut tracker = ResourceLifetimeTracker::new();
        let (count, destroy) = counter();

        tracker.request_destroy([1, 1, 1], destroy);

        tracker.sweep(|frame| frame == 1);
        assert_eq!(*count.borrow(), 1);
    }
}
