//! Integration tests for frame pacing and deferred destruction working
//! together, driven by scripted fences instead of a GPU.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex, Once};

use hybrid_render::lifetime::ResourceLifetimeTracker;
use hybrid_render::pacing::{FrameSlots, SlotFence};
use hybrid_rhi::RhiResult;

static LOGGING: Once = Once::new();

fn init() {
    LOGGING.call_once(hybrid_core::init_logging);
}

/// Fence whose state is flipped explicitly by the test.
#[derive(Clone)]
struct ScriptedFence {
    signaled: Arc<Mutex<bool>>,
}

impl ScriptedFence {
    fn new() -> Self {
        Self {
            signaled: Arc::new(Mutex::new(true)),
        }
    }

    fn complete(&self) {
        *self.signaled.lock().unwrap() = true;
    }
}

impl SlotFence for ScriptedFence {
    fn wait(&self) -> RhiResult<()> {
        // The scripted harness completes fences before reuse; a blocked
        // wait here would be a test sequencing bug.
        assert!(
            *self.signaled.lock().unwrap(),
            "wait on a fence the test never completed"
        );
        Ok(())
    }

    fn reset(&self) -> RhiResult<()> {
        *self.signaled.lock().unwrap() = false;
        Ok(())
    }

    fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap()
    }
}

/// Minimal stand-in for the frame loop's per-tick sequence: wait, reset,
/// sweep, "submit", advance.
struct Harness {
    slots: FrameSlots<ScriptedFence>,
    fences: Vec<ScriptedFence>,
    tracker: ResourceLifetimeTracker,
}

impl Harness {
    fn new(frame_count: usize) -> Self {
        let fences: Vec<ScriptedFence> = (0..frame_count).map(|_| ScriptedFence::new()).collect();
        Self {
            slots: FrameSlots::new(fences.clone()),
            fences,
            tracker: ResourceLifetimeTracker::new(),
        }
    }

    fn tick(&mut self) {
        self.slots.wait_current().unwrap();

        let Self { tracker, slots, .. } = self;
        tracker.sweep(|frame| slots.is_complete(frame));

        self.slots.reset_current().unwrap();
        self.slots.advance();
    }

    fn destroy_deferred(&mut self, destroy: impl FnOnce() + 'static) {
        self.tracker
            .request_destroy(self.slots.active_slots(), destroy);
    }
}

fn destruction_counter() -> (Rc<RefCell<u32>>, impl FnOnce() + 'static) {
    let count = Rc::new(RefCell::new(0u32));
    let inner = count.clone();
    (count, move || *inner.borrow_mut() += 1)
}

#[test]
fn frame_index_advances_cyclically_across_many_ticks() {
    init();
    let mut harness = Harness::new(3);

    for k in 0u32..12 {
        assert_eq!(harness.slots.current(), k % 3);
        harness.tick();
        harness.fences[(k % 3) as usize].complete();
    }
}

#[test]
fn destruction_waits_for_both_active_frames() {
    init();
    let mut harness = Harness::new(3);

    // Two ticks leave slots 0 and 1 in flight.
    harness.tick();
    harness.tick();
    assert_eq!(harness.slots.active_slots(), vec![0, 1]);

    let (count, destroy) = destruction_counter();
    harness.destroy_deferred(destroy);

    // Frame 0 completes; the entry still waits on frame 1.
    harness.fences[0].complete();
    harness.tick();
    assert_eq!(*count.borrow(), 0);
    assert_eq!(harness.tracker.pending_len(), 1);

    // Frame 1 completes; the closure runs exactly once.
    harness.fences[1].complete();
    harness.fences[2].complete();
    harness.tick();
    assert_eq!(*count.borrow(), 1);
    assert_eq!(harness.tracker.pending_len(), 0);

    // Later ticks never re-run it.
    harness.fences[0].complete();
    harness.tick();
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn destruction_latency_is_at_least_active_frame_count() {
    init();
    let mut harness = Harness::new(3);

    // Fill every slot.
    for _ in 0..3 {
        harness.tick();
        // Keep fences unsignaled: all three frames stay in flight.
    }
    let active = harness.slots.active_slots();
    assert_eq!(active.len(), 3);

    let (count, destroy) = destruction_counter();
    harness.destroy_deferred(destroy);

    // Complete frames one at a time; the resource must survive until the
    // last active frame retires.
    for (completed, &frame) in active.iter().enumerate() {
        assert_eq!(*count.borrow(), 0, "destroyed after {} completions", completed);
        harness.fences[frame as usize].complete();
        harness.tick();
        harness.fences[harness.slots.current() as usize].complete();
    }

    assert_eq!(*count.borrow(), 1);
}

#[test]
fn request_with_no_frames_in_flight_destroys_immediately() {
    init();
    let mut harness = Harness::new(2);

    let (count, destroy) = destruction_counter();
    harness.destroy_deferred(destroy);

    assert_eq!(*count.borrow(), 1);
    assert_eq!(harness.tracker.pending_len(), 0);
}

#[test]
fn force_complete_flushes_entries_on_shutdown() {
    init();
    let mut harness = Harness::new(2);

    harness.tick();
    let (count, destroy) = destruction_counter();
    harness.destroy_deferred(destroy);

    // Shutdown path: device idle is represented by the test simply being
    // past all GPU work; every entry must run, none may leak.
    harness.tracker.force_complete_all();
    assert_eq!(*count.borrow(), 1);
}
