//! Frame-slot pacing against asynchronous GPU execution.
//!
//! [`FrameSlots`] owns one fence per frame slot and cycles through them. A
//! slot's command buffer may be reused only after its fence has signaled,
//! which makes the per-slot wait the one hard backpressure point between CPU
//! recording and GPU consumption.
//!
//! The fence is abstracted behind [`SlotFence`] so the pacing contract can
//! be exercised with a mock fence; the frame loop instantiates it with
//! [`hybrid_rhi::sync::Fence`].

use hybrid_rhi::sync::Fence;
use hybrid_rhi::RhiResult;

/// CPU-observable completion primitive for one frame slot.
pub trait SlotFence {
    /// Blocks until the fence signals.
    fn wait(&self) -> RhiResult<()>;

    /// Resets the fence to the unsignaled state.
    fn reset(&self) -> RhiResult<()>;

    /// Non-blocking check whether the fence has signaled.
    fn is_signaled(&self) -> bool;
}

impl SlotFence for Fence {
    fn wait(&self) -> RhiResult<()> {
        Fence::wait(self, u64::MAX)
    }

    fn reset(&self) -> RhiResult<()> {
        Fence::reset(self)
    }

    fn is_signaled(&self) -> bool {
        Fence::is_signaled(self)
    }
}

/// Cyclic frame-slot state: the current index plus one fence per slot.
///
/// The index advances strictly cyclically; at most `slot_count` frames can
/// be in flight because slot reuse waits on the slot's fence first.
pub struct FrameSlots<F: SlotFence> {
    fences: Vec<F>,
    current: usize,
}

impl<F: SlotFence> FrameSlots<F> {
    /// Creates the slot set from per-slot fences.
    ///
    /// Fences must start signaled so the first cycle through each slot does
    /// not block.
    ///
    /// # Panics
    ///
    /// Panics if `fences` is empty.
    pub fn new(fences: Vec<F>) -> Self {
        assert!(!fences.is_empty(), "at least one frame slot is required");
        Self { fences, current: 0 }
    }

    /// Returns the number of frame slots.
    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.fences.len() as u32
    }

    /// Returns the current slot index.
    #[inline]
    pub fn current(&self) -> u32 {
        self.current as u32
    }

    /// Returns the current slot's fence.
    #[inline]
    pub fn current_fence(&self) -> &F {
        &self.fences[self.current]
    }

    /// Blocks until the current slot's previous submission has completed.
    pub fn wait_current(&self) -> RhiResult<()> {
        self.fences[self.current].wait()
    }

    /// Resets the current slot's fence for the next submission.
    pub fn reset_current(&self) -> RhiResult<()> {
        self.fences[self.current].reset()
    }

    /// Advances to the next slot: `index = (index + 1) % slot_count`.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.fences.len();
    }

    /// Non-blocking check whether the given slot's work has completed.
    #[inline]
    pub fn is_complete(&self, slot: u32) -> bool {
        self.fences[slot as usize].is_signaled()
    }

    /// Snapshots the slots whose submissions have not yet completed.
    ///
    /// This is the "frames active right now" set a deferred-destruction
    /// request must wait out.
    pub fn active_slots(&self) -> Vec<u32> {
        (0..self.slot_count())
            .filter(|&slot| !self.is_complete(slot))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex};

    /// Mock fence that signals only on an explicit `complete()` call.
    #[derive(Clone)]
    struct MockFence {
        state: Arc<(Mutex<bool>, Condvar)>,
    }

    impl MockFence {
        fn new(signaled: bool) -> Self {
            Self {
                state: Arc::new((Mutex::new(signaled), Condvar::new())),
            }
        }

        fn complete(&self) {
            let (lock, cvar) = &*self.state;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
    }

    impl SlotFence for MockFence {
        fn wait(&self) -> RhiResult<()> {
            let (lock, cvar) = &*self.state;
            let mut signaled = lock.lock().unwrap();
            while !*signaled {
                signaled = cvar.wait(signaled).unwrap();
            }
            Ok(())
        }

        fn reset(&self) -> RhiResult<()> {
            *self.state.0.lock().unwrap() = false;
            Ok(())
        }

        fn is_signaled(&self) -> bool {
            *self.state.0.lock().unwrap()
        }
    }

    fn signaled_slots(count: usize) -> (FrameSlots<MockFence>, Vec<MockFence>) {
        let fences: Vec<MockFence> = (0..count).map(|_| MockFence::new(true)).collect();
        (FrameSlots::new(fences.clone()), fences)
    }

    #[test]
    fn test_frame_index_advances_cyclically() {
        let (mut slots, _) = signaled_slots(3);

        let mut previous = slots.current();
        for _ in 0..10 {
            slots.advance();
            assert_eq!(slots.current(), (previous + 1) % 3);
            previous = slots.current();
        }
    }

    #[test]
    fn test_active_slots_tracks_unsignaled_fences() {
        let (slots, fences) = signaled_slots(3);
        assert!(slots.active_slots().is_empty());

        fences[0].reset().unwrap();
        fences[2].reset().unwrap();
        assert_eq!(slots.active_slots(), vec![0, 2]);

        fences[0].complete();
        assert_eq!(slots.active_slots(), vec![2]);
    }

    #[test]
    fn test_fourth_draw_blocks_until_first_completes() {
        // Frame count 3, five back-to-back draw cycles: the 4th reuses slot
        // 0 and must block until complete(0).
        let fences: Vec<MockFence> = (0..3).map(|_| MockFence::new(true)).collect();
        let shared: Vec<MockFence> = fences.clone();

        let progress = Arc::new(AtomicUsize::new(0));
        let worker_progress = progress.clone();

        let worker = std::thread::spawn(move || {
            let mut slots = FrameSlots::new(fences);
            for _ in 0..5 {
                slots.wait_current().unwrap();
                slots.reset_current().unwrap();
                worker_progress.fetch_add(1, Ordering::SeqCst);
                slots.advance();
            }
        });

        // The first three cycles consume the initially signaled fences.
        while progress.load(Ordering::SeqCst) < 3 {
            std::thread::yield_now();
        }

        // The 4th cycle waits on slot 0, which has been reset and not
        // completed; give the worker a moment to prove it is stuck.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(progress.load(Ordering::SeqCst), 3);

        shared[0].complete();
        while progress.load(Ordering::SeqCst) < 4 {
            std::thread::yield_now();
        }

        shared[1].complete();
        worker.join().unwrap();
        assert_eq!(progress.load(Ordering::SeqCst), 5);
    }

    #[test]
    #[should_panic(expected = "at least one frame slot")]
    fn test_empty_slot_set_rejected() {
        let _ = FrameSlots::<MockFence>::new(Vec::new());
    }
}
