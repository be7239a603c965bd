//! Deferred Procedure Call (DPC) queue.
//!
//! A DPC is a kernel callback scheduled from an IRQ handler for execution
//! at IRQL [`DISPATCH`], once the handler itself has returned and IRQL has
//! dropped back down to something at or below it. [`enqueue`] is safe to
//! call from any IRQL (including above `DISPATCH`, which is the whole
//! point — the timer tick handler in `crate::timer` runs at `TIMER` and
//! only enqueues, keeping the actual timer-list walk out of the
//! highest-priority interrupt window). [`run_pending`] drains the queue
//! and must be called from a context at or below `DISPATCH`; it raises to
//! `DISPATCH` itself for the duration of the drain.

use spin::Mutex;

use crate::irq::irql::{self, DISPATCH};

/// A DPC callback takes no arguments and returns nothing; any state it
/// needs is reached through the callee's own globals, the same
/// function-pointer-only design `timer::TimerCallback` uses so DPCs can be
/// queued without `alloc`.
pub type DpcCallback = fn();

/// Maximum number of DPCs that may be pending at once. A device storm
/// that enqueues faster than `run_pending` drains is a driver bug;
/// [`enqueue`] silently drops the callback past this bound rather than
/// blocking or growing, since blocking inside an IRQ handler is not an
/// option.
const MAX_PENDING: usize = 64;

/// Fixed-capacity FIFO ring buffer of pending callbacks.
struct DpcQueue {
    slots: [Option<DpcCallback>; MAX_PENDING],
    head: usize,
    len: usize,
}

impl DpcQueue {
    const fn new() -> Self {
        const NONE: Option<DpcCallback> = None;
        Self {
            slots: [NONE; MAX_PENDING],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, callback: DpcCallback) -> bool {
        if self.len == MAX_PENDING {
            return false;
        }
        let tail = (self.head + self.len) % MAX_PENDING;
        self.slots[tail] = Some(callback);
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<DpcCallback> {
        if self.len == 0 {
            return None;
        }
        let cb = self.slots[self.head].take();
        self.head = (self.head + 1) % MAX_PENDING;
        self.len -= 1;
        cb
    }
}

static QUEUE: Mutex<DpcQueue> = Mutex::new(DpcQueue::new());

/// Queue `callback` for execution the next time [`run_pending`] runs.
/// Returns `false` if the queue is full and the callback was dropped.
pub fn enqueue(callback: DpcCallback) -> bool {
    QUEUE.lock().push(callback)
}

/// Drain and invoke every pending DPC, raising IRQL to `DISPATCH` for the
/// duration. Returns the number of callbacks invoked.
pub fn run_pending() -> usize {
    let _guard = irql::raise_guarded(DISPATCH);
    let mut count = 0;
    while let Some(cb) = QUEUE.lock().pop() {
        cb();
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn bump() {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn enqueue_then_run_pending_invokes_callback() {
        CALLS.store(0, Ordering::Relaxed);
        assert!(enqueue(bump));
        let ran = run_pending();
        assert_eq!(ran, 1);
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
        // Queue is empty now; a second drain does nothing.
        assert_eq!(run_pending(), 0);
    }

    #[test]
    fn queue_is_fifo() {
        static ORDER: Mutex<[u8; 3]> = Mutex::new([0; 3]);
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        fn mark_one() {
            let i = NEXT.fetch_add(1, Ordering::Relaxed);
            ORDER.lock()[i] = 1;
        }
        fn mark_two() {
            let i = NEXT.fetch_add(1, Ordering::Relaxed);
            ORDER.lock()[i] = 2;
        }
        NEXT.store(0, Ordering::Relaxed);
        enqueue(mark_one);
        enqueue(mark_two);
        run_pending();
        let order = *ORDER.lock();
        assert_eq!(order, [1, 2, 0]);
    }

    #[test]
    fn full_queue_rejects_further_enqueues() {
        // Fill the queue past capacity with a callback that never gets run
        // in this test (we don't call run_pending), just to exercise the
        // capacity check.
        let mut last = true;
        for _ in 0..MAX_PENDING {
            last = enqueue(bump);
        }
        assert!(last);
        assert!(!enqueue(bump));
        // Clean up so later tests see an empty queue.
        run_pending();
    }
}
