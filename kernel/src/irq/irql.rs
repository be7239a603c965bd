//! Interrupt Request Level (IRQL) discipline.
//!
//! IRQL is a per-CPU monotonic integer in `0..=15`. Raising must strictly
//! increase the level; lowering must strictly decrease it. A mismatched
//! raise/lower (trying to "raise" to an IRQL at or below the current one,
//! or "lower" to one at or above it) indicates a locking bug in the
//! caller and is treated as fatal, the same way a reentrant non-recursive
//! spinlock acquire would be.
//!
//! [`IrqlMutex`] demonstrates the "acquiring a spinlock atomically raises
//! IRQL to the lock's floor" rule as its own wrapper type around
//! [`spin::Mutex`]; the large pre-existing population of bare
//! `spin::Mutex`/`spin::RwLock` statics elsewhere in the tree is not
//! migrated onto it here (see the grounding ledger).

#![allow(dead_code)]

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU8, Ordering};

use spin::{Mutex, MutexGuard};

/// No special priority; ordinary kernel and user-mode execution.
pub const PASSIVE: u8 = 0;
/// The scheduler itself runs here; code above this level cannot be
/// preempted by a context switch.
pub const DISPATCH: u8 = 2;
/// Inter-processor interrupts (TLB shootdown, reschedule IPI).
pub const IPI: u8 = 3;
/// General-purpose external device interrupts.
pub const GPE: u8 = 4;
/// Timer DPC dispatch (see `timer` module).
pub const TIMER: u8 = 5;
/// Masks every maskable interrupt source; the highest level.
pub const MASK_ALL: u8 = 15;

/// Per-CPU current IRQL. A bare `AtomicU8` rather than a `Cell` because
/// other CPUs may read it for diagnostics (e.g. an IPI handler asserting
/// the target was not below `DISPATCH`), though only the owning CPU ever
/// writes it under normal operation (`raise`/`lower` are not meant to be
/// called across CPUs).
static CURRENT_IRQL: AtomicU8 = AtomicU8::new(PASSIVE);

/// Read the current CPU's IRQL.
pub fn current() -> u8 {
    CURRENT_IRQL.load(Ordering::Acquire)
}

/// Raise the current IRQL to `new_irql`, returning the previous level to
/// pass to [`lower`] once the elevated section ends.
///
/// # Panics
/// Panics if `new_irql` is not strictly greater than the current IRQL —
/// raising to or below the current level is always a caller bug (the
/// usual cause is forgetting to lower back before raising again).
pub fn raise(new_irql: u8) -> u8 {
    let old = CURRENT_IRQL.load(Ordering::Acquire);
    assert!(
        new_irql > old,
        "IRQL raise must increase the level: {} -> {}",
        old,
        new_irql
    );
    CURRENT_IRQL.store(new_irql, Ordering::Release);
    old
}

/// Lower the current IRQL back to `old_irql`.
///
/// # Panics
/// Panics if `old_irql` is not strictly less than the current IRQL.
pub fn lower(old_irql: u8) {
    let current = CURRENT_IRQL.load(Ordering::Acquire);
    assert!(
        old_irql < current,
        "IRQL lower must decrease the level: {} -> {}",
        current,
        old_irql
    );
    CURRENT_IRQL.store(old_irql, Ordering::Release);
}

/// RAII guard restoring the previous IRQL on drop. Returned by
/// [`IrqlMutex::lock`] and usable directly via [`raise_guarded`].
pub struct IrqlGuard {
    previous: u8,
}

impl Drop for IrqlGuard {
    fn drop(&mut self) {
        lower(self.previous);
    }
}

/// Raise to `new_irql`, returning a guard that lowers back automatically.
pub fn raise_guarded(new_irql: u8) -> IrqlGuard {
    IrqlGuard {
        previous: raise(new_irql),
    }
}

/// A spinlock with an associated IRQL floor: acquiring it raises the
/// current CPU's IRQL to `floor` for as long as the guard is held,
/// preventing anything running at or below that level (including the
/// scheduler, if `floor >= DISPATCH`) from preempting the critical
/// section on this CPU.
pub struct IrqlMutex<T> {
    floor: u8,
    inner: Mutex<T>,
}

impl<T> IrqlMutex<T> {
    pub const fn new(floor: u8, value: T) -> Self {
        Self {
            floor,
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqlMutexGuard<'_, T> {
        let previous = raise(self.floor);
        IrqlMutexGuard {
            previous,
            guard: ManuallyDrop::new(self.inner.lock()),
        }
    }
}

/// Guard returned by [`IrqlMutex::lock`]. Drop order matters here: the
/// inner spinlock must be released *before* IRQL is lowered, or there is a
/// window where the lock is still held but the CPU is already preemptible
/// at a level that could re-enter and contend on it. `guard` is wrapped in
/// `ManuallyDrop` so the explicit `Drop` impl below can control that order
/// directly instead of relying on field-declaration-order drop, which runs
/// only after the explicit `drop` body returns.
pub struct IrqlMutexGuard<'a, T> {
    previous: u8,
    guard: ManuallyDrop<MutexGuard<'a, T>>,
}

impl<'a, T> Deref for IrqlMutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for IrqlMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for IrqlMutexGuard<'a, T> {
    fn drop(&mut self) {
        // SAFETY: `guard` is read exactly once here, during drop, and never
        // accessed again afterward.
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        lower(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_then_lower_round_trips() {
        let old = raise(DISPATCH);
        assert_eq!(current(), DISPATCH);
        lower(old);
        assert_eq!(current(), old);
    }

    #[test]
    #[should_panic(expected = "IRQL raise must increase")]
    fn raise_to_same_level_panics() {
        let old = raise(GPE);
        let _ = raise(GPE);
        lower(old);
    }

    #[test]
    fn irqlmutex_raises_to_floor_while_held() {
        let lock = IrqlMutex::new(MASK_ALL, 0u32);
        let before = current();
        {
            let mut guard = lock.lock();
            assert_eq!(current(), MASK_ALL);
            *guard += 1;
        }
        assert_eq!(current(), before);
    }
}
