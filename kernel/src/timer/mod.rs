//! Deadline and interval timer service for OBOS.
//!
//! Sits above the architecture-specific hardware tick source
//! ([`crate::arch::timer`], backed by the platform HPET or invariant TSC)
//! and provides two kinds of software timer:
//!
//! - [`TimerKind::Deadline`]: fires once, at an absolute tick value.
//! - [`TimerKind::Interval`]: fires every N ticks, refreshing its own
//!   last-fired tick each time.
//!
//! The hardware timer interrupt itself only enqueues a DPC
//! ([`crate::irq::dpc`]); the DPC walks the global timer list at IRQL
//! [`irql::TIMER`] and invokes the handler for any timer that has expired.
//! This keeps the list walk (and the handler callbacks it runs) out of the
//! interrupt-disabled window the hardware ISR runs in. [`cancel_timer`]
//! removes a timer atomically and is safe to call from a firing handler.
//!
//! # Usage
//!
//! ```ignore
//! timer::init()?;
//! timer::set_tick_frequency(1_000_000_000); // 1 GHz invariant TSC
//!
//! let wake_at = crate::arch::timer::get_ticks() + timer::time_frame_to_tick(5_000);
//! let id = timer::create_deadline_timer(wake_at, my_callback)?;
//!
//! timer::cancel_timer(id)?;
//!
//! // Called from the timer interrupt handler.
//! timer::on_tick_interrupt();
//! ```

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    error::{KernelError, KernelResult},
    irq::dpc,
    sync::once_lock::GlobalState,
};

/// Maximum number of timers that can be active simultaneously.
///
/// A fixed upper bound avoids unbounded heap allocation in the kernel.
/// Each timer entry is small, so 1024 entries use a modest, constant
/// amount of static memory.
const MAX_TIMERS: usize = 1024;

/// Upper bound on the tick source's frequency. [`set_tick_frequency`]
/// panics above this; [`tick_to_ns`]/[`time_frame_to_tick`] otherwise
/// saturate rather than wrap on overflow.
const MAX_TICK_FREQUENCY_HZ: u64 = 1_000_000_000;

/// Monotonically increasing counter for assigning unique timer IDs.
static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Global timer list, protected by a spin mutex.
static TIMER_LIST: GlobalState<Mutex<TimerList>> = GlobalState::new();

/// Tick frequency in Hz, used by [`tick_to_ns`]/[`time_frame_to_tick`].
/// Defaults to 1 GHz (a conservative invariant-TSC-like assumption) until
/// [`set_tick_frequency`] is called with the platform's measured value.
static TICK_FREQUENCY_HZ: AtomicU64 = AtomicU64::new(MAX_TICK_FREQUENCY_HZ);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Unique identifier for a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What kind of timer this is and how it reschedules itself after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Fires once at an absolute tick value, then deactivates.
    Deadline { at_tick: u64 },
    /// Fires every `interval_ticks`, tracking the tick it last fired at.
    Interval {
        interval_ticks: u64,
        last_ticked: u64,
    },
}

/// Function invoked when a timer expires. Plain function pointers (not
/// closures) so timers can be stored in static data without requiring
/// `alloc`. The firing [`TimerId`] is passed so a shared handler can tell
/// timers apart.
pub type TimerCallback = fn(TimerId);

/// A single software timer entry.
#[derive(Debug, Clone, Copy)]
struct Timer {
    id: TimerId,
    kind: TimerKind,
    callback: TimerCallback,
    active: bool,
}

// ---------------------------------------------------------------------------
// TimerList
// ---------------------------------------------------------------------------

/// Flat pool of timer entries, walked in full on every tick.
///
/// A priority queue keyed by next-fire tick would avoid the O(n) walk, but
/// `MAX_TIMERS` is small enough (and the walk runs at `TIMER`, not inside
/// the hardware ISR) that the simpler fixed-array-plus-free-slots design
/// mirrors this kernel's other no-heap pools (the frame allocator's
/// bitmap, the timer wheel this replaced) rather than introducing a new
/// data structure.
struct TimerList {
    timers: [Option<Timer>; MAX_TIMERS],
    active_count: usize,
}

impl TimerList {
    fn new() -> Self {
        const NONE_TIMER: Option<Timer> = None;
        Self {
            timers: [NONE_TIMER; MAX_TIMERS],
            active_count: 0,
        }
    }

    fn add(&mut self, kind: TimerKind, callback: TimerCallback) -> KernelResult<TimerId> {
        let slot = self
            .timers
            .iter()
            .position(|t| t.is_none())
            .ok_or(KernelError::ResourceExhausted {
                resource: "timer slots",
            })?;

        let id = TimerId::next();
        self.timers[slot] = Some(Timer {
            id,
            kind,
            callback,
            active: true,
        });
        self.active_count += 1;
        Ok(id)
    }

    /// Remove a timer by ID. Safe to call while a handler invoked from
    /// [`fire_expired`] is still executing: the entry is cleared under the
    /// same lock `fire_expired` only briefly drops between collecting
    /// expired entries and invoking their callbacks, so a handler calling
    /// back into `cancel` (e.g. a one-shot watchdog disarming itself, or a
    /// different timer's handler cancelling it) always observes a
    /// consistent list.
    fn cancel(&mut self, id: TimerId) -> KernelResult<()> {
        for entry in self.timers.iter_mut() {
            if let Some(timer) = entry {
                if timer.id == id {
                    *entry = None;
                    self.active_count = self.active_count.saturating_sub(1);
                    return Ok(());
                }
            }
        }
        Err(KernelError::NotFound {
            resource: "timer",
            id: id.0,
        })
    }

    /// Collect, and reschedule, every timer that has expired as of `now`.
    /// Returns the callbacks to invoke; invoking them is left to the
    /// caller so it happens outside the list lock.
    fn collect_expired(&mut self, now: u64) -> ([(TimerId, TimerCallback); 64], usize) {
        let mut fired = [(TimerId(0), noop_callback); 64];
        let mut fired_count = 0usize;

        for entry in self.timers.iter_mut() {
            let Some(timer) = entry else { continue };
            if !timer.active {
                continue;
            }

            let expired = match &mut timer.kind {
                TimerKind::Deadline { at_tick } => now >= *at_tick,
                TimerKind::Interval {
                    interval_ticks,
                    last_ticked,
                } => now.saturating_sub(*last_ticked) >= *interval_ticks,
            };

            if !expired {
                continue;
            }

            if fired_count < fired.len() {
                fired[fired_count] = (timer.id, timer.callback);
                fired_count += 1;
            }

            match &mut timer.kind {
                TimerKind::Deadline { .. } => {
                    *entry = None;
                    self.active_count = self.active_count.saturating_sub(1);
                }
                TimerKind::Interval {
                    interval_ticks,
                    last_ticked,
                } => {
                    // Advance by whole intervals to absorb any overshoot
                    // rather than drifting further behind each tick.
                    let elapsed = now.saturating_sub(*last_ticked);
                    let missed_intervals = (elapsed / *interval_ticks).max(1);
                    *last_ticked += missed_intervals * *interval_ticks;
                }
            }
        }

        (fired, fired_count)
    }

    fn pending_count(&self) -> usize {
        self.active_count
    }
}

fn noop_callback(_id: TimerId) {}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Initialize the timer subsystem. Must be called once during kernel boot,
/// after the global allocator is available (for the `GlobalState` mutex).
pub fn init() -> KernelResult<()> {
    TIMER_LIST
        .init(Mutex::new(TimerList::new()))
        .map_err(|_| KernelError::AlreadyExists {
            resource: "timer list",
            id: 0,
        })
}

/// Set the hardware tick source's frequency in Hz, used by
/// [`tick_to_ns`]/[`time_frame_to_tick`] to convert between ticks and wall
/// time.
///
/// # Panics
/// Panics if `hz` exceeds 1 GHz — a tick source claiming to run faster
/// than that is almost certainly a misread of the platform's calibration
/// data, and every conversion below silently produces nonsense ns/tick
/// values for a frequency that high, so this fails loudly up front
/// instead.
pub fn set_tick_frequency(hz: u64) {
    assert!(
        hz <= MAX_TICK_FREQUENCY_HZ,
        "tick frequency {hz} Hz exceeds the 1 GHz ceiling"
    );
    TICK_FREQUENCY_HZ.store(hz.max(1), Ordering::Relaxed);
}

/// Convert a tick count to nanoseconds at the current tick frequency.
/// Saturates to `u64::MAX` on overflow rather than wrapping.
pub fn tick_to_ns(ticks: u64) -> u64 {
    let hz = TICK_FREQUENCY_HZ.load(Ordering::Relaxed);
    ticks
        .checked_mul(1_000_000_000)
        .map(|ns| ns / hz)
        .unwrap_or(u64::MAX)
}

/// Convert a duration in microseconds to the equivalent number of ticks at
/// the current tick frequency. Saturates to `u64::MAX` on overflow.
pub fn time_frame_to_tick(us: u64) -> u64 {
    let hz = TICK_FREQUENCY_HZ.load(Ordering::Relaxed);
    us.checked_mul(hz)
        .map(|ticks| ticks / 1_000_000)
        .unwrap_or(u64::MAX)
}

/// Register a one-shot timer that fires once `at_tick` (an absolute tick
/// count, as returned by [`crate::arch::timer::get_ticks`]) has passed.
pub fn create_deadline_timer(at_tick: u64, callback: TimerCallback) -> KernelResult<TimerId> {
    TIMER_LIST
        .with_mut(|list| list.lock().add(TimerKind::Deadline { at_tick }, callback))
        .unwrap_or(Err(KernelError::NotInitialized { subsystem: "timer" }))
}

/// Register a timer that fires every `interval_ticks`, starting
/// `interval_ticks` ticks from now.
pub fn create_interval_timer(
    interval_ticks: u64,
    callback: TimerCallback,
) -> KernelResult<TimerId> {
    if interval_ticks == 0 {
        return Err(KernelError::InvalidArgument {
            name: "interval_ticks",
            value: "must be > 0",
        });
    }
    let now = crate::arch::timer::get_ticks();
    TIMER_LIST
        .with_mut(|list| {
            list.lock().add(
                TimerKind::Interval {
                    interval_ticks,
                    last_ticked: now,
                },
                callback,
            )
        })
        .unwrap_or(Err(KernelError::NotInitialized { subsystem: "timer" }))
}

/// Convenience wrapper over [`create_deadline_timer`] for relative sleeps:
/// fires after `ms` milliseconds have elapsed from now.
pub fn sleep_ms_deadline(ms: u64, callback: TimerCallback) -> KernelResult<TimerId> {
    let now = crate::arch::timer::get_ticks();
    let at_tick = now.saturating_add(time_frame_to_tick(ms.saturating_mul(1000)));
    create_deadline_timer(at_tick, callback)
}

/// Cancel an active timer. Safe to call from a firing timer's own handler
/// or another timer's handler.
pub fn cancel_timer(id: TimerId) -> KernelResult<()> {
    TIMER_LIST
        .with_mut(|list| list.lock().cancel(id))
        .unwrap_or(Err(KernelError::NotInitialized { subsystem: "timer" }))
}

/// Hardware timer interrupt entry point. Runs at whatever IRQL the
/// platform's timer vector is wired to (at or above [`irql::TIMER`]) and
/// does only the minimum required before returning: enqueue a DPC that
/// will walk the timer list once IRQL drops back to `DISPATCH`.
pub fn on_tick_interrupt() {
    dpc::enqueue(run_expired_dpc);
}

/// DPC body: walk the timer list at the current tick and fire every timer
/// that has expired. Registered with [`crate::irq::dpc`] by
/// [`on_tick_interrupt`]; not normally called directly.
fn run_expired_dpc() {
    let now = crate::arch::timer::get_ticks();
    let (fired, fired_count) = match TIMER_LIST.with_mut(|list| list.lock().collect_expired(now)) {
        Some(result) => result,
        None => return,
    };
    for &(id, cb) in fired.iter().take(fired_count) {
        (cb)(id);
    }
}

/// Return the monotonic uptime in milliseconds since boot, derived from
/// the hardware tick counter and the configured tick frequency.
pub fn get_uptime_ms() -> u64 {
    tick_to_ns(crate::arch::timer::get_ticks()) / 1_000_000
}

/// Return the number of currently pending (active) timers.
pub fn pending_timer_count() -> usize {
    TIMER_LIST
        .with(|list| list.lock().pending_count())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_callback(_id: TimerId) {}

    #[test]
    fn deadline_timer_fires_once_and_is_removed() {
        let mut list = TimerList::new();
        let id = list.add(TimerKind::Deadline { at_tick: 100 }, test_callback).unwrap();
        assert_eq!(list.pending_count(), 1);

        let (fired, count) = list.collect_expired(50);
        assert_eq!(count, 0);
        assert_eq!(list.pending_count(), 1);
        let _ = fired;

        let (_fired, count) = list.collect_expired(150);
        assert_eq!(count, 1);
        assert_eq!(list.pending_count(), 0);

        // Already removed; cancelling again fails.
        assert!(list.cancel(id).is_err());
    }

    #[test]
    fn interval_timer_reschedules_after_firing() {
        let mut list = TimerList::new();
        let _id = list
            .add(
                TimerKind::Interval {
                    interval_ticks: 100,
                    last_ticked: 0,
                },
                test_callback,
            )
            .unwrap();

        let (_fired, count) = list.collect_expired(110);
        assert_eq!(count, 1);
        assert_eq!(list.pending_count(), 1);

        // Not due again immediately.
        let (_fired, count) = list.collect_expired(150);
        assert_eq!(count, 0);

        // Due again once a full interval has passed since the last fire.
        let (_fired, count) = list.collect_expired(210);
        assert_eq!(count, 1);
    }

    #[test]
    fn interval_timer_absorbs_overshoot_without_firing_twice_in_one_pass() {
        let mut list = TimerList::new();
        list.add(
            TimerKind::Interval {
                interval_ticks: 10,
                last_ticked: 0,
            },
            test_callback,
        )
        .unwrap();

        // Five intervals' worth of overshoot in one tick: fires once, but
        // last_ticked catches all the way up so it doesn't fire five times
        // in a row on the next few ticks either.
        let (_fired, count) = list.collect_expired(55);
        assert_eq!(count, 1);
        let (_fired, count) = list.collect_expired(56);
        assert_eq!(count, 0);
    }

    #[test]
    fn cancel_nonexistent_timer_fails() {
        let mut list = TimerList::new();
        assert!(list.cancel(TimerId(999)).is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        // The zero check happens before the list is touched, so this is
        // safe to call even though `TIMER_LIST` is never `init`-ed in unit
        // tests.
        assert!(create_interval_timer(0, test_callback).is_err());
    }

    #[test]
    fn tick_to_ns_matches_frequency() {
        set_tick_frequency(1_000_000_000);
        assert_eq!(tick_to_ns(1), 1);
        assert_eq!(tick_to_ns(1_000), 1_000);

        set_tick_frequency(1_000);
        assert_eq!(tick_to_ns(1), 1_000_000);
    }

    #[test]
    fn time_frame_to_tick_matches_frequency() {
        set_tick_frequency(1_000_000_000);
        assert_eq!(time_frame_to_tick(1), 1_000);
        set_tick_frequency(1_000_000_000);
    }

    #[test]
    #[should_panic(expected = "exceeds the 1 GHz ceiling")]
    fn set_tick_frequency_above_1ghz_panics() {
        set_tick_frequency(2_000_000_000);
    }

    #[test]
    fn tick_to_ns_saturates_instead_of_overflowing() {
        set_tick_frequency(1);
        assert_eq!(tick_to_ns(u64::MAX), u64::MAX);
        set_tick_frequency(1_000_000_000);
    }

    #[test]
    fn timer_id_uniqueness() {
        let id1 = TimerId::next();
        let id2 = TimerId::next();
        assert_ne!(id1, id2);
    }
}
