//! Timing primitive (spec §4.7): `nanosleep` and `now`.
//!
//! No platform timer API or MMCSS/real-time scheduling class is used here —
//! spec §4.7 describes the contract in prose, not an implementation, and
//! the portable default is a coarse `thread::sleep` for the bulk of the
//! wait plus a tight spin for the final sub-millisecond window, mirroring
//! the shape of the original `nanosleep.cpp` / `win32mmtimer.hpp` without
//! depending on a platform crate.

use std::time::{Duration, Instant};

/// Below this remaining duration, `nanosleep` stops calling `thread::sleep`
/// (whose OS-scheduler wakeup granularity is typically 1-15ms) and spins
/// instead, trading CPU for the sub-millisecond accuracy spec §4.7 asks for.
const SPIN_THRESHOLD: Duration = Duration::from_micros(800);

/// High-resolution monotonic clock reading.
pub fn now() -> Instant {
    Instant::now()
}

/// Block the calling thread for at least `duration`. Returns immediately
/// for a zero duration.
pub fn nanosleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    let deadline = Instant::now() + duration;
    if duration > SPIN_THRESHOLD {
        std::thread::sleep(duration - SPIN_THRESHOLD);
    }
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

/// Opt into OS-level real-time/responsiveness scheduling for the calling
/// thread, if the embedder's platform supports it. The portable default
/// provided here does nothing beyond logging; embedders targeting a
/// specific platform are expected to call their own MMCSS/`sched_setscheduler`
/// equivalent instead and treat this as a no-op marker.
pub fn enable_thread_responsiveness() {
    log::debug!("enable_thread_responsiveness: portable default has no platform scheduling hook");
}

/// Counterpart to [`enable_thread_responsiveness`].
pub fn disable_thread_responsiveness() {
    log::debug!("disable_thread_responsiveness: portable default has no platform scheduling hook");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanosleep_waits_at_least_the_requested_duration() {
        let requested = Duration::from_millis(2);
        let start = Instant::now();
        nanosleep(requested);
        assert!(start.elapsed() >= requested);
    }

    #[test]
    fn nanosleep_zero_returns_immediately() {
        let start = Instant::now();
        nanosleep(Duration::ZERO);
        assert!(start.elapsed() < Duration::from_millis(5));
    }
}
