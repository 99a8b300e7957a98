//! Cycle-counter clock (C2).
//!
//! Calibrates the CPU's invariant cycle counter against the OS wall clock
//! once at startup, then converts cycles to nanoseconds with a pair of
//! scalar multiplies — no syscalls, no division, on the hot path.

use std::time::{Duration, Instant};

use crate::error::InitError;

/// Default calibration window. Long enough that scheduler jitter on the
/// calibrating thread doesn't dominate the cycles/ns estimate.
pub const DEFAULT_CALIBRATION_WINDOW: Duration = Duration::from_millis(10);

/// Reads the cycle counter without waiting for prior instructions to
/// retire. Used on the hot path, where a few cycles of jitter are cheaper
/// than draining the pipeline on every packet.
#[inline(always)]
pub fn rdtsc_unserialized() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        // No invariant TSC equivalent off x86_64; fall back to a coarse
        // monotonic counter so the crate still builds and the rest of the
        // pipeline has a (non-comparable-across-cores) timestamp source.
        coarse_fallback_cycles()
    }
}

/// Reads the cycle counter with `CPUID`-style serialization so the read
/// cannot complete out of order with surrounding instructions. Used only
/// for calibration and diagnostic reads, never on the hot path.
#[inline(always)]
pub fn rdtsc_serialized() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        let mut aux: u32 = 0;
        core::arch::x86_64::__rdtscp(&mut aux)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        coarse_fallback_cycles()
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn coarse_fallback_cycles() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Calibrated conversion between CPU cycles and nanoseconds.
///
/// `ns_per_cycle` and `cycles_per_ns` are written once during
/// [`Clock::calibrate`] and are read-only afterwards (invariant 6 in
/// spec.md §3).
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    ns_per_cycle: f64,
    cycles_per_ns: f64,
    base_cycles: u64,
}

impl Clock {
    /// Blocks for `window`, measuring the cycle delta across a monotonic
    /// wall-clock sleep of that length, and derives the cycle/ns ratio.
    ///
    /// The caller is responsible for pinning to a core with a stable
    /// (non-scaling) frequency; see spec.md §4.2. If that assumption does
    /// not hold, the resulting timestamps remain monotonic per-core but
    /// are not comparable across cores — an operator misconfiguration,
    /// not a failure this function can detect.
    pub fn calibrate(window: Duration) -> Result<Self, InitError> {
        if window.is_zero() {
            return Err(InitError::CalibrationFailed(
                "calibration window must be non-zero",
            ));
        }

        let start_cycles = rdtsc_serialized();
        let start_wall = Instant::now();
        std::thread::sleep(window);
        let elapsed = start_wall.elapsed();
        let end_cycles = rdtsc_serialized();

        let cycle_delta = end_cycles.wrapping_sub(start_cycles);
        if cycle_delta == 0 {
            return Err(InitError::CalibrationFailed(
                "cycle counter did not advance during calibration window",
            ));
        }

        let ns_per_cycle = elapsed.as_secs_f64() * 1e9 / cycle_delta as f64;
        if !(ns_per_cycle > 0.0) || !ns_per_cycle.is_finite() {
            return Err(InitError::CalibrationFailed(
                "derived ns_per_cycle is not a positive finite number",
            ));
        }

        Ok(Clock {
            ns_per_cycle,
            cycles_per_ns: 1.0 / ns_per_cycle,
            base_cycles: end_cycles,
        })
    }

    /// `ns_per_cycle > 0` always holds for a successfully calibrated clock
    /// (invariant 6 in spec.md §3).
    #[inline]
    pub fn ns_per_cycle(&self) -> f64 {
        self.ns_per_cycle
    }

    /// Converts a cycle count to nanoseconds.
    #[inline(always)]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (cycles as f64 * self.ns_per_cycle) as u64
    }

    /// Converts nanoseconds to a cycle count.
    #[inline(always)]
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        (ns as f64 * self.cycles_per_ns) as u64
    }

    /// Approximates current time by converting a fresh serialized cycle
    /// read relative to the calibration baseline. Cold-path only.
    pub fn now_ns(&self) -> u64 {
        let cycles = rdtsc_serialized().wrapping_sub(self.base_cycles);
        self.cycles_to_ns(cycles)
    }
}
