//! Shutdown signal handling (spec.md §6, §5 "Cancellation & timeouts").
//!
//! SIGINT/SIGTERM request graceful shutdown by setting a shared atomic
//! `stop` flag, which starts `false`. The next loop iteration observes it
//! with a relaxed load — ordering doesn't matter for shutdown — and exits.
//! Uses `signal_hook::flag::register`, the same primitive and the same
//! starts-`false`/`true`-means-stop polarity as
//! `linux/profiler.rs`'s three call sites (lines 46-49, 202, 205), rather
//! than a hand-rolled `libc::signal` call.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::InitError;

/// Installs SIGINT and SIGTERM handlers that set `stop` on delivery.
/// `stop` must start `false`; must be called once, before the receive
/// loop starts.
pub fn install_shutdown_handlers(stop: Arc<AtomicBool>) -> Result<(), InitError> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, stop.clone())
        .map_err(|_| InitError::DeviceInit("failed to install SIGINT handler"))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, stop)
        .map_err(|_| InitError::DeviceInit("failed to install SIGTERM handler"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn install_leaves_flag_clear_until_a_signal_arrives() {
        let stop = Arc::new(AtomicBool::new(false));
        install_shutdown_handlers(stop.clone()).expect("install handlers");
        assert!(!stop.load(Ordering::Relaxed));
    }

    #[test]
    fn raising_sigint_sets_the_flag() {
        let stop = Arc::new(AtomicBool::new(false));
        install_shutdown_handlers(stop.clone()).expect("install handlers");
        unsafe {
            libc::raise(signal_hook::consts::SIGINT);
        }
        assert!(stop.load(Ordering::Relaxed));
    }
}
