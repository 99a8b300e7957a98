//! Init-time error taxonomy (spec.md §7).
//!
//! Hot-path failures never surface as `Result` — only as counters (see
//! `stats.rs`). This enum covers only the "Process: log to stderr, exit 1"
//! row of the error table: device binding, memory pool allocation, shared
//! memory mapping, and clock calibration failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to allocate slot pool: {0}")]
    PoolAllocation(&'static str),

    #[error("clock calibration failed: {0}")]
    CalibrationFailed(&'static str),

    #[error("failed to open or create shared-memory ring segment {name:?}: {source}")]
    RingSegment {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("NIC device initialization failed: {0}")]
    DeviceInit(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
