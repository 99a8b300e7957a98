//! BBO record (C3).
//!
//! A 64-byte, 64-byte-aligned value type. Layout is fixed and the struct is
//! bit-identical across instances — no endianness conversion on store, the
//! record lives in host order once parsed.

pub const SYMBOL_LEN: usize = 8;

/// Bit 0: payload carried optional hardware timestamps.
pub const FLAG_HAS_HW_TIMESTAMPS: u8 = 1 << 0;
/// Bit 1: record is synthetic/warm-up traffic, not a real market event.
pub const FLAG_SYNTHETIC: u8 = 1 << 1;
/// Bit 2: record is stale (reserved for downstream/cold-path use).
pub const FLAG_STALE: u8 = 1 << 2;

/// Best Bid/Offer record. `sizeof == alignof == 64` (spec.md §3 invariant 2).
#[repr(C, align(64))]
#[derive(Clone, Copy, Debug)]
pub struct BboRecord {
    pub symbol: [u8; SYMBOL_LEN],
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_shares: u32,
    pub ask_shares: u32,
    pub spread: f64,
    pub timestamp_ns: u64,
    pub sequence: u32,
    pub valid: u8,
    pub flags: u8,
    _padding: [u8; 10],
}

const _SIZE_CHECK: () = assert!(std::mem::size_of::<BboRecord>() == 64);
const _ALIGN_CHECK: () = assert!(std::mem::align_of::<BboRecord>() == 64);

impl Default for BboRecord {
    fn default() -> Self {
        BboRecord {
            symbol: [0; SYMBOL_LEN],
            bid_price: 0.0,
            ask_price: 0.0,
            bid_shares: 0,
            ask_shares: 0,
            spread: 0.0,
            timestamp_ns: 0,
            sequence: 0,
            valid: 0,
            flags: 0,
            _padding: [0; 10],
        }
    }
}

impl BboRecord {
    /// Zero every byte of the record.
    #[inline]
    pub fn clear(&mut self) {
        *self = BboRecord::default();
    }

    /// Copies up to [`SYMBOL_LEN`] bytes from `bytes`, space-padding the
    /// remainder. Extra bytes beyond `SYMBOL_LEN` are ignored.
    #[inline]
    pub fn set_symbol(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(SYMBOL_LEN);
        self.symbol[..n].copy_from_slice(&bytes[..n]);
        for b in &mut self.symbol[n..] {
            *b = b' ';
        }
    }

    /// Trims trailing spaces and NULs and returns the symbol as a `String`.
    /// Cold-path only (spec.md §4.3): never called from `process_packet`.
    pub fn get_symbol(&self) -> String {
        let trimmed_len = self
            .symbol
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        String::from_utf8_lossy(&self.symbol[..trimmed_len]).into_owned()
    }

    /// Cold-path validation: true iff every symbol byte is printable ASCII
    /// or space (spec.md §3 invariant 4).
    pub fn is_valid_bbo(&self) -> bool {
        self.valid == 1
            && self
                .symbol
                .iter()
                .all(|&b| b == b' ' || (0x20..=0x7e).contains(&b))
    }
}

/// Optional hardware-timestamp annex (spec.md §3). Extracted only by
/// cold-path code; never touched on the hot path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwTimestamps {
    pub t1: u32,
    pub t2: u32,
    pub t3: u32,
    pub t4: u32,
}

impl HwTimestamps {
    /// Cycles-to-microseconds scale used by the reference hardware clock:
    /// one tick equals 8 nanoseconds, so latency in microseconds is
    /// `delta_ticks * 8e-3`.
    const TICK_TO_US: f64 = 8e-3;

    /// First derived latency: the t1→t2 hop, in microseconds.
    pub fn latency_a_us(&self) -> f64 {
        self.t2.wrapping_sub(self.t1) as f64 * Self::TICK_TO_US
    }

    /// Second derived latency: the t3→t4 hop, in microseconds.
    pub fn latency_b_us(&self) -> f64 {
        self.t4.wrapping_sub(self.t3) as f64 * Self::TICK_TO_US
    }

    /// Third derived latency: the full t1→t4 span, in microseconds.
    pub fn latency_total_us(&self) -> f64 {
        self.t4.wrapping_sub(self.t1) as f64 * Self::TICK_TO_US
    }
}
