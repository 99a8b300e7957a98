//! Wire parser (C5).
//!
//! Branchless, zero-copy parse of the BBO datagram payload into a pool
//! slot. All multi-byte fields are big-endian; reads are expressed as
//! unaligned loads at fixed byte offsets (`u32::from_be_bytes` on a sliced
//! array) rather than pointer casts that assume alignment, per the
//! "raw pointer arithmetic through packet headers" design note.

use crate::bbo::{BboRecord, FLAG_HAS_HW_TIMESTAMPS};
use crate::pool::SlotPool;

/// Minimum payload length: symbol + bid + bid_shares + ask + ask_shares + spread.
pub const MIN_PAYLOAD_LEN: usize = 28;
/// Full payload length including the four hardware-timestamp words.
pub const FULL_PAYLOAD_LEN: usize = 44;

const OFF_SYMBOL: usize = 0;
const OFF_BID_RAW: usize = 8;
const OFF_BID_SHARES: usize = 12;
const OFF_ASK_RAW: usize = 16;
const OFF_ASK_SHARES: usize = 20;
const OFF_SPREAD_RAW: usize = 24;
const OFF_TIMESTAMPS: usize = 28;

/// The wire-format scalars are fixed-point, scaled by this factor.
/// Multiplication is used instead of division per spec.md §4.5, and the
/// constant must stay a compile-time constant.
const PRICE_SCALE: f64 = 1e-4;

#[inline(always)]
fn read_be_u32(payload: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&payload[offset..offset + 4]);
    u32::from_be_bytes(buf)
}

/// Parses `payload` into a freshly acquired slot from `pool`. Returns
/// `None` (and leaves the pool's head counter unadvanced) on a truncated
/// payload. Never validates the symbol — see [`crate::bbo::BboRecord::is_valid_bbo`]
/// for the cold-path predicate.
#[inline]
pub fn parse_bbo<'a>(
    payload: &[u8],
    pool: &'a SlotPool,
    timestamp_ns: u64,
    sequence: u32,
) -> Option<&'a mut BboRecord> {
    if crate::primitives::unlikely(payload.len() < MIN_PAYLOAD_LEN) {
        return None;
    }

    let slot = pool.acquire();

    slot.set_symbol(&payload[OFF_SYMBOL..OFF_SYMBOL + 8]);

    let bid_raw = read_be_u32(payload, OFF_BID_RAW) as f64;
    let ask_raw = read_be_u32(payload, OFF_ASK_RAW) as f64;
    let spread_raw = read_be_u32(payload, OFF_SPREAD_RAW) as f64;

    slot.bid_price = bid_raw * PRICE_SCALE;
    slot.ask_price = ask_raw * PRICE_SCALE;
    slot.spread = spread_raw * PRICE_SCALE;
    slot.bid_shares = read_be_u32(payload, OFF_BID_SHARES);
    slot.ask_shares = read_be_u32(payload, OFF_ASK_SHARES);

    slot.timestamp_ns = timestamp_ns;
    slot.sequence = sequence;
    slot.valid = 1;
    slot.flags = if payload.len() >= FULL_PAYLOAD_LEN {
        FLAG_HAS_HW_TIMESTAMPS
    } else {
        0
    };

    Some(slot)
}

/// Cold-path extraction of the hardware-timestamp annex. Only valid to
/// call when the record's [`FLAG_HAS_HW_TIMESTAMPS`] bit is set; the
/// caller must retain the original payload bytes since the annex is not
/// stored in the 64-byte record itself.
pub fn extract_hw_timestamps(payload: &[u8]) -> Option<crate::bbo::HwTimestamps> {
    if payload.len() < FULL_PAYLOAD_LEN {
        return None;
    }
    Some(crate::bbo::HwTimestamps {
        t1: read_be_u32(payload, OFF_TIMESTAMPS),
        t2: read_be_u32(payload, OFF_TIMESTAMPS + 4),
        t3: read_be_u32(payload, OFF_TIMESTAMPS + 8),
        t4: read_be_u32(payload, OFF_TIMESTAMPS + 12),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_payload() -> Vec<u8> {
        // "AAPL    " + bid=150.0000 + bid_shares=100 + ask=150.1000 +
        // ask_shares=100 + spread=1.0000, all scaled by 1e4.
        let mut v = Vec::new();
        v.extend_from_slice(b"AAPL    ");
        v.extend_from_slice(&1_500_000u32.to_be_bytes());
        v.extend_from_slice(&100u32.to_be_bytes());
        v.extend_from_slice(&1_501_000u32.to_be_bytes());
        v.extend_from_slice(&100u32.to_be_bytes());
        v.extend_from_slice(&10_000u32.to_be_bytes());
        v
    }

    #[test]
    fn minimal_parse_matches_scenario_1() {
        let pool = SlotPool::new(16).unwrap();
        let payload = minimal_payload();
        assert_eq!(payload.len(), MIN_PAYLOAD_LEN);

        let slot = parse_bbo(&payload, &pool, 42, 7).expect("parse succeeds");
        assert_eq!(slot.get_symbol(), "AAPL");
        assert_eq!(slot.bid_price, 150.0);
        assert_eq!(slot.bid_shares, 100);
        assert_eq!(slot.ask_price, 150.1);
        assert_eq!(slot.ask_shares, 100);
        assert_eq!(slot.spread, 1.0);
        assert_eq!(slot.valid, 1);
        assert_eq!(slot.flags, 0);
        assert_eq!(slot.timestamp_ns, 42);
        assert_eq!(slot.sequence, 7);
    }

    #[test]
    fn full_parse_with_timestamps_matches_scenario_2() {
        let pool = SlotPool::new(16).unwrap();
        let mut payload = minimal_payload();
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&5u32.to_be_bytes());
        payload.extend_from_slice(&10u32.to_be_bytes());
        payload.extend_from_slice(&20u32.to_be_bytes());
        assert_eq!(payload.len(), FULL_PAYLOAD_LEN);

        let slot = parse_bbo(&payload, &pool, 100, 1).expect("parse succeeds");
        assert_eq!(slot.flags, FLAG_HAS_HW_TIMESTAMPS);

        let hw = extract_hw_timestamps(&payload).expect("annex present");
        assert_eq!(hw, crate::bbo::HwTimestamps { t1: 1, t2: 5, t3: 10, t4: 20 });
        assert!((hw.latency_a_us() - 0.032).abs() < 1e-9);
        assert!((hw.latency_b_us() - 0.080).abs() < 1e-9);
    }

    #[test]
    fn short_payload_is_rejected_without_advancing_pool_head() {
        let pool = SlotPool::new(16).unwrap();
        let payload = vec![0u8; 27];
        assert!(parse_bbo(&payload, &pool, 0, 0).is_none());
        assert_eq!(pool.current_head(), 0);
    }

    #[test]
    fn length_in_28_to_43_range_clears_hw_timestamp_flag() {
        let pool = SlotPool::new(16).unwrap();
        let mut payload = minimal_payload();
        payload.extend_from_slice(&[0u8; 10]); // 38 bytes total, still < 44
        let slot = parse_bbo(&payload, &pool, 0, 0).expect("parse succeeds");
        assert_eq!(slot.flags & FLAG_HAS_HW_TIMESTAMPS, 0);
    }

    #[test]
    fn oversized_payload_only_uses_first_44_bytes() {
        let pool = SlotPool::new(16).unwrap();
        let mut payload = minimal_payload();
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&5u32.to_be_bytes());
        payload.extend_from_slice(&10u32.to_be_bytes());
        payload.extend_from_slice(&20u32.to_be_bytes());
        payload.extend_from_slice(&[0xffu8; 100]); // trailing garbage
        let slot = parse_bbo(&payload, &pool, 0, 0).expect("parse succeeds");
        assert_eq!(slot.flags, FLAG_HAS_HW_TIMESTAMPS);
        assert_eq!(slot.bid_price, 150.0);
    }

    #[test]
    fn bid_price_is_bit_exact_given_the_chosen_multiplier() {
        let pool = SlotPool::new(16).unwrap();
        let payload = minimal_payload();
        let slot = parse_bbo(&payload, &pool, 0, 0).unwrap();
        assert_eq!(slot.bid_price, 1_500_000u32 as f64 * PRICE_SCALE);
    }
}
