//! Receive engine (C7).
//!
//! Busy-polls the NIC in bursts, prefetches upcoming packets, walks
//! Ethernet→IPv4→UDP headers, filters on destination port, parses into a
//! pool slot, and publishes — all on a single thread with zero syscalls,
//! locks, or allocations once the loop starts (spec.md §4.7, §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bbo::FLAG_SYNTHETIC;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::InitError;
use crate::nic::{NicPort, PacketHandle};
use crate::parser::{parse_bbo, MIN_PAYLOAD_LEN};
use crate::pool::SlotPool;
use crate::primitives::{prefetch_l1, prefetch_l2, unlikely};
use crate::ring::RingPublisher;
use crate::stats::Counters;

/// Deliberate floor, well below the framework's typical 64-256 maximum.
/// Smaller bursts reduce worst-case batch service time and thus tail
/// latency; they do not help throughput (spec.md §4.7).
pub const BURST_SIZE: usize = 32;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_UDP: u8 = 17;
const ETH_HEADER_LEN: usize = 14;
const ETH_ETHERTYPE_OFFSET: usize = 12;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IP_PROTO_OFFSET: usize = 9;
const UDP_HEADER_LEN: usize = 8;
const UDP_DST_PORT_OFFSET: usize = 2;
const UDP_LEN_OFFSET: usize = 4;

/// `Uninit` precedes any Rust value of [`ReceiveEngine`] existing at all —
/// Rust has no partially-constructed objects, so it is never observed
/// through [`ReceiveEngine::state`]; it is named here only so the full
/// state machine matches spec.md's `Uninit → Initialized → Warming →
/// Running → Stopped` table. `ReceiveEngine::new` is the `Uninit →
/// Initialized` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninit,
    Initialized,
    Warming,
    Running,
    Stopped,
}

pub struct ReceiveEngine<N: NicPort> {
    nic: N,
    pool: SlotPool,
    clock: Clock,
    publisher: RingPublisher,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    config: EngineConfig,
    sequence: u32,
    state: EngineState,
    /// Set only while replaying synthetic warm-up traffic, so the parsed
    /// records get tagged [`FLAG_SYNTHETIC`] before publish.
    synthetic_mode: bool,
}

impl<N: NicPort> ReceiveEngine<N> {
    /// Runs device bring-up (`dev_start`, `promiscuous_enable`), locks the
    /// process's memory into RAM, allocates the slot pool, calibrates the
    /// clock, and opens the ring. Any failure here is fatal per spec.md §7
    /// — the engine refuses to reach `Running` — except the two
    /// warning-only cases (`promiscuous_enable`, memory locking), which are
    /// logged and carried forward.
    pub fn new(
        mut nic: N,
        config: EngineConfig,
        counters: Arc<Counters>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, InitError> {
        nic.dev_start()?;
        if let Err(e) = nic.promiscuous_enable() {
            // Link-down / promiscuous-denied is a warning, not fatal
            // (spec.md §4.7 "Failure semantics").
            log::warn!("promiscuous mode not enabled: {e}");
        }
        if let Err(e) = lock_memory() {
            // mlockall denied is a warning, not fatal (spec.md §7 error
            // taxonomy), matching promiscuous_enable above.
            log::warn!("mlockall failed, memory may be paged out: {e}");
        }

        let pool = SlotPool::new(config.pool_capacity)?;
        let clock = Clock::calibrate(crate::clock::DEFAULT_CALIBRATION_WINDOW)?;
        let publisher = RingPublisher::new(&config.shm_name, config.ring_capacity)?;

        Ok(ReceiveEngine {
            nic,
            pool,
            clock,
            publisher,
            counters,
            stop,
            config,
            sequence: 0,
            state: EngineState::Initialized,
            synthetic_mode: false,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Cache-touch plus synthetic-traffic warm-up (spec.md §4.7). No-op
    /// (beyond the state transition) when `warmup_packets == 0`.
    pub fn warm_up(&mut self) {
        self.state = EngineState::Warming;

        // 1. Cache touch: prime the slot pool and pull clock constants
        // into cache via a volatile sink.
        self.pool.warm_cache();
        let sink = self.clock.cycles_to_ns(crate::clock::rdtsc_serialized());
        std::hint::black_box(sink);

        // 2. Synthetic traffic: exercise the exact code paths the hot
        // loop will execute, priming the branch predictor.
        self.synthetic_mode = true;
        for _ in 0..self.config.warmup_packets {
            let frame = build_synthetic_frame(self.config.udp_port);
            self.process_frame(&frame);
        }
        self.synthetic_mode = false;

        self.state = EngineState::Running;
    }

    /// Busy-polls the NIC until `stop` is set. No wait, no yield, no pause
    /// — a hot spin (spec.md §4.7 step list).
    pub fn run(&mut self) {
        debug_assert_eq!(self.state, EngineState::Running);

        let mut handles = [PacketHandle(0); BURST_SIZE];
        while !self.stop.load(Ordering::Relaxed) {
            let count = self.nic.rx_burst(self.config.queue, &mut handles);
            if count == 0 {
                continue;
            }

            for i in 0..count {
                if i + 1 < count {
                    prefetch_l1(self.nic.packet_data(handles[i + 1]).as_ptr());
                }
                if i + 2 < count {
                    prefetch_l2(self.nic.packet_data(handles[i + 2]).as_ptr());
                }
                self.process_packet(handles[i]);
                self.nic.packet_free(handles[i]);
            }
        }

        self.state = EngineState::Stopped;
    }

    /// Processes one NIC-owned packet handle (spec.md §4.7 `process_packet`).
    #[inline]
    fn process_packet(&mut self, handle: PacketHandle) {
        let ts = crate::clock::rdtsc_unserialized();
        let frame_ptr: *const [u8] = self.nic.packet_data(handle);
        // SAFETY: `frame` does not outlive this call; `self.nic` is not
        // mutated again until after `frame`'s last use below.
        let frame: &[u8] = unsafe { &*frame_ptr };
        self.process_frame_with_timestamp(frame, ts);
    }

    /// Shared by both the real hot path and synthetic warm-up traffic.
    #[inline]
    fn process_frame(&mut self, frame: &[u8]) {
        let ts = crate::clock::rdtsc_unserialized();
        self.process_frame_with_timestamp(frame, ts);
    }

    #[inline]
    fn process_frame_with_timestamp(&mut self, frame: &[u8], ts: u64) {
        if unlikely(frame.len() < ETH_HEADER_LEN + IPV4_MIN_HEADER_LEN + UDP_HEADER_LEN) {
            return;
        }

        let ethertype = u16::from_be_bytes([
            frame[ETH_ETHERTYPE_OFFSET],
            frame[ETH_ETHERTYPE_OFFSET + 1],
        ]);
        if unlikely(ethertype != ETHERTYPE_IPV4) {
            return;
        }

        let ip_start = ETH_HEADER_LEN;
        let protocol = frame[ip_start + IP_PROTO_OFFSET];
        if unlikely(protocol != IP_PROTO_UDP) {
            return;
        }

        let ihl = ((frame[ip_start] & 0x0F) as usize) * 4;
        let udp_start = ip_start + ihl;
        if unlikely(frame.len() < udp_start + UDP_HEADER_LEN) {
            return;
        }

        let dst_port = u16::from_be_bytes([
            frame[udp_start + UDP_DST_PORT_OFFSET],
            frame[udp_start + UDP_DST_PORT_OFFSET + 1],
        ]);
        if unlikely(dst_port != self.config.udp_port) {
            return;
        }

        let dgram_len = u16::from_be_bytes([
            frame[udp_start + UDP_LEN_OFFSET],
            frame[udp_start + UDP_LEN_OFFSET + 1],
        ]) as usize;
        if unlikely(dgram_len < UDP_HEADER_LEN) {
            return;
        }

        let payload_start = udp_start + UDP_HEADER_LEN;
        let claimed_len = dgram_len - UDP_HEADER_LEN;
        // A malformed `dgram_len` larger than the actual frame is not
        // specified upstream (spec.md §9 Open Question); we clip to the
        // frame's actual bounds rather than reading past it. See
        // DESIGN.md for the recorded decision.
        let payload_end = (payload_start + claimed_len).min(frame.len());
        if unlikely(payload_end <= payload_start) {
            return;
        }
        let payload = &frame[payload_start..payload_end];

        self.counters.inc_received();
        let ts_ns = self.clock.cycles_to_ns(ts);
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        match parse_bbo(payload, &self.pool, ts_ns, sequence) {
            Some(slot) => {
                if self.synthetic_mode {
                    slot.flags |= FLAG_SYNTHETIC;
                }
                self.counters.inc_processed();
                if !self.publisher.publish(slot) {
                    self.counters.inc_ring_full();
                }
            }
            None => {
                self.counters.inc_parse_errors();
            }
        }
    }
}

/// Locks all current and future process memory mappings into RAM
/// (spec.md §5 "Resource acquisition"), so the hot path never takes a
/// page fault. Best-effort: the caller logs and continues on failure,
/// same as `promiscuous_enable`.
#[cfg(unix)]
fn lock_memory() -> std::io::Result<()> {
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_memory() -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "mlockall is not available on this platform",
    ))
}

/// Builds a minimal in-memory Ethernet+IPv4+UDP frame carrying a 28-byte
/// BBO payload with symbol `"WARMUP  "`, for warm-up synthetic traffic
/// (spec.md §4.7).
fn build_synthetic_frame(udp_port: u16) -> Vec<u8> {
    let payload_len: u16 = MIN_PAYLOAD_LEN as u16;
    let udp_len = UDP_HEADER_LEN as u16 + payload_len;

    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + IPV4_MIN_HEADER_LEN + udp_len as usize);

    // Ethernet header: zeroed MACs, IPv4 ethertype.
    frame.extend_from_slice(&[0u8; 12]);
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    // Minimal IPv4 header: version 4, IHL 5 (20 bytes), protocol UDP.
    frame.push(0x45);
    frame.push(0x00);
    frame.extend_from_slice(&[0u8; 7]); // total_length/id/flags/ttl, unused by the filter
    frame.push(IP_PROTO_UDP);
    frame.extend_from_slice(&[0u8; 2]); // checksum, unchecked by the filter
    frame.extend_from_slice(&[0u8; 8]); // src/dst IP, unused by the filter

    // UDP header.
    frame.extend_from_slice(&0u16.to_be_bytes()); // src port
    frame.extend_from_slice(&udp_port.to_be_bytes());
    frame.extend_from_slice(&udp_len.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes()); // checksum

    // BBO payload: symbol "WARMUP  ", fake prices.
    frame.extend_from_slice(b"WARMUP  ");
    frame.extend_from_slice(&1_000_000u32.to_be_bytes()); // bid 100.0000
    frame.extend_from_slice(&10u32.to_be_bytes()); // bid_shares
    frame.extend_from_slice(&1_000_500u32.to_be_bytes()); // ask 100.0500
    frame.extend_from_slice(&10u32.to_be_bytes()); // ask_shares
    frame.extend_from_slice(&500u32.to_be_bytes()); // spread 0.0500

    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nic::MockNicPort;

    fn test_engine(udp_port: u16) -> ReceiveEngine<MockNicPort> {
        let counters = Counters::new();
        let stop = Arc::new(AtomicBool::new(false));
        let config = EngineConfig {
            port: 0,
            queue: 0,
            udp_port,
            core: None,
            shm_name: format!("engine_test_{}", std::process::id()),
            warmup_packets: 0,
            skip_warmup: true,
            benchmark: false,
            pool_capacity: 16,
            ring_capacity: 16,
        };
        ReceiveEngine::new(MockNicPort::new(), config, counters, stop).expect("engine init")
    }

    fn ipv6_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 64];
        frame[12] = 0x86;
        frame[13] = 0xDD;
        frame
    }

    #[test]
    fn wrong_ethertype_is_filtered_before_counting_received() {
        let mut engine = test_engine(12345);
        engine.process_frame(&ipv6_frame());
        assert_eq!(engine.counters.snapshot().packets_received, 0);
    }

    #[test]
    fn wrong_udp_port_is_filtered_without_counter_change() {
        let mut engine = test_engine(12345);
        let frame = build_synthetic_frame(9999);
        engine.process_frame(&frame);
        let snap = engine.counters.snapshot();
        assert_eq!(snap.packets_received, 0);
        assert_eq!(snap.packets_processed, 0);
    }

    #[test]
    fn matching_frame_is_received_and_processed() {
        let mut engine = test_engine(12345);
        let frame = build_synthetic_frame(12345);
        engine.process_frame(&frame);
        let snap = engine.counters.snapshot();
        assert_eq!(snap.packets_received, 1);
        assert_eq!(snap.packets_processed, 1);
        assert_eq!(snap.parse_errors, 0);
    }

    #[test]
    fn short_payload_increments_parse_errors_without_advancing_pool() {
        let mut engine = test_engine(12345);
        let mut frame = build_synthetic_frame(12345);
        // Truncate the frame so the UDP payload is only 10 bytes.
        frame.truncate(ETH_HEADER_LEN + IPV4_MIN_HEADER_LEN + UDP_HEADER_LEN + 10);
        let head_before = engine.pool.current_head();
        engine.process_frame(&frame);
        assert_eq!(engine.counters.snapshot().parse_errors, 1);
        assert_eq!(engine.pool.current_head(), head_before);
    }

    #[test]
    fn warm_up_transitions_to_running_and_marks_synthetic_flag() {
        let mut engine = test_engine(12345);
        engine.config.warmup_packets = 3;
        engine.warm_up();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.counters.snapshot().packets_processed, 3);
    }

    #[test]
    fn ring_full_scenario_matches_spec_scenario_6() {
        let mut engine = test_engine(12345);
        // Ring capacity is 16; publish 17 matching frames.
        for _ in 0..17 {
            let frame = build_synthetic_frame(12345);
            engine.process_frame(&frame);
        }
        let snap = engine.counters.snapshot();
        assert_eq!(snap.packets_processed, 17);
        assert_eq!(snap.ring_buffer_full, 1);
    }
}
