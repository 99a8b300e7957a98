//! Ring publisher (C6).
//!
//! A single-producer interface to a cross-process SPSC ring living in a
//! POSIX shared-memory segment. The producer never blocks: `try_publish`
//! returns `false` when the ring is full and the caller counts the drop.
//!
//! The raw `shm_open`/`ftruncate`/`mmap` sequence mirrors the teacher's own
//! raw-`libc`-mmap idiom in `linux/perf_event.rs::PerfBuilder::open`
//! (including the `MAP_FAILED` check and `Drop`-time `munmap`), just against
//! a named POSIX segment instead of a perf event fd.

use std::ffi::CString;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::bbo::BboRecord;
use crate::error::InitError;

/// Default downstream ring capacity (spec.md §6): 16384 records, ≈2 MiB
/// with the 16-byte-symbol record below.
pub const DEFAULT_RING_CAPACITY: usize = 16384;

const SENTINEL_INITIALIZED: u8 = 0xB8;

/// Downstream consumer-side record. Wider symbol field (16 bytes, not
/// 8) and a zeroed hardware-timestamp annex — spec.md §9 preserves the
/// original behavior of never forwarding hardware timestamps to the
/// consumer, even when the incoming payload carried them.
#[repr(C, align(64))]
#[derive(Clone, Copy, Debug)]
pub struct DownstreamBboRecord {
    pub symbol: [u8; 16],
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_shares: u32,
    pub ask_shares: u32,
    pub spread: f64,
    pub timestamp_ns: u64,
    pub sequence: u32,
    pub valid: u8,
    pub flags: u8,
    pub hw_timestamps: [u32; 4],
    _padding: [u8; 50],
}

const _DOWNSTREAM_SIZE_CHECK: () = assert!(std::mem::size_of::<DownstreamBboRecord>() == 128);

impl Default for DownstreamBboRecord {
    fn default() -> Self {
        DownstreamBboRecord {
            symbol: [0; 16],
            bid_price: 0.0,
            ask_price: 0.0,
            bid_shares: 0,
            ask_shares: 0,
            spread: 0.0,
            timestamp_ns: 0,
            sequence: 0,
            valid: 0,
            flags: 0,
            hw_timestamps: [0; 4],
            _padding: [0; 50],
        }
    }
}

impl DownstreamBboRecord {
    /// Widens a hot-path [`BboRecord`] into the consumer's wire shape.
    /// Space-pads the 8-byte symbol into 16 bytes and null-terminates the
    /// final byte; hardware timestamps are always zeroed here, never
    /// carried from the source payload (spec.md §9 Open Question).
    pub fn from_fast(fast: &BboRecord) -> Self {
        let mut symbol = [b' '; 16];
        symbol[..8].copy_from_slice(&fast.symbol);
        symbol[15] = 0;

        DownstreamBboRecord {
            symbol,
            bid_price: fast.bid_price,
            ask_price: fast.ask_price,
            bid_shares: fast.bid_shares,
            ask_shares: fast.ask_shares,
            spread: fast.spread,
            timestamp_ns: fast.timestamp_ns,
            sequence: fast.sequence,
            valid: fast.valid,
            flags: fast.flags,
            hw_timestamps: [0; 4],
            _padding: [0; 50],
        }
    }
}

/// Cache-line-padded atomic cursor, to keep producer and consumer cursors
/// on distinct cache lines (spec.md §3/§5).
#[repr(align(64))]
struct PaddedCursor {
    value: AtomicU64,
}

/// Fixed, placement-initializable layout imposed on a shared-memory
/// mapping. `sentinel` marks whether the mapping already holds an
/// initialized ring, per the "placement construction into a shared-memory
/// mapping" design note (spec.md §9): map memory, then write a descriptor
/// with a fixed layout and an explicit "already initialized" sentinel,
/// rather than relying on language-specific new-at-address semantics.
#[repr(C)]
struct RingHeader {
    sentinel: AtomicU8,
    _pad: [u8; 7],
    capacity: u64,
    mask: u64,
    head: PaddedCursor, // producer cursor
    tail: PaddedCursor, // consumer cursor
    dropped: AtomicU64,
}

/// A single-producer, single-consumer ring of [`DownstreamBboRecord`]
/// living in a shared-memory mapping. `try_publish` is the only write
/// operation exposed to the producer; there is no corresponding
/// `try_consume` here because the consumer is an external process (out of
/// scope per spec.md §1).
pub struct ShmRing {
    base: *mut u8,
    mapped_len: usize,
    header: *mut RingHeader,
    slots: *mut DownstreamBboRecord,
    capacity: usize,
}

unsafe impl Send for ShmRing {}
unsafe impl Sync for ShmRing {}

impl ShmRing {
    fn layout_len(capacity: usize) -> usize {
        std::mem::size_of::<RingHeader>() + capacity * std::mem::size_of::<DownstreamBboRecord>()
    }

    /// Opens an existing segment named `/bbo_ring_<name>`, or creates and
    /// placement-initializes a new one if absent. Stale segments from a
    /// prior crashed run are unlinked before creation.
    pub fn open_or_create(name: &str, capacity: usize) -> Result<Self, InitError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(InitError::InvalidConfig(
                "ring capacity must be a non-zero power of two",
            ));
        }

        let shm_name = format!("/bbo_ring_{name}");
        let c_name = CString::new(shm_name.clone())
            .map_err(|_| InitError::InvalidConfig("ring name contains a NUL byte"))?;
        let len = Self::layout_len(capacity);

        let (fd, created) = Self::open_existing_or_create(&c_name, &shm_name, len)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // The segment's file descriptor is no longer needed once mapped;
        // the mapping itself keeps the segment alive (spec.md §5).
        unsafe {
            libc::close(fd);
        }
        if base == libc::MAP_FAILED {
            return Err(InitError::RingSegment {
                name: shm_name,
                source: std::io::Error::last_os_error(),
            });
        }
        let base = base as *mut u8;
        let header = base as *mut RingHeader;

        if created {
            Self::placement_init(header, capacity);
        }

        Ok(ShmRing {
            base,
            mapped_len: len,
            header,
            slots: unsafe { base.add(std::mem::size_of::<RingHeader>()) as *mut DownstreamBboRecord },
            capacity,
        })
    }

    fn open_existing_or_create(
        c_name: &CString,
        shm_name: &str,
        len: usize,
    ) -> Result<(libc::c_int, bool), InitError> {
        let existing = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666) };
        if existing >= 0 {
            return Ok((existing, false));
        }

        // Absent (or stale/corrupt): unlink any leftover segment, then
        // create fresh.
        unsafe {
            libc::shm_unlink(c_name.as_ptr());
        }
        let created = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                0o666,
            )
        };
        if created < 0 {
            return Err(InitError::RingSegment {
                name: shm_name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }
        if unsafe { libc::ftruncate(created, len as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(created);
            }
            return Err(InitError::RingSegment {
                name: shm_name.to_string(),
                source: err,
            });
        }
        Ok((created, true))
    }

    fn placement_init(header: *mut RingHeader, capacity: usize) {
        unsafe {
            std::ptr::write(
                header,
                RingHeader {
                    sentinel: AtomicU8::new(0),
                    _pad: [0; 7],
                    capacity: capacity as u64,
                    mask: (capacity - 1) as u64,
                    head: PaddedCursor {
                        value: AtomicU64::new(0),
                    },
                    tail: PaddedCursor {
                        value: AtomicU64::new(0),
                    },
                    dropped: AtomicU64::new(0),
                },
            );
            (*header).sentinel.store(SENTINEL_INITIALIZED, Ordering::Release);
        }
    }

    /// Non-blocking publish. Returns `false` when the ring is full; never
    /// retries.
    #[inline]
    pub fn try_publish(&self, record: DownstreamBboRecord) -> bool {
        let header = unsafe { &*self.header };
        let head = header.head.value.load(Ordering::Relaxed);
        let tail = header.tail.value.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= self.capacity as u64 {
            header.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let index = (head & header.mask) as usize;
        unsafe {
            std::ptr::write(self.slots.add(index), record);
        }
        header.head.value.store(head + 1, Ordering::Release);
        true
    }

    #[inline]
    pub fn dropped_count(&self) -> u64 {
        unsafe { (*self.header).dropped.load(Ordering::Relaxed) }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for ShmRing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.mapped_len);
        }
    }
}

/// Owns the [`ShmRing`] and performs the narrow-symbol → wide-symbol
/// conversion plus counter bookkeeping that spec.md §4.6 assigns to the
/// publisher.
pub struct RingPublisher {
    ring: ShmRing,
}

impl RingPublisher {
    pub fn new(name: &str, capacity: usize) -> Result<Self, InitError> {
        Ok(RingPublisher {
            ring: ShmRing::open_or_create(name, capacity)?,
        })
    }

    /// Publishes `fast`, widening the symbol and zeroing hardware
    /// timestamps. Returns whatever the ring's `try_publish` returned.
    #[inline]
    pub fn publish(&self, fast: &BboRecord) -> bool {
        let downstream = DownstreamBboRecord::from_fast(fast);
        self.ring.try_publish(downstream)
    }

    #[inline]
    pub fn ring_buffer_full_count(&self) -> u64 {
        self.ring.dropped_count()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let salt = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("test_{tag}_{}_{}", std::process::id(), salt)
    }

    #[test]
    fn downstream_record_is_cache_aligned() {
        assert_eq!(std::mem::size_of::<DownstreamBboRecord>(), 128);
        assert_eq!(std::mem::align_of::<DownstreamBboRecord>(), 64);
    }

    #[test]
    fn from_fast_widens_symbol_and_zeroes_hw_timestamps() {
        let mut fast = BboRecord::default();
        fast.set_symbol(b"AAPL");
        fast.bid_price = 150.0;
        let wide = DownstreamBboRecord::from_fast(&fast);
        assert_eq!(&wide.symbol[..4], b"AAPL");
        assert_eq!(wide.symbol[15], 0);
        assert_eq!(wide.hw_timestamps, [0; 4]);
        assert_eq!(wide.bid_price, 150.0);
    }

    #[test]
    fn ring_full_after_capacity_publishes_counts_one_drop() {
        let name = unique_name("ring_full");
        let ring = ShmRing::open_or_create(&name, 16).expect("create ring");
        let record = DownstreamBboRecord::default();

        for _ in 0..16 {
            assert!(ring.try_publish(record));
        }
        assert!(!ring.try_publish(record));
        assert_eq!(ring.dropped_count(), 1);

        unsafe {
            let c_name = CString::new(format!("/bbo_ring_{name}")).unwrap();
            libc::shm_unlink(c_name.as_ptr());
        }
    }

    #[test]
    fn reopening_an_existing_segment_preserves_its_state() {
        let name = unique_name("reopen");
        {
            let ring = ShmRing::open_or_create(&name, 16).expect("create ring");
            assert!(ring.try_publish(DownstreamBboRecord::default()));
        }
        {
            let ring = ShmRing::open_or_create(&name, 16).expect("reopen ring");
            // The head cursor should have persisted across the reopen
            // since it lives in the shared segment, not the process.
            let header = unsafe { &*ring.header };
            assert_eq!(header.head.value.load(Ordering::Relaxed), 1);
        }
        unsafe {
            let c_name = CString::new(format!("/bbo_ring_{name}")).unwrap();
            libc::shm_unlink(c_name.as_ptr());
        }
    }
}
