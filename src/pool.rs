//! Slot pool (C4).
//!
//! A contiguous, power-of-two-sized array of [`BboRecord`] slots, reused
//! cyclically. `acquire` always succeeds and indexes with a bitmask, never
//! modulo (spec.md §3 invariant 1). Backed, in priority order, by a
//! huge-page anonymous mapping, an explicit 2 MiB huge-page mapping, or a
//! 64-byte-aligned ordinary allocation — mirroring the raw-`libc::mmap`
//! idiom the teacher uses for its perf ring buffer
//! (`linux/perf_event.rs::PerfBuilder::open`), just with `MAP_HUGETLB`
//! flags layered on top instead of a perf fd.

use std::alloc::{alloc_zeroed, Layout};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::bbo::BboRecord;
use crate::error::InitError;
use crate::primitives::compiler_barrier;

pub const DEFAULT_POOL_SIZE: usize = 1024;

#[cfg(target_os = "linux")]
const MAP_HUGE_SHIFT: libc::c_int = 26; // MAP_HUGE_2MB encodes the page size in bits 26..31.
#[cfg(target_os = "linux")]
const MAP_HUGE_2MB: libc::c_int = 21 << MAP_HUGE_SHIFT;

/// Cache-line-padded acquire counter. Single-writer (the receive thread);
/// declared atomic with relaxed ordering purely so diagnostic readers can
/// inspect `current_head()` without synchronizing with the hot path.
#[repr(align(64))]
struct PaddedCounter {
    value: AtomicU32,
}

enum Backing {
    /// Anonymous mapping backed by the OS default huge-page size, or an
    /// explicit 2 MiB huge-page mapping.
    HugePage { ptr: *mut u8, len: usize },
    /// Ordinary 64-byte-aligned heap allocation.
    Ordinary { ptr: *mut u8, layout: Layout },
}

pub struct SlotPool {
    backing: Backing,
    slots: *mut BboRecord,
    capacity: usize,
    mask: u32,
    head: PaddedCounter,
    using_huge_pages: bool,
}

unsafe impl Send for SlotPool {}
unsafe impl Sync for SlotPool {}

impl SlotPool {
    /// Allocates a pool of `capacity` slots. `capacity` must be a power of
    /// two (spec.md §3 invariant 1). Pre-faults every slot by zeroing it,
    /// so no page fault can occur once the hot path starts.
    pub fn new(capacity: usize) -> Result<Self, InitError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(InitError::PoolAllocation(
                "slot pool capacity must be a non-zero power of two",
            ));
        }

        let byte_len = capacity * std::mem::size_of::<BboRecord>();
        let (backing, raw_ptr, using_huge_pages) = Self::allocate_backing(byte_len)?;

        let slots = raw_ptr as *mut BboRecord;
        let mut pool = SlotPool {
            backing,
            slots,
            capacity,
            mask: (capacity - 1) as u32,
            head: PaddedCounter {
                value: AtomicU32::new(0),
            },
            using_huge_pages,
        };

        // Pre-fault: write zero into every slot via `clear()`, exactly as
        // spec.md §4.4 requires, rather than relying on the allocator's
        // own zeroing (huge-page mmaps are zero-filled by the kernel, but
        // the ordinary-allocation fallback is not).
        for i in 0..capacity {
            unsafe {
                (*pool.slots.add(i)).clear();
            }
        }

        pool.warm_cache();
        Ok(pool)
    }

    #[cfg(target_os = "linux")]
    fn allocate_backing(byte_len: usize) -> Result<(Backing, *mut u8, bool), InitError> {
        // Try the OS default huge-page size first.
        if let Some(ptr) = Self::try_mmap_huge(byte_len, 0) {
            return Ok((Backing::HugePage { ptr, len: byte_len }, ptr, true));
        }
        // Fall back to an explicit 2 MiB huge-page hint.
        if let Some(ptr) = Self::try_mmap_huge(byte_len, MAP_HUGE_2MB) {
            return Ok((Backing::HugePage { ptr, len: byte_len }, ptr, true));
        }
        Self::allocate_ordinary(byte_len)
    }

    #[cfg(target_os = "linux")]
    fn try_mmap_huge(byte_len: usize, huge_flag: libc::c_int) -> Option<*mut u8> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                byte_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB | huge_flag,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            None
        } else {
            Some(ptr as *mut u8)
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn allocate_backing(byte_len: usize) -> Result<(Backing, *mut u8, bool), InitError> {
        Self::allocate_ordinary(byte_len)
    }

    fn allocate_ordinary(byte_len: usize) -> Result<(Backing, *mut u8, bool), InitError> {
        let layout = Layout::from_size_align(byte_len, 64)
            .map_err(|_| InitError::PoolAllocation("invalid slot pool layout"))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            // The system cannot meet its latency contract without
            // pre-allocated, resident memory (spec.md §4.4).
            std::process::abort();
        }
        Ok((Backing::Ordinary { ptr, layout }, ptr, false))
    }

    /// Returns the next slot in round-robin order. Always succeeds.
    #[inline(always)]
    pub fn acquire(&self) -> &mut BboRecord {
        let index = self.head.value.fetch_add(1, Ordering::Relaxed) & self.mask;
        unsafe { &mut *self.slots.add(index as usize) }
    }

    /// Touches one 8-byte word from each slot in ascending order, to
    /// pre-fault pages and prime the cache. A compiler barrier after the
    /// loop prevents the touches from being elided.
    pub fn warm_cache(&self) {
        let mut sink: u64 = 0;
        for i in 0..self.capacity {
            unsafe {
                let slot = self.slots.add(i) as *const u64;
                sink ^= std::ptr::read_volatile(slot);
            }
        }
        compiler_barrier();
        std::hint::black_box(sink);
    }

    #[inline]
    pub fn current_head(&self) -> u32 {
        self.head.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_using_huge_pages(&self) -> bool {
        self.using_huge_pages
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        match &self.backing {
            Backing::HugePage { ptr, len } => unsafe {
                libc::munmap(*ptr as *mut libc::c_void, *len);
            },
            Backing::Ordinary { ptr, layout } => unsafe {
                std::alloc::dealloc(*ptr, *layout);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_capacity() {
        assert!(SlotPool::new(3).is_err());
        assert!(SlotPool::new(0).is_err());
    }

    #[test]
    fn acquired_slots_are_aligned_and_sized() {
        let pool = SlotPool::new(16).unwrap();
        let slot = pool.acquire();
        assert_eq!(std::mem::size_of_val(slot), 64);
        assert_eq!((slot as *const BboRecord as usize) % 64, 0);
    }

    #[test]
    fn acquire_advances_in_round_robin_order() {
        let pool = SlotPool::new(4).unwrap();
        let first = pool.acquire() as *mut BboRecord;
        let second = pool.acquire() as *mut BboRecord;
        let third = pool.acquire() as *mut BboRecord;
        unsafe {
            assert_eq!(second, first.add(1));
            assert_eq!(third, first.add(2));
        }
    }

    #[test]
    fn pool_wraps_after_capacity_acquires() {
        let pool = SlotPool::new(1024).unwrap();
        let first = pool.acquire() as *mut BboRecord;
        for _ in 0..1023 {
            pool.acquire();
        }
        let wrapped = pool.acquire() as *mut BboRecord;
        assert_eq!(first, wrapped);
    }

    #[test]
    fn freshly_allocated_pool_is_all_zero() {
        let pool = SlotPool::new(8).unwrap();
        let slot = pool.acquire();
        assert_eq!(slot.symbol, [0u8; 8]);
        assert_eq!(slot.valid, 0);
    }

    #[test]
    fn current_head_reflects_acquire_count() {
        let pool = SlotPool::new(8).unwrap();
        assert_eq!(pool.current_head(), 0);
        pool.acquire();
        pool.acquire();
        assert_eq!(pool.current_head(), 2);
    }
}
