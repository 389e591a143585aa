//! A page-mapped circular byte buffer with two virtual copies of the same
//! backing pages, so that a read or write of up to `capacity` bytes starting
//! anywhere in the buffer is always a single contiguous range — no caller
//! ever has to special-case a wraparound.
//!
//! This is the single-producer/single-consumer transport between Ingress
//! and Egress (see `channel`). The four operations below map directly onto
//! its contract: `reserve`/`commit` advance the write side, `peek`/`release`
//! advance the read side, and nothing here is itself thread-safe — callers
//! serialize access with the mutex in `channel::Region`.

mod os;

use std::io;

fn page_round(len: usize) -> usize {
    let page = os::page_size();
    (len + page - 1) / page * page
}

/// Double-mapped circular byte buffer.
///
/// `head` and `tail` are monotonically increasing byte counters rather than
/// values wrapped into `0..capacity`; the actual ring offset is always the
/// counter modulo `capacity`. `fill = tail - head` is therefore always
/// available without a separate field, and can never exceed `capacity` as
/// long as every `commit` is preceded by a `reserve` for the same length.
pub struct Vrb {
    ptr: *mut u8,
    capacity: usize,
    head: u64,
    tail: u64,
}

// The buffer's pages are allocated once and only ever accessed through the
// exclusive-or-shared borrow rules enforced by `channel::Region`'s mutex;
// the raw pointer itself carries no thread affinity.
unsafe impl Send for Vrb {}

impl Vrb {
    /// Allocates a new buffer of at least `min_capacity` bytes, rounded up
    /// to a whole number of pages.
    pub fn new(min_capacity: usize) -> io::Result<Self> {
        let capacity = page_round(min_capacity.max(1));
        let ptr = unsafe { os::map_ring(capacity)? };
        Ok(Self {
            ptr,
            capacity,
            head: 0,
            tail: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fill(&self) -> usize {
        (self.tail - self.head) as usize
    }

    fn offset(&self, pos: u64) -> isize {
        (pos % self.capacity as u64) as isize
    }

    /// Returns a writable region of `n` contiguous bytes at the tail, or
    /// `None` if there isn't `n` bytes of free space. Does not advance the
    /// tail; pair with `commit`.
    pub fn reserve(&mut self, n: usize) -> Option<*mut u8> {
        if self.fill() + n > self.capacity {
            return None;
        }
        Some(unsafe { self.ptr.offset(self.offset(self.tail)) })
    }

    /// Advances the tail by `n` bytes after the caller has written into the
    /// region returned by a matching `reserve(n)`.
    ///
    /// # Safety
    /// Must be immediately preceded by a `reserve(n)` call (for the same or
    /// larger `n`) whose result has not been superseded by another
    /// `reserve`.
    pub unsafe fn commit(&mut self, n: usize) {
        debug_assert!(self.fill() + n <= self.capacity);
        self.tail += n as u64;
    }

    /// Returns the readable region at the head — a pointer and its length,
    /// which is always the full current `fill` — or `None` if empty. Does
    /// not advance the head; pair with `release`.
    pub fn peek(&self) -> Option<(*const u8, usize)> {
        let fill = self.fill();
        if fill == 0 {
            return None;
        }
        let ptr = unsafe { self.ptr.offset(self.offset(self.head)) as *const u8 };
        Some((ptr, fill))
    }

    /// Advances the head by `n` bytes, freeing that range for reuse by a
    /// future `reserve`.
    ///
    /// # Safety
    /// `n` must not exceed the `fill` observed at the time of the most
    /// recent `peek`.
    pub unsafe fn release(&mut self, n: usize) {
        debug_assert!(n as u64 <= self.fill() as u64);
        self.head += n as u64;
    }
}

impl Drop for Vrb {
    fn drop(&mut self) {
        unsafe { os::unmap_ring(self.ptr, self.capacity) }.unwrap_or_default();
    }
}

impl std::fmt::Debug for Vrb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vrb")
            .field("capacity", &self.capacity)
            .field("fill", &self.fill())
            .finish()
    }
}
