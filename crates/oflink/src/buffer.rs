//! Growable byte buffer used as the universal message carrier.
//!
//! A [`Buffer`] owns a linear byte region split into three spans:
//!
//! ```text
//! ┌──────────┬─────────────────┬──────────┐
//! │ headroom │ payload (size)  │ tailroom │
//! └──────────┴─────────────────┴──────────┘
//! ```
//!
//! Message builders append to the tail, protocol layers strip consumed
//! headers from the front with [`pull`](Buffer::pull), and receive paths fill
//! reserved tailroom in place. Ownership of a buffer transfers with the
//! message it carries: receive operations return buffers by value and send
//! operations consume them.

use std::fmt;

/// An owned, growable byte region with explicit head and tail room.
///
/// The invariant `headroom + size + tailroom == capacity` holds across every
/// operation. Slices returned by accessors are invalidated by any
/// capacity-changing call, which the borrow checker enforces.
pub struct Buffer {
    store: Vec<u8>,
    head: usize,
    size: usize,
}

impl Buffer {
    /// Create an empty buffer with `capacity` bytes of tailroom.
    pub fn new(capacity: usize) -> Self {
        Self {
            store: vec![0; capacity],
            head: 0,
            size: 0,
        }
    }

    /// Number of payload bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the buffer holds no payload.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Total allocated bytes.
    pub fn capacity(&self) -> usize {
        self.store.len()
    }

    /// Unused bytes before the payload.
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Unused bytes after the payload.
    pub fn tailroom(&self) -> usize {
        self.store.len() - self.head - self.size
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.store[self.head..self.head + self.size]
    }

    /// The payload bytes, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.store[self.head..self.head + self.size]
    }

    /// Ensure at least `n` bytes of tailroom, reallocating and copying if
    /// necessary. The payload is preserved; its position within the
    /// allocation may change.
    pub fn reserve_tailroom(&mut self, n: usize) {
        if self.tailroom() >= n {
            return;
        }
        if self.head > 0 {
            self.store.copy_within(self.head..self.head + self.size, 0);
            self.head = 0;
        }
        if self.tailroom() < n {
            let need = self.size + n;
            self.store.resize(need.next_power_of_two(), 0);
        }
    }

    /// Ensure at least `n` bytes of headroom, reallocating and copying if
    /// necessary.
    pub fn reserve_headroom(&mut self, n: usize) {
        if self.head >= n {
            return;
        }
        let shortfall = n - self.head;
        if self.tailroom() < shortfall {
            let need = n + self.size;
            self.store.resize(need.next_power_of_two(), 0);
        }
        self.store.copy_within(self.head..self.head + self.size, n);
        self.head = n;
    }

    /// Append `n` bytes and return the new region for the caller to fill.
    /// The contents of the region are unspecified.
    pub fn put_uninit(&mut self, n: usize) -> &mut [u8] {
        self.reserve_tailroom(n);
        let start = self.head + self.size;
        self.size += n;
        &mut self.store[start..start + n]
    }

    /// Append a copy of `data`.
    pub fn put(&mut self, data: &[u8]) {
        self.put_uninit(data.len()).copy_from_slice(data);
    }

    /// Prepend `n` bytes and return the new region for the caller to fill.
    /// The contents of the region are unspecified.
    pub fn push_uninit(&mut self, n: usize) -> &mut [u8] {
        self.reserve_headroom(n);
        self.head -= n;
        self.size += n;
        &mut self.store[self.head..self.head + n]
    }

    /// Prepend a copy of `data`.
    pub fn push(&mut self, data: &[u8]) {
        self.push_uninit(data.len()).copy_from_slice(data);
    }

    /// Remove the first `n` bytes from the payload.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the payload size.
    pub fn pull(&mut self, n: usize) {
        assert!(n <= self.size, "pull of {n} bytes from {} byte payload", self.size);
        self.head += n;
        self.size -= n;
    }

    /// The payload from `offset` onward, if at least `min_size` bytes of
    /// payload exist there.
    pub fn at(&self, offset: usize, min_size: usize) -> Option<&[u8]> {
        if offset.checked_add(min_size)? <= self.size {
            Some(&self.data()[offset..])
        } else {
            None
        }
    }

    /// Like [`at`](Self::at), but panics on a range violation.
    pub fn at_assert(&self, offset: usize, min_size: usize) -> &[u8] {
        match self.at(offset, min_size) {
            Some(slice) => slice,
            None => panic!(
                "buffer access at offset {offset} for {min_size} bytes, but payload is {} bytes",
                self.size
            ),
        }
    }

    /// The first `n` bytes of tailroom, for receive paths that fill the
    /// buffer in place. Claim the filled portion with [`grow`](Self::grow).
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` bytes of tailroom are available; call
    /// [`reserve_tailroom`](Self::reserve_tailroom) first.
    pub fn tail_mut(&mut self, n: usize) -> &mut [u8] {
        assert!(n <= self.tailroom(), "tail access of {n} bytes with {} tailroom", self.tailroom());
        let start = self.head + self.size;
        &mut self.store[start..start + n]
    }

    /// Extend the payload over `n` bytes of tailroom previously filled
    /// through [`tail_mut`](Self::tail_mut).
    pub fn grow(&mut self, n: usize) {
        assert!(n <= self.tailroom());
        self.size += n;
    }

    /// Reset to an empty buffer with at least `capacity` bytes of tailroom.
    pub fn reinit(&mut self, capacity: usize) {
        self.head = 0;
        self.size = 0;
        if self.store.len() < capacity {
            self.store.resize(capacity, 0);
        }
    }

    /// Drop the payload, keeping the allocation.
    pub fn clear(&mut self) {
        self.head = 0;
        self.size = 0;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("headroom", &self.headroom())
            .field("size", &self.size)
            .field("tailroom", &self.tailroom())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariant(buf: &Buffer) {
        assert_eq!(buf.headroom() + buf.size() + buf.tailroom(), buf.capacity());
    }

    #[test]
    fn spans_account_for_capacity() {
        let mut buf = Buffer::new(32);
        check_invariant(&buf);
        buf.put(b"hello");
        check_invariant(&buf);
        buf.pull(2);
        check_invariant(&buf);
        buf.put_uninit(100);
        check_invariant(&buf);
        buf.reserve_headroom(16);
        check_invariant(&buf);
        buf.reinit(8);
        check_invariant(&buf);
    }

    #[test]
    fn put_then_pull() {
        let mut buf = Buffer::new(8);
        buf.put(b"abcdef");
        buf.pull(2);
        assert_eq!(buf.data(), b"cdef");
        assert_eq!(buf.size(), 4);
    }

    #[test]
    #[should_panic(expected = "pull")]
    fn pull_past_payload_panics() {
        let mut buf = Buffer::new(8);
        buf.put(b"ab");
        buf.pull(3);
    }

    #[test]
    fn growth_preserves_payload() {
        let mut buf = Buffer::new(4);
        buf.put(b"abcd");
        buf.put(b"efghijklmnop");
        assert_eq!(buf.data(), b"abcdefghijklmnop");
    }

    #[test]
    fn growth_reclaims_headroom() {
        let mut buf = Buffer::new(8);
        buf.put(b"abcdefgh");
        buf.pull(6);
        buf.reserve_tailroom(6);
        assert_eq!(buf.data(), b"gh");
        assert!(buf.tailroom() >= 6);
    }

    #[test]
    fn prepend() {
        let mut buf = Buffer::new(4);
        buf.put(b"world");
        buf.push(b"hello ");
        assert_eq!(buf.data(), b"hello world");
    }

    #[test]
    fn bounded_access() {
        let mut buf = Buffer::new(8);
        buf.put(b"abcd");
        assert_eq!(buf.at(0, 4).unwrap(), b"abcd");
        assert_eq!(buf.at(2, 2).unwrap(), b"cd");
        assert!(buf.at(2, 3).is_none());
        assert!(buf.at(5, 0).is_none());
    }

    #[test]
    #[should_panic(expected = "buffer access")]
    fn at_assert_panics_out_of_range() {
        let buf = Buffer::new(8);
        buf.at_assert(0, 1);
    }

    #[test]
    fn fill_through_tail() {
        let mut buf = Buffer::new(4);
        buf.reserve_tailroom(8);
        buf.tail_mut(8).copy_from_slice(b"abcdefgh");
        buf.grow(3);
        assert_eq!(buf.data(), b"abc");
        buf.grow(5);
        assert_eq!(buf.data(), b"abcdefgh");
    }

    #[test]
    fn reinit_resets() {
        let mut buf = Buffer::new(4);
        buf.put(b"abcd");
        buf.pull(1);
        buf.reinit(16);
        assert!(buf.is_empty());
        assert_eq!(buf.headroom(), 0);
        assert!(buf.tailroom() >= 16);
    }
}
