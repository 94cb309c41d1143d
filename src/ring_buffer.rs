//! Lock-bounded single-producer byte ring used for the audio pre-roll
//! buffer and similar fixed-capacity scratch.
//!
//! Writes never block and never fail: once the ring is full the oldest
//! bytes are overwritten so the buffer always holds the most recent
//! `capacity` bytes. This matches the pre-roll contract in the audio
//! pipeline spec: pre-roll is lossy, the live stream is not.

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use std::sync::Mutex;

/// A fixed-capacity byte ring with overwrite-on-full semantics.
///
/// Safe to share across threads: all mutation happens inside a single
/// short critical section guarded by an internal mutex. The audio task
/// is the sole writer; readers (e.g. `AudioManager::get_back_buffer_samples`)
/// take the same lock.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    buf: HeapRb<u8>,
    dropped_bytes: u64,
    total_written: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: HeapRb::new(capacity),
                dropped_bytes: 0,
                total_written: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write `bytes`, dropping the oldest ring contents on overflow.
    /// Returns the number of bytes written (always `bytes.len().min(capacity)`).
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut inner = self.inner.lock().expect("ring buffer mutex poisoned");
        inner.total_written += bytes.len() as u64;

        // If the incoming slice alone exceeds capacity, only its tail
        // can ever survive; account the rest as dropped up front.
        let write_slice = if bytes.len() > self.capacity {
            inner.dropped_bytes += (bytes.len() - self.capacity) as u64;
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };

        // Evict the oldest occupied bytes to make room for the rest.
        let free = inner.buf.vacant_len();
        if write_slice.len() > free {
            let to_evict = (write_slice.len() - free).min(inner.buf.occupied_len());
            inner.buf.skip(to_evict);
            inner.dropped_bytes += to_evict as u64;
        }

        inner.buf.push_slice(write_slice)
    }

    /// Read up to `max` of the most recently written, contiguous-in-time
    /// bytes without draining the ring.
    pub fn read(&self, max: usize) -> Vec<u8> {
        let inner = self.inner.lock().expect("ring buffer mutex poisoned");
        let n = max.min(inner.buf.occupied_len());
        inner.buf.iter().skip(inner.buf.occupied_len() - n).copied().collect()
    }

    /// Drain and return up to `max` bytes (oldest-first), removing them.
    pub fn drain(&self, max: usize) -> Vec<u8> {
        let mut inner = self.inner.lock().expect("ring buffer mutex poisoned");
        let n = max.min(inner.buf.occupied_len());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(b) = inner.buf.try_pop() {
                out.push(b);
            }
        }
        out
    }

    pub fn available(&self) -> usize {
        self.inner.lock().expect("ring buffer mutex poisoned").buf.occupied_len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("ring buffer mutex poisoned");
        inner.buf.clear();
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.inner.lock().expect("ring buffer mutex poisoned").dropped_bytes
    }

    pub fn total_written(&self) -> u64 {
        self.inner.lock().expect("ring buffer mutex poisoned").total_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips_within_capacity() {
        let ring = RingBuffer::new(16);
        ring.write(&[1, 2, 3, 4]);
        assert_eq!(ring.read(4), vec![1, 2, 3, 4]);
        assert_eq!(ring.available(), 4);
    }

    #[test]
    fn overrun_drops_oldest_bytes_keeping_most_recent() {
        let ring = RingBuffer::new(4);
        ring.write(&[1, 2, 3, 4]);
        ring.write(&[5, 6]);
        // capacity 4, last 4 bytes written are 3,4,5,6
        assert_eq!(ring.read(4), vec![3, 4, 5, 6]);
        assert_eq!(ring.dropped_bytes(), 2);
    }

    #[test]
    fn property_drop_plus_available_equals_written() {
        let ring = RingBuffer::new(10);
        for chunk in [vec![0u8; 7], vec![1u8; 7], vec![2u8; 3]] {
            ring.write(&chunk);
        }
        let total = ring.total_written();
        let dropped = ring.dropped_bytes();
        let available = ring.available() as u64;
        assert_eq!(dropped + available, total);
    }

    #[test]
    fn oversized_single_write_keeps_tail() {
        let ring = RingBuffer::new(4);
        let data: Vec<u8> = (0..10).collect();
        ring.write(&data);
        assert_eq!(ring.read(4), vec![6, 7, 8, 9]);
        assert_eq!(ring.dropped_bytes(), 6);
    }

    #[test]
    fn clear_resets_available_bytes() {
        let ring = RingBuffer::new(8);
        ring.write(&[1, 2, 3]);
        ring.clear();
        assert_eq!(ring.available(), 0);
    }
}
