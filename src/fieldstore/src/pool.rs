//! Per-layout reuse of buffers on dispose (spec §4.10).

use std::collections::HashMap;

/// A bounded free list of zeroed buffers, bucketed by size. Containers that
/// share a schema also share a total length, so bucketing by size is enough
/// to make reuse effective without threading full layout identity through
/// the pool.
pub struct BufferPool {
    buckets: HashMap<usize, Vec<Vec<u8>>>,
    cap_per_bucket: Option<usize>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            buckets: HashMap::new(),
            cap_per_bucket: None,
        }
    }

    pub fn with_capacity(cap_per_bucket: usize) -> Self {
        BufferPool {
            buckets: HashMap::new(),
            cap_per_bucket: Some(cap_per_bucket),
        }
    }

    /// Pops a zeroed buffer of exactly `size` bytes from the free list, or
    /// allocates a fresh one.
    pub fn acquire(&mut self, size: usize) -> Vec<u8> {
        if let Some(bucket) = self.buckets.get_mut(&size) {
            if let Some(buf) = bucket.pop() {
                return buf;
            }
        }
        vec![0u8; size]
    }

    /// Zeroes `buf` and pushes it onto its size's free list, dropping it
    /// instead if the bucket is already at capacity.
    pub fn release(&mut self, mut buf: Vec<u8>) {
        for b in buf.iter_mut() {
            *b = 0;
        }
        let size = buf.len();
        let bucket = self.buckets.entry(size).or_default();
        let under_cap = match self.cap_per_bucket {
            Some(cap) => bucket.len() < cap,
            None => true,
        };
        if under_cap {
            bucket.push(buf);
        }
    }

    /// Observable for testing (spec §4.10); also useful at runtime for
    /// embedders watching memory pressure.
    pub fn retained_count(&self, size: usize) -> usize {
        self.buckets.get(&size).map_or(0, |b| b.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffers_are_reused_and_cleared() {
        let mut pool = BufferPool::new();
        let mut buf = pool.acquire(8);
        buf.fill(0xAB);
        pool.release(buf);
        assert_eq!(pool.retained_count(8), 1);

        let reused = pool.acquire(8);
        assert_eq!(reused, vec![0u8; 8]);
        assert_eq!(pool.retained_count(8), 0);
    }

    #[test]
    fn capacity_caps_retained_buffers() {
        let mut pool = BufferPool::with_capacity(1);
        pool.release(vec![0u8; 4]);
        pool.release(vec![0u8; 4]);
        assert_eq!(pool.retained_count(4), 1);
    }
}
