// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a bounded single-producer/single-consumer sample queue.
pub fn sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    let rb = HeapRb::<Complex32>::new(capacity.max(2));
    let (prod, cons) = rb.split();
    (SampleProducer { inner: prod }, SampleConsumer { inner: cons })
}

/// Write side of the sample queue, owned by exactly one thread at a time.
pub struct SampleProducer {
    inner: HeapProd<Complex32>,
}

impl SampleProducer {
    /// Enqueue as many samples as fit; returns how many were written.
    pub fn put(&mut self, samples: &[Complex32]) -> usize {
        self.inner.push_slice(samples)
    }

    pub fn write_available(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}

/// Read side of the sample queue.
pub struct SampleConsumer {
    inner: HeapCons<Complex32>,
}

impl SampleConsumer {
    /// Dequeue up to `out.len()` samples; returns how many were read.
    pub fn get(&mut self, out: &mut [Complex32]) -> usize {
        self.inner.pop_slice(out)
    }

    pub fn read_available(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Discard everything currently queued.
    pub fn flush(&mut self) -> usize {
        self.inner.skip(self.inner.occupied_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(v: f32) -> Complex32 {
        Complex32::new(v, -v)
    }

    #[test]
    fn test_partial_write_when_full() {
        let (mut prod, cons) = sample_ring(4);
        let written = prod.put(&[c(1.0), c(2.0), c(3.0), c(4.0), c(5.0), c(6.0)]);
        assert_eq!(written, 4);
        assert_eq!(cons.read_available(), 4);
        assert_eq!(prod.write_available(), 0);
    }

    #[test]
    fn test_partial_read_and_fifo_order() {
        let (mut prod, mut cons) = sample_ring(16);
        prod.put(&[c(1.0), c(2.0), c(3.0)]);

        let mut out = [Complex32::default(); 8];
        let n = cons.get(&mut out);
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[c(1.0), c(2.0), c(3.0)]);
        assert_eq!(cons.read_available(), 0);
    }

    #[test]
    fn test_flush_discards_queued() {
        let (mut prod, mut cons) = sample_ring(8);
        prod.put(&[c(1.0); 5]);
        assert_eq!(cons.flush(), 5);
        assert_eq!(cons.read_available(), 0);
    }
}
