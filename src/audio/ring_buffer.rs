//! Lock-free ring buffer for real-time audio
//!
//! The capture callback runs on the audio thread and must not allocate or
//! block, so all storage is pre-allocated and handed over with atomic
//! position updates. Single producer (audio callback), single consumer
//! (processing thread).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default capacity: ~4 seconds of 16 kHz mono audio.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// A lock-free single-producer single-consumer ring buffer of f32 samples.
pub struct AudioRingBuffer {
    storage: Box<[UnsafeCell<f32>]>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// Safety: SPSC discipline. The producer only writes between write_pos and
// read_pos - 1, the consumer only reads between read_pos and write_pos, and
// the acquire/release pairs on the position atomics order the sample data.
unsafe impl Send for AudioRingBuffer {}
unsafe impl Sync for AudioRingBuffer {}

impl Default for AudioRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioRingBuffer {
    /// Create a ring buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a ring buffer holding up to `capacity - 1` samples.
    ///
    /// One slot is kept empty to distinguish full from empty.
    pub fn with_capacity(capacity: usize) -> Self {
        let storage: Vec<UnsafeCell<f32>> = (0..capacity.max(2)).map(|_| UnsafeCell::new(0.0)).collect();
        Self {
            storage: storage.into_boxed_slice(),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Total slot count of the buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of samples currently available for reading.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.capacity() - read + write
        }
    }

    /// Write samples from the audio callback.
    ///
    /// Lock-free and allocation-free. Returns the number of samples actually
    /// written, which is less than `samples.len()` when the buffer is full.
    pub fn write(&self, samples: &[f32]) -> usize {
        let cap = self.capacity();
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);

        let free = if write >= read {
            cap - (write - read) - 1
        } else {
            read - write - 1
        };
        let to_write = samples.len().min(free);
        if to_write == 0 {
            return 0;
        }

        // First segment: from write position to end of storage (or all of it).
        let first = to_write.min(cap - write);
        for (i, &sample) in samples[..first].iter().enumerate() {
            // Safety: SPSC — the consumer never touches slots past read_pos - 1.
            unsafe { *self.storage[write + i].get() = sample };
        }
        // Second segment wraps to the start.
        for (i, &sample) in samples[first..to_write].iter().enumerate() {
            unsafe { *self.storage[i].get() = sample };
        }

        self.write_pos
            .store((write + to_write) % cap, Ordering::Release);
        to_write
    }

    /// Read samples into `output` from the consumer thread.
    ///
    /// Returns the number of samples actually read.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let cap = self.capacity();
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);

        let avail = if write >= read {
            write - read
        } else {
            cap - read + write
        };
        let to_read = output.len().min(avail);
        if to_read == 0 {
            return 0;
        }

        let first = to_read.min(cap - read);
        for (i, slot) in output[..first].iter_mut().enumerate() {
            // Safety: SPSC — the producer never touches slots before write_pos.
            *slot = unsafe { *self.storage[read + i].get() };
        }
        for (i, slot) in output[first..to_read].iter_mut().enumerate() {
            *slot = unsafe { *self.storage[i].get() };
        }

        self.read_pos
            .store((read + to_read) % cap, Ordering::Release);
        to_read
    }

    /// Read everything currently buffered into a fresh Vec.
    ///
    /// Allocates; only for non-real-time threads.
    pub fn read_all(&self) -> Vec<f32> {
        let mut output = vec![0.0; self.available()];
        let read = self.read(&mut output);
        output.truncate(read);
        output
    }

    /// Discard all buffered samples.
    pub fn clear(&self) {
        self.read_pos
            .store(self.write_pos.load(Ordering::Acquire), Ordering::Release);
    }
}
