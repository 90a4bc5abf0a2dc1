//! Reusable byte buffers
//!
//! Broadcast encodes each packet into a pooled buffer, so steady-state
//! streaming does not allocate per frame.

use parking_lot::Mutex;

/// Bounded pool of fixed-capacity byte buffers
///
/// Safe to share between tasks. A rented buffer is exclusively owned by the
/// renter until it is released.
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    max_buffers: usize,
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-capacity buffers holding at most `max_buffers`
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            buffer_size,
            max_buffers,
            buffers: Mutex::new(Vec::with_capacity(max_buffers)),
        }
    }

    /// Capacity of buffers this pool hands out
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers currently held
    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Take an empty buffer, reusing a released one when possible
    pub fn rent(&self) -> Vec<u8> {
        self.buffers
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size))
    }

    /// Return a buffer.
    ///
    /// Buffers that grew or shrank away from the pool size, or that arrive when
    /// the pool is full, are dropped.
    pub fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() != self.buffer_size {
            return;
        }
        buffer.clear();

        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_buffers {
            buffers.push(buffer);
        }
    }
}
