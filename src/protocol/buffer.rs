use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, PoisonError},
};

use log::trace;

use crate::config::SocketSettings;

/// Pool of encode buffers. A [`PooledBuffer`] goes back to the pool when dropped, on
/// every path, so a buffer is returned exactly once.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    initial_size: usize,
    maximum_size: usize,
}

impl BufferPool {
    /// `capacity` buffers are kept at most. Buffers that grew past `maximum_size` are
    /// released rather than kept.
    pub fn new(capacity: usize, initial_size: usize, maximum_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            initial_size,
            maximum_size,
        }
    }

    pub fn from_settings(settings: &SocketSettings) -> Self {
        Self::new(
            settings.buffer_pool_capacity,
            settings.initial_message_size,
            settings.maximum_message_size,
        )
    }

    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.initial_size));
        PooledBuffer { buf, pool: self }
    }

    /// Buffers currently waiting in the pool.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.maximum_size {
            trace!("dropping pooled buffer grown to {} bytes", buf.capacity());
            return;
        }
        buf.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.capacity {
            free.push(buf);
        }
    }
}

/// A buffer borrowed from a [`BufferPool`]. Empty when handed out.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    buf: Vec<u8>,
    pool: &'a BufferPool,
}

impl PooledBuffer<'_> {
    /// Moves the bytes out, leaving an empty buffer behind for the pool.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Puts bytes produced from [`take`](Self::take) back.
    pub fn restore(&mut self, buf: Vec<u8>) {
        self.buf = buf;
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
