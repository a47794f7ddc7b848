//! Size-classed pool of reusable result buffers.
//!
//! Batched queries (overlaps, raycasts) made from step callbacks rent a
//! buffer of at least the size they need and hand it back when the rental
//! goes out of scope. Buffers are never freed, only returned.

use std::{
    cell::RefCell,
    ops::{Deref, DerefMut},
};

pub struct BufferPool<T> {
    /// Free buffers, ascending by length.
    free: RefCell<Vec<Vec<T>>>,
}

impl<T: Default + Clone> BufferPool<T> {
    pub fn new() -> Self {
        Self { free: RefCell::new(Vec::new()) }
    }

    /// The smallest free buffer with `len() >= min_len`, or a new one of
    /// exactly `min_len` elements. Contents of a reused buffer are stale.
    pub fn rent(&self, min_len: usize) -> PooledBuffer<'_, T> {
        let reused = {
            let mut free = self.free.borrow_mut();
            let fit = free.iter().position(|b| b.len() >= min_len);
            fit.map(|i| free.remove(i))
        };
        let buffer = reused.unwrap_or_else(|| vec![T::default(); min_len]);
        PooledBuffer { pool: self, buffer: Some(buffer) }
    }

    /// Number of buffers waiting to be rented.
    pub fn free_len(&self) -> usize {
        self.free.borrow().len()
    }

    fn give_back(&self, buffer: Vec<T>) {
        let mut free = self.free.borrow_mut();
        let at = free.partition_point(|b| b.len() < buffer.len());
        free.insert(at, buffer);
    }
}

impl<T: Default + Clone> Default for BufferPool<T> {
    fn default() -> Self { Self::new() }
}

/// A rented buffer. Returns itself to the pool on drop.
pub struct PooledBuffer<'a, T: Default + Clone> {
    pool:   &'a BufferPool<T>,
    buffer: Option<Vec<T>>,
}

impl<T: Default + Clone> Deref for PooledBuffer<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl<T: Default + Clone> DerefMut for PooledBuffer<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl<T: Default + Clone> Drop for PooledBuffer<'_, T> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rents_smallest_sufficient_buffer() {
        let pool: BufferPool<u32> = BufferPool::new();
        {
            let _a = pool.rent(8);
            let _b = pool.rent(32);
            let _c = pool.rent(16);
        }
        assert_eq!(pool.free_len(), 3);

        let rented = pool.rent(10);
        assert_eq!(rented.len(), 16);
        assert_eq!(pool.free_len(), 2);
    }

    #[test]
    fn allocates_when_nothing_fits() {
        let pool: BufferPool<u32> = BufferPool::new();
        drop(pool.rent(4));
        let rented = pool.rent(64);
        assert_eq!(rented.len(), 64);
        assert_eq!(pool.free_len(), 1);
    }

    #[test]
    fn buffer_is_returned_not_freed() {
        let pool: BufferPool<u8> = BufferPool::new();
        {
            let mut rented = pool.rent(3);
            rented[0] = 7;
        }
        let again = pool.rent(3);
        assert_eq!(again[0], 7);
        assert_eq!(pool.free_len(), 0);
    }
}
