//! Pre-generated payload pool.
//!
//! All blocks of a run are generated up front so that fetch timing measures
//! only the transfer, never payload generation. Blocks are filled with random
//! bytes to defeat any compression on the path; the randomness has no
//! security role, so a fast non-cryptographic generator is used.
//!
//! Blocks are addressed by the 1-based fetch index. Each block can be taken
//! exactly once, and taking it releases its memory.

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Errors when taking a block from the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Index is 0 or beyond the pool length
    OutOfRange { index: u32, len: usize },
    /// Block was already served
    AlreadyTaken(u32),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::OutOfRange { index, len } => {
                write!(f, "Block index {} out of range 1..={}", index, len)
            }
            PoolError::AlreadyTaken(index) => write!(f, "Block {} already served", index),
        }
    }
}

impl std::error::Error for PoolError {}

/// Fixed set of equally sized random payload blocks.
#[derive(Debug)]
pub struct PayloadPool {
    /// Block slots; `None` once served.
    blocks: Vec<Option<Bytes>>,
    /// Size of every block in bytes
    block_size: usize,
    /// Blocks not yet served
    remaining: usize,
}

impl PayloadPool {
    /// Bytes a pool of `count` blocks of `block_size` will hold, including
    /// the per-slot bookkeeping. `None` on overflow.
    pub fn footprint(count: u32, block_size: u64) -> Option<u64> {
        let slot = std::mem::size_of::<Option<Bytes>>() as u64;
        block_size
            .checked_add(slot)?
            .checked_mul(count as u64)
    }

    /// Generate `count` random blocks of `block_size` bytes.
    pub fn generate(count: usize, block_size: usize) -> Self {
        let mut rng = SmallRng::from_entropy();
        let mut blocks = Vec::with_capacity(count);

        for _ in 0..count {
            let mut block = vec![0u8; block_size];
            rng.fill_bytes(&mut block);
            blocks.push(Some(Bytes::from(block)));
        }

        Self {
            blocks,
            block_size,
            remaining: count,
        }
    }

    /// Remove and return the block for fetch `index` (1-based).
    pub fn take(&mut self, index: u32) -> Result<Bytes, PoolError> {
        let len = self.blocks.len();
        let slot = (index as usize)
            .checked_sub(1)
            .and_then(|i| self.blocks.get_mut(i))
            .ok_or(PoolError::OutOfRange { index, len })?;

        let block = slot.take().ok_or(PoolError::AlreadyTaken(index))?;
        self.remaining -= 1;
        Ok(block)
    }

    /// Total number of slots (served or not).
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks still waiting to be served.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate() {
        let pool = PayloadPool::generate(5, 1024);
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.remaining(), 5);
        assert_eq!(pool.block_size(), 1024);
        assert!(!pool.is_exhausted());
    }

    #[test]
    fn test_blocks_are_random() {
        let mut pool = PayloadPool::generate(2, 4096);
        let a = pool.take(1).unwrap();
        let b = pool.take(2).unwrap();
        assert_eq!(a.len(), 4096);
        assert_ne!(a, b);
        assert!(a.iter().any(|&byte| byte != 0));
    }

    #[test]
    fn test_drain_in_any_order() {
        let mut pool = PayloadPool::generate(4, 16);
        for index in [3, 1, 4, 2] {
            assert_eq!(pool.take(index).unwrap().len(), 16);
        }
        assert!(pool.is_exhausted());
        assert_eq!(pool.remaining(), 0);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_take_twice() {
        let mut pool = PayloadPool::generate(2, 8);
        pool.take(1).unwrap();
        assert_eq!(pool.take(1), Err(PoolError::AlreadyTaken(1)));
        assert_eq!(pool.remaining(), 1);
    }

    #[test]
    fn test_take_out_of_range() {
        let mut pool = PayloadPool::generate(2, 8);
        assert_eq!(pool.take(0), Err(PoolError::OutOfRange { index: 0, len: 2 }));
        assert_eq!(pool.take(3), Err(PoolError::OutOfRange { index: 3, len: 2 }));
        assert_eq!(pool.remaining(), 2);
    }

    #[test]
    fn test_footprint_counts_slots() {
        let slot = std::mem::size_of::<Option<Bytes>>() as u64;
        assert_eq!(PayloadPool::footprint(4, 1024), Some(4 * (1024 + slot)));
        // Tiny blocks are dominated by slot overhead
        assert_eq!(PayloadPool::footprint(1_000_000, 1), Some(1_000_000 * (1 + slot)));
        assert_eq!(PayloadPool::footprint(2, u64::MAX), None);
        assert_eq!(PayloadPool::footprint(0, 1024), Some(0));
    }

    #[test]
    fn test_zero_sized_blocks() {
        let mut pool = PayloadPool::generate(1, 0);
        assert!(pool.take(1).unwrap().is_empty());
        assert!(pool.is_exhausted());
    }
}
