//! Fixed-pool block allocator for cached token state.
//!
//! Manages a pre-sized pool of fungible, uniformly sized blocks with a
//! free-list allocator. Alloc and free are O(1); running out of blocks is a
//! normal outcome the caller handles, not a failure of the allocator.

use thiserror::Error;

/// Index of a block within the pool.
pub type BlockId = usize;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocError {
    #[error("no free blocks available (pool capacity {capacity})")]
    Exhausted { capacity: usize },

    #[error("block {0} is not allocated")]
    NotAllocated(BlockId),

    #[error("block {0} is out of range")]
    OutOfRange(BlockId),
}

/// Free-list block allocator over a fixed pool.
///
/// The pool never grows or shrinks after construction. Blocks carry no data
/// here; they are handles into whatever backing store the kernel writes to.
#[derive(Debug)]
pub struct BlockAllocator {
    /// IDs currently available for allocation (LIFO).
    free_list: Vec<BlockId>,

    /// Allocation bitmap, indexed by block ID.
    allocated: Vec<bool>,
}

impl BlockAllocator {
    /// Create an allocator managing `capacity` blocks, all initially free.
    pub fn new(capacity: usize) -> Self {
        Self {
            free_list: (0..capacity).rev().collect(),
            allocated: vec![false; capacity],
        }
    }

    /// Take one block from the pool.
    ///
    /// Returns `Exhausted` when the free list is empty; never blocks or
    /// reclaims on its own.
    pub fn allocate(&mut self) -> Result<BlockId, AllocError> {
        match self.free_list.pop() {
            Some(id) => {
                self.allocated[id] = true;
                Ok(id)
            }
            None => Err(AllocError::Exhausted {
                capacity: self.allocated.len(),
            }),
        }
    }

    /// Return a block to the pool.
    ///
    /// Freeing a block that is not currently allocated is rejected so a
    /// double free cannot corrupt the free list.
    pub fn free(&mut self, id: BlockId) -> Result<(), AllocError> {
        if id >= self.allocated.len() {
            return Err(AllocError::OutOfRange(id));
        }
        if !self.allocated[id] {
            return Err(AllocError::NotAllocated(id));
        }
        self.allocated[id] = false;
        self.free_list.push(id);
        Ok(())
    }

    /// Number of blocks currently free.
    pub fn free_blocks(&self) -> usize {
        self.free_list.len()
    }

    /// Total pool capacity in blocks.
    pub fn total_blocks(&self) -> usize {
        self.allocated.len()
    }

    /// Allocated fraction of the pool (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        if self.allocated.is_empty() {
            return 0.0;
        }
        let used = self.allocated.len() - self.free_list.len();
        used as f64 / self.allocated.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_exhausted() {
        let mut pool = BlockAllocator::new(2);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);
        assert!(a < 2 && b < 2);

        assert_eq!(
            pool.allocate(),
            Err(AllocError::Exhausted { capacity: 2 })
        );
    }

    #[test]
    fn test_free_makes_block_reusable() {
        let mut pool = BlockAllocator::new(1);

        let a = pool.allocate().unwrap();
        assert_eq!(pool.free_blocks(), 0);

        pool.free(a).unwrap();
        assert_eq!(pool.free_blocks(), 1);
        pool.allocate().unwrap();
    }

    #[test]
    fn test_double_free_rejected() {
        let mut pool = BlockAllocator::new(4);

        let a = pool.allocate().unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.free(a), Err(AllocError::NotAllocated(a)));
        assert_eq!(pool.free_blocks(), 4);
    }

    #[test]
    fn test_free_out_of_range_rejected() {
        let mut pool = BlockAllocator::new(4);
        assert_eq!(pool.free(99), Err(AllocError::OutOfRange(99)));
    }

    #[test]
    fn test_utilization() {
        let mut pool = BlockAllocator::new(4);
        assert_eq!(pool.utilization(), 0.0);

        pool.allocate().unwrap();
        pool.allocate().unwrap();
        assert!((pool.utilization() - 0.5).abs() < 1e-10);

        pool.allocate().unwrap();
        pool.allocate().unwrap();
        assert_eq!(pool.utilization(), 1.0);
    }
}
