//! # Block Manager
//!
//! A pool-style allocator owning a contiguous arena of 4 KiB blocks,
//! addressed by small integer ids. The arena is sized once, up front;
//! blocks are never freed individually — a tree is destroyed by resetting
//! the manager between runs.
//!
//! ## Latching
//!
//! Every block carries its own reader-writer latch: the arena is a slice
//! of `RwLock<Block>`. Tree traversals practice latch coupling directly on
//! the guards returned by [`BlockManager::read`] and
//! [`BlockManager::write`] — acquiring the child's guard before dropping
//! the parent's. Trees that share a manager share latches, which is what
//! makes multiple independent trees over one arena sound.
//!
//! ## Allocation
//!
//! [`BlockManager::allocate`] is a single fetch-add and is safe to call
//! from any number of threads. Arena exhaustion is a fatal configuration
//! error (the arena must be sized for the workload) and panics rather
//! than returning an error the tree could not recover from mid-split.
//!
//! ## Dirty tracking
//!
//! [`BlockManager::mark_dirty`] records content changes per block. The
//! in-memory configuration has no eviction, so this is bookkeeping for
//! prospective eviction hooks and for tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::constants::BLOCK_SIZE;
use crate::storage::NodeId;

/// Shared-mode latch guard over a block.
pub type BlockReadGuard<'a> = RwLockReadGuard<'a, Block>;

/// Exclusive-mode latch guard over a block.
pub type BlockWriteGuard<'a> = RwLockWriteGuard<'a, Block>;

/// A fixed-size block buffer. Alignment matches the block size so the
/// packed node arrays inside are always naturally aligned.
#[repr(C, align(4096))]
pub struct Block {
    pub(crate) bytes: [u8; BLOCK_SIZE],
}

impl Block {
    const ZEROED: Block = Block {
        bytes: [0; BLOCK_SIZE],
    };

    /// Raw byte copy of another block. Used when a root split migrates the
    /// old root's contents into a fresh child block.
    pub fn copy_from(&mut self, other: &Block) {
        self.bytes = other.bytes;
    }
}

pub struct BlockManager {
    blocks: Box<[RwLock<Block>]>,
    dirty: Box<[AtomicBool]>,
    next_id: AtomicU32,
}

impl BlockManager {
    /// Builds an arena of `capacity` zeroed blocks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "block arena capacity must be nonzero");
        assert!(
            capacity < NodeId::MAX as usize,
            "block arena capacity exceeds the id space"
        );
        let blocks = (0..capacity)
            .map(|_| RwLock::new(Block::ZEROED))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let dirty = (0..capacity)
            .map(|_| AtomicBool::new(false))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            blocks,
            dirty,
            next_id: AtomicU32::new(0),
        }
    }

    /// Hands out the next unused block id.
    ///
    /// # Panics
    ///
    /// Panics when the arena is exhausted; see the module docs.
    pub fn allocate(&self) -> NodeId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        assert!(
            (id as usize) < self.blocks.len(),
            "block arena exhausted: {} blocks in memory",
            self.blocks.len()
        );
        id
    }

    /// Latches block `id` in shared mode.
    pub fn read(&self, id: NodeId) -> BlockReadGuard<'_> {
        self.blocks[id as usize].read()
    }

    /// Latches block `id` in exclusive mode.
    pub fn write(&self, id: NodeId) -> BlockWriteGuard<'_> {
        self.blocks[id as usize].write()
    }

    pub fn mark_dirty(&self, id: NodeId) {
        self.dirty[id as usize].store(true, Ordering::Relaxed);
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.dirty[id as usize].load(Ordering::Relaxed)
    }

    /// Invalidates all allocations, returning the arena to an empty state.
    /// Block contents are not scrubbed; the allocator simply reuses ids
    /// from zero and node initialization overwrites headers.
    pub fn reset(&mut self) {
        self.next_id.store(0, Ordering::Relaxed);
        for flag in self.dirty.iter() {
            flag.store(false, Ordering::Relaxed);
        }
    }

    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Number of blocks handed out so far.
    pub fn allocated(&self) -> usize {
        (self.next_id.load(Ordering::Relaxed) as usize).min(self.blocks.len())
    }
}
