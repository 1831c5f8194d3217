//! # Block Geometry and Derived Constants
//!
//! This module centralizes the compile-time constants the tree layout is
//! built from. Constants that depend on each other are co-located so a
//! change to one is checked against its dependents at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! BLOCK_SIZE (4096 bytes)
//!       │
//!       ├─> NODE_HEADER_SIZE (16 bytes, fixed)
//!       │
//!       ├─> INTERNAL_CAPACITY (derived: separator keys per internal node)
//!       │         │
//!       │         └─> SPLIT_INTERNAL_POS (INTERNAL_CAPACITY / 2)
//!       │
//!       └─> LEAF_CAPACITY (derived: key/value pairs per leaf, minus one)
//!                 │
//!                 ├─> SPLIT_LEAF_POS ((LEAF_CAPACITY + 1) / 2)
//!                 │         │
//!                 │         └─> IQR_SIZE_THRESH (= SPLIT_LEAF_POS)
//!                 │
//!                 └─> RESET_THRESHOLD (⌈sqrt(LEAF_CAPACITY)⌉)
//! ```
//!
//! ## The `- 1` in LEAF_CAPACITY
//!
//! A leaf that splits holds `LEAF_CAPACITY` entries plus the incoming one,
//! distributed across two leaves. Reserving one slot of raw space keeps
//! both sides within their arrays for every legal split position.

use crate::storage::{Key, NodeId, Value};

/// Size of every block handed out by the block manager.
pub const BLOCK_SIZE: usize = 4096;

/// Size of the node header at the start of every block.
pub const NODE_HEADER_SIZE: usize = 16;

/// Separator keys per internal node. One more child than keys fits after
/// the header: `NODE_HEADER_SIZE + KEY*cap + CHILD*(cap+1) <= BLOCK_SIZE`.
pub const INTERNAL_CAPACITY: usize = (BLOCK_SIZE - NODE_HEADER_SIZE - size_of::<NodeId>())
    / (size_of::<Key>() + size_of::<NodeId>());

/// Key/value pairs per leaf node.
pub const LEAF_CAPACITY: usize =
    (BLOCK_SIZE - NODE_HEADER_SIZE) / (size_of::<Key>() + size_of::<Value>()) - 1;

/// Split index for a full internal node.
pub const SPLIT_INTERNAL_POS: usize = INTERNAL_CAPACITY / 2;

/// Default split index for a full leaf.
pub const SPLIT_LEAF_POS: usize = (LEAF_CAPACITY + 1) / 2;

/// Minimum neighbour-leaf population for its statistics to drive the
/// outlier-based split position.
pub const IQR_SIZE_THRESH: usize = SPLIT_LEAF_POS;

/// Safety margin subtracted from the outlier position when the hot region
/// migrates to the new sibling on split.
pub const OUTLIER_SPLIT_MARGIN: usize = 10;

/// Consecutive fast-path misses tolerated before a hard reset repoints the
/// fast path at the freshly located leaf: `⌈sqrt(LEAF_CAPACITY)⌉`.
pub const RESET_THRESHOLD: u8 = {
    let mut t = 1usize;
    while t * t < LEAF_CAPACITY {
        t += 1;
    }
    t as u8
};

const _: () = assert!(
    NODE_HEADER_SIZE
        + INTERNAL_CAPACITY * size_of::<Key>()
        + (INTERNAL_CAPACITY + 1) * size_of::<NodeId>()
        <= BLOCK_SIZE,
    "internal node layout exceeds BLOCK_SIZE"
);

const _: () = assert!(
    NODE_HEADER_SIZE + LEAF_CAPACITY * (size_of::<Key>() + size_of::<Value>()) <= BLOCK_SIZE,
    "leaf node layout exceeds BLOCK_SIZE"
);

const _: () = assert!(
    SPLIT_LEAF_POS >= 1 && SPLIT_LEAF_POS <= LEAF_CAPACITY,
    "SPLIT_LEAF_POS out of range"
);

const _: () = assert!(
    OUTLIER_SPLIT_MARGIN < SPLIT_LEAF_POS,
    "OUTLIER_SPLIT_MARGIN must leave room below the default split position"
);
