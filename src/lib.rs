//! # hotleaf — In-Memory Block-Structured B+Tree
//!
//! hotleaf is an ordered index for fixed-width integer keys, optimized
//! for workloads whose inserts arrive in locally monotone bursts: runs of
//! keys inside a narrow active range, interleaved with occasional
//! out-of-range strays. The optimization is a *fast path* — a cached
//! pointer to the one hot leaf plus its bounding metadata, consulted
//! before every insert to skip the root-to-leaf walk entirely.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │   Benchmark Driver (workload, bin)     │
//! ├───────────────────────────────────────┤
//! │  Tree Core (tree::quit / tree::lil)    │
//! │  fast path · IQR splits · latch walks  │
//! ├───────────────────────────────────────┤
//! │  Node Layout (storage::node)           │
//! │  zerocopy views over block bytes       │
//! ├───────────────────────────────────────┤
//! │  Block Manager (storage::block)        │
//! │  4 KiB arena · per-block RwLock latch  │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## The fast path
//!
//! The tree keeps `{fp_id, fp_min, fp_max}`: the hot leaf and its key
//! range as bounded by its parent's separators. An insert whose key falls
//! inside the range latches the hot leaf directly. When the hot leaf
//! fills, recent locality statistics from the *previous* leaf (the shadow
//! metadata) choose the split position: hot regions keep their leaf while
//! outliers are split off, or the whole fast path migrates to the new
//! sibling. Repeated misses trigger a hard reset that repoints the fast
//! path at wherever the keys actually land.
//!
//! ## Scope
//!
//! Everything lives in memory. There is no durability, recovery,
//! deletion, or multi-versioning; keys and values are `u64`.
//!
//! ## Module Overview
//!
//! - [`storage`]: block arena, latches, packed node views
//! - [`tree`]: the two tree variants and their support pieces
//! - [`workload`]: benchmark phase driver and CSV reporting
//! - [`keyset`]: key-file readers
//! - [`config`]: knobs, config-file parsing, CLI

pub mod config;
pub mod keyset;
pub mod storage;
pub mod tree;
pub mod workload;

pub use storage::{BlockManager, Key, NodeId, Value};
pub use tree::{LilTree, QuitAppendTree, QuitTree};
