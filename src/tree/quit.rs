//! # Concurrent Fast-Path Tree
//!
//! B+Tree sharing the baseline's block layout, extended with a concurrent
//! hot-leaf fast path. An insert first consults the fast-path metadata —
//! the hot leaf's id, its smallest key, and the smallest parent separator
//! above it — and on a hit latches that leaf directly, skipping the
//! root-to-leaf walk. Shadow metadata about the leaf *preceding* the hot
//! leaf feeds the split-position chooser: when the hot leaf fills, the
//! neighbour's key spread decides whether the hot region keeps its leaf
//! (outliers split off) or migrates to the new right sibling.
//!
//! ## Latching
//!
//! Descents practice latch coupling on the per-block latches:
//!
//! - shared descents (`get`, `contains`, `range`, `select_k`) hold shared
//!   latches top-down, releasing each parent once the child is latched;
//! - the optimistic insert descent takes shared latches on internal
//!   levels and an exclusive latch on the leaf;
//! - the pessimistic descent takes exclusive latches all the way down,
//!   releasing every held ancestor whenever a node has room for one more
//!   entry (it cannot split, so nothing above it can be touched).
//!
//! ## Lock order
//!
//! `fp mutex → block latches (top-down) → shadow mutex`, globally. The
//! shadow mutex is innermost and is never held across a latch
//! acquisition, so no cycle exists. When a hard reset must sort a stale
//! unsorted hot leaf, the sort happens before the descent — at most one
//! leaf latch is ever held at a time.
//!
//! Every leaf split holds the fp mutex, including splits reached from a
//! fast-path miss: a key below the hot leaf's cached minimum can still
//! belong to — and split — the hot leaf, and the fast-path bounds must
//! follow that split. The miss path drops all latches and reacquires the
//! fp mutex before its pessimistic walk to keep the lock order intact.
//!
//! ## Append mode
//!
//! With `APPEND = true`, fast-path inserts write to the next free slot and
//! mark the leaf unsorted; the leaf is sorted under its exclusive latch
//! when a reset repoints the fast path, or right before the leaf splits.
//! Read paths never trust the hot leaf's ordering in this mode.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::config::constants::{
    INTERNAL_CAPACITY, IQR_SIZE_THRESH, LEAF_CAPACITY, OUTLIER_SPLIT_MARGIN, RESET_THRESHOLD,
    SPLIT_INTERNAL_POS, SPLIT_LEAF_POS,
};
use crate::storage::{
    BlockManager, BlockReadGuard, BlockWriteGuard, Key, LeafNode, NodeId, NodeKind, Value,
    INVALID_NODE_ID,
};
use crate::tree::sort::sort_leaf_entries;
use crate::tree::stats::{StatsSnapshot, TreeStats};
use crate::tree::{iqr, ResetCounter};

/// Fast-path tree with append-then-sort leaves.
pub type QuitAppendTree<'a> = QuitTree<'a, true>;

type PathVec<'m> = SmallVec<[(NodeId, BlockWriteGuard<'m>); 4]>;

/// Coherent fast-path tuple. `max` is the smallest parent separator
/// strictly above every key in the hot leaf; it is ignored while the hot
/// leaf is the tail. `life` tracks consecutive misses toward a hard reset.
struct FpState {
    id: NodeId,
    min: Key,
    max: Key,
    len: usize,
    life: ResetCounter,
}

/// Bounds and population of the leaf immediately preceding the hot leaf,
/// kept solely for the split-position chooser.
struct FpShadow {
    prev_id: NodeId,
    prev_min: Key,
    prev_len: usize,
}

pub struct QuitTree<'a, const APPEND: bool = false> {
    manager: &'a BlockManager,
    root_id: NodeId,
    head_id: NodeId,
    tail_id: AtomicU32,
    height: AtomicU8,
    fp: Mutex<FpState>,
    fp_shadow: Mutex<FpShadow>,
    /// Relaxed mirror of `fp.id` so read paths can special-case the hot
    /// leaf without touching the insert-hot mutex.
    fp_id_hint: AtomicU32,
    fp_sorted: AtomicBool,
    stats: TreeStats,
}

impl<'a, const APPEND: bool> QuitTree<'a, APPEND> {
    pub const NAME: &'static str = if APPEND { "quit-append" } else { "quit" };

    pub fn new(manager: &'a BlockManager) -> Self {
        let root_id = manager.allocate();
        let head_id = manager.allocate();

        {
            let mut leaf = manager.write(head_id);
            leaf.init_leaf(head_id, INVALID_NODE_ID);
            manager.mark_dirty(head_id);
        }
        {
            let mut root = manager.write(root_id);
            let node = root.init_internal(root_id);
            node.children[0] = head_id;
            manager.mark_dirty(root_id);
        }

        let stats = TreeStats::default();
        stats.inc_leaves();
        stats.inc_internals();

        Self {
            manager,
            root_id,
            head_id,
            tail_id: AtomicU32::new(head_id),
            height: AtomicU8::new(1),
            fp: Mutex::new(FpState {
                id: head_id,
                min: Key::MIN,
                max: Key::MAX,
                len: 0,
                life: ResetCounter::new(RESET_THRESHOLD),
            }),
            fp_shadow: Mutex::new(FpShadow {
                prev_id: INVALID_NODE_ID,
                prev_min: Key::MIN,
                prev_len: 0,
            }),
            fp_id_hint: AtomicU32::new(head_id),
            fp_sorted: AtomicBool::new(true),
            stats,
        }
    }

    pub fn insert(&self, key: Key, value: Value) {
        let mut fp_guard: MutexGuard<'_, FpState> = self.fp.lock();
        let tail = self.tail_id.load(Ordering::Acquire);

        let fast_hit = (fp_guard.id == self.head_id || fp_guard.min <= key)
            && (fp_guard.id == tail || key < fp_guard.max);

        if fast_hit {
            let guard = self.manager.write(fp_guard.id);
            fp_guard.life.success();

            let index = if APPEND {
                guard.as_leaf().len()
            } else {
                guard.as_leaf().value_slot(key)
            };
            let mut guard = match self.leaf_insert(guard, index, key, value, Some(&mut fp_guard)) {
                Ok(()) => {
                    self.stats.inc_fast_hits();
                    return;
                }
                Err(g) => g,
            };

            // Hot leaf is full and about to split: restore its ordering
            // while we still hold the exclusive latch.
            if APPEND && !self.fp_sorted.load(Ordering::Acquire) {
                self.sort_leaf_now(guard.as_leaf_mut());
                self.fp_sorted.store(true, Ordering::Release);
            }
            self.stats.inc_fast_fails();
            drop(guard);

            let (leaf, path, _leaf_max) = self.find_leaf_pessimistic(key);
            let index = leaf.as_leaf().value_slot(key);
            match self.leaf_insert(leaf, index, key, value, Some(&mut fp_guard)) {
                Ok(()) => drop(path),
                Err(leaf) => self.split_insert(leaf, index, path, key, value, Some(&mut fp_guard)),
            }
        } else {
            self.stats.inc_fast_fails();
            let reset = fp_guard.life.failure();

            if reset {
                self.stats.inc_hard_resets();
                // The stale hot leaf may be unsorted; fix it before any
                // other leaf latch is taken.
                if APPEND && !self.fp_sorted.load(Ordering::Acquire) {
                    let mut stale = self.manager.write(fp_guard.id);
                    self.sort_leaf_now(stale.as_leaf_mut());
                    self.fp_sorted.store(true, Ordering::Release);
                    self.manager.mark_dirty(fp_guard.id);
                }

                let (leaf, leaf_max) = self.find_leaf_optimistic(key);
                self.reset_fast_path(&mut fp_guard, leaf.as_leaf(), leaf_max);
                let index = leaf.as_leaf().value_slot(key);
                match self.leaf_insert(leaf, index, key, value, Some(&mut fp_guard)) {
                    Ok(()) => {}
                    Err(leaf) => {
                        drop(leaf);
                        let (leaf, path, _lm) = self.find_leaf_pessimistic(key);
                        let index = leaf.as_leaf().value_slot(key);
                        match self.leaf_insert(leaf, index, key, value, Some(&mut fp_guard)) {
                            Ok(()) => drop(path),
                            Err(leaf) => {
                                self.split_insert(leaf, index, path, key, value, Some(&mut fp_guard))
                            }
                        }
                    }
                }
            } else {
                // Release the fast path for other threads during our walk.
                drop(fp_guard);
                let (leaf, _leaf_max) = self.find_leaf_optimistic(key);
                let index = leaf.as_leaf().value_slot(key);
                match self.leaf_insert(leaf, index, key, value, None) {
                    Ok(()) => {}
                    Err(leaf) => {
                        // Every split coordinates with the fast path: a
                        // miss key below the hot leaf's cached minimum can
                        // still split the hot leaf itself, and its bounds
                        // must follow. Reacquire the fp mutex first (lock
                        // order fp → latches), with no latch held.
                        drop(leaf);
                        let mut fp_guard = self.fp.lock();
                        let (mut leaf, path, _lm) = self.find_leaf_pessimistic(key);
                        // The fast path may have moved while it was
                        // unlocked, so this full leaf can be the current
                        // hot leaf, still unsorted from appends. Restore
                        // its ordering before any positional work.
                        if APPEND
                            && leaf.header().id() == fp_guard.id
                            && !self.fp_sorted.load(Ordering::Acquire)
                        {
                            self.sort_leaf_now(leaf.as_leaf_mut());
                            self.fp_sorted.store(true, Ordering::Release);
                            self.manager.mark_dirty(fp_guard.id);
                        }
                        let index = leaf.as_leaf().value_slot(key);
                        match self.leaf_insert(leaf, index, key, value, Some(&mut fp_guard)) {
                            Ok(()) => drop(path),
                            Err(leaf) => {
                                self.split_insert(leaf, index, path, key, value, Some(&mut fp_guard))
                            }
                        }
                    }
                }
            }
        }
    }

    /// Overwrites the value for `key`; false when the key is absent.
    pub fn update(&self, key: Key, value: Value) -> bool {
        let (mut guard, _leaf_max) = self.find_leaf_optimistic(key);
        let leaf_id = guard.header().id();
        let sorted = !APPEND || leaf_id != self.fp_id_hint.load(Ordering::Acquire);
        let Some(index) = locate(guard.as_leaf(), key, sorted) else {
            return false;
        };
        self.manager.mark_dirty(leaf_id);
        guard.as_leaf_mut().values[index] = value;
        true
    }

    pub fn get(&self, key: Key) -> Option<Value> {
        let guard = self.find_leaf_shared(key);
        let leaf = guard.as_leaf();
        let sorted = !APPEND || leaf.header.id() != self.fp_id_hint.load(Ordering::Acquire);
        locate(leaf, key, sorted).map(|index| leaf.values[index])
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Counts `count` items forward from the leaf containing `min_key`;
    /// returns the number of leaf blocks visited.
    pub fn select_k(&self, mut count: usize, min_key: Key) -> u32 {
        let mut guard = self.find_leaf_shared(min_key);
        let mut loads = 1;
        let index = {
            let leaf = guard.as_leaf();
            let sorted = !APPEND || leaf.header.id() != self.fp_id_hint.load(Ordering::Acquire);
            if sorted {
                leaf.value_slot(min_key)
            } else {
                // Counting keys below min_key is the lower bound an
                // unsorted hot leaf cannot binary-search for.
                leaf.value_slot2(min_key)
            }
        };
        let mut available = guard.as_leaf().len().saturating_sub(index);
        while count > available {
            count -= available;
            let next_id = guard.as_leaf().header.next_id();
            if next_id == INVALID_NODE_ID {
                break;
            }
            guard = self.manager.read(next_id);
            available = guard.as_leaf().len();
            loads += 1;
        }
        loads
    }

    /// Walks leaves from the one containing `min_key` until a leaf's
    /// maximum reaches `max_key`; returns the leaf blocks visited.
    pub fn range(&self, min_key: Key, max_key: Key) -> u32 {
        let mut guard = self.find_leaf_shared(min_key);
        let mut loads = 1;
        loop {
            let leaf = guard.as_leaf();
            if leaf.len() == 0 {
                break;
            }
            let sorted = !APPEND || leaf.header.id() != self.fp_id_hint.load(Ordering::Acquire);
            let leaf_max = if sorted { leaf.max_key() } else { leaf.max_key_scan() };
            if leaf_max >= max_key {
                break;
            }
            let next_id = leaf.header.next_id();
            if next_id == INVALID_NODE_ID {
                break;
            }
            guard = self.manager.read(next_id);
            loads += 1;
        }
        loads
    }

    /// Every pair in key order; validation/test surface. Entries of an
    /// append-mode hot leaf are ordered within their chunk on the way out.
    pub fn scan_all(&self) -> Vec<(Key, Value)> {
        let mut out = Vec::with_capacity(self.len() as usize);
        let mut guard = self.manager.read(self.head_id);
        loop {
            let leaf = guard.as_leaf();
            let start = out.len();
            for i in 0..leaf.len() {
                out.push((leaf.keys[i], leaf.values[i]));
            }
            if APPEND {
                out[start..].sort_unstable_by_key(|(k, _)| *k);
            }
            let next_id = leaf.header.next_id();
            if next_id == INVALID_NODE_ID {
                break;
            }
            guard = self.manager.read(next_id);
        }
        out
    }

    /// Exhaustive walk from the root counting reachable nodes; used to
    /// cross-check the counters.
    pub fn recount(&self) -> (u32, u32) {
        let mut leaves = 0;
        let mut internals = 0;
        let mut stack = vec![self.root_id];
        while let Some(id) = stack.pop() {
            let guard = self.manager.read(id);
            match guard.kind() {
                NodeKind::Internal => {
                    internals += 1;
                    let node = guard.as_internal();
                    stack.extend_from_slice(&node.children[..node.len() + 1]);
                }
                _ => leaves += 1,
            }
        }
        (leaves, internals)
    }

    pub fn len(&self) -> u64 {
        self.stats.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.height.load(Ordering::Acquire))
    }

    fn sort_leaf_now(&self, leaf: &mut LeafNode) {
        let len = leaf.len();
        let LeafNode { keys, values, .. } = leaf;
        sort_leaf_entries(keys, values, len);
        self.stats.inc_sorts();
    }

    /// Shared-mode latch-coupled descent; returns the target leaf latched
    /// shared.
    fn find_leaf_shared(&self, key: Key) -> BlockReadGuard<'_> {
        let mut guard = self.manager.read(self.root_id);
        while guard.kind() == NodeKind::Internal {
            let node = guard.as_internal();
            let child = node.children[node.child_slot(key)];
            guard = self.manager.read(child);
        }
        guard
    }

    /// Optimistic exclusive descent: shared latches on internal levels,
    /// exclusive on the leaf. Also reports the tightest separator bound
    /// above the leaf's key range.
    fn find_leaf_optimistic(&self, key: Key) -> (BlockWriteGuard<'_>, Key) {
        let mut leaf_max = Key::MAX;
        let mut guard = self.manager.read(self.root_id);
        let mut level = self.height.load(Ordering::Acquire);
        while level > 1 {
            let node = guard.as_internal();
            let slot = node.child_slot(key);
            if slot < node.len() {
                leaf_max = node.keys[slot];
            }
            let child = node.children[slot];
            guard = self.manager.read(child);
            level -= 1;
        }
        let node = guard.as_internal();
        let slot = node.child_slot(key);
        if slot < node.len() {
            leaf_max = node.keys[slot];
        }
        let child = node.children[slot];
        let leaf = self.manager.write(child);
        drop(guard);
        (leaf, leaf_max)
    }

    /// Pessimistic exclusive descent with safe-ancestor release: every
    /// held ancestor is dropped once a node has room to absorb a
    /// separator. The returned path holds the still-latched ancestors,
    /// topmost first.
    fn find_leaf_pessimistic(&self, key: Key) -> (BlockWriteGuard<'_>, PathVec<'_>, Key) {
        let mut leaf_max = Key::MAX;
        let mut path = PathVec::new();
        let mut node_id = self.root_id;
        let mut guard = self.manager.write(node_id);
        loop {
            if guard.kind() != NodeKind::Internal {
                if !guard.as_leaf().is_full() {
                    path.clear();
                }
                return (guard, path, leaf_max);
            }
            if !guard.as_internal().is_full() {
                path.clear();
            }
            let node = guard.as_internal();
            let slot = node.child_slot(key);
            if slot < node.len() {
                leaf_max = node.keys[slot];
            }
            let child = node.children[slot];
            path.push((node_id, guard));
            guard = self.manager.write(child);
            node_id = child;
        }
    }

    /// Attempts an in-leaf insert. On success (including duplicate-key
    /// overwrite) the latch is released and `Ok` returned; a full leaf
    /// hands the latch back untouched.
    ///
    /// `fp` must be the locked fast-path state whenever the caller is on
    /// a fast-path flow; its population and the shadow metadata are kept
    /// coherent here.
    fn leaf_insert<'g>(
        &self,
        mut guard: BlockWriteGuard<'g>,
        index: usize,
        key: Key,
        value: Value,
        mut fp: Option<&mut FpState>,
    ) -> Result<(), BlockWriteGuard<'g>> {
        let leaf_id = guard.header().id();
        let len = guard.as_leaf().len();

        if index < len && guard.as_leaf().keys[index] == key {
            self.manager.mark_dirty(leaf_id);
            guard.as_leaf_mut().values[index] = value;
            return Ok(());
        }
        if len >= LEAF_CAPACITY {
            return Err(guard);
        }

        if APPEND {
            if let Some(fp) = fp.as_deref() {
                if leaf_id == fp.id
                    && index > 0
                    && self.fp_sorted.load(Ordering::Acquire)
                    && guard.as_leaf().keys[index - 1] > key
                {
                    self.fp_sorted.store(false, Ordering::Release);
                }
            }
        }

        self.stats.inc_size();
        self.manager.mark_dirty(leaf_id);
        guard.as_leaf_mut().insert_at(index, key, value);

        if let Some(fp) = fp.as_deref_mut() {
            if leaf_id == fp.id {
                fp.len += 1;
            } else if guard.header().next_id() == fp.id {
                // This leaf precedes the hot leaf; its changed population
                // feeds the next split decision.
                let mut shadow = self.fp_shadow.lock();
                shadow.prev_id = leaf_id;
                shadow.prev_min = guard.as_leaf().keys[0];
                shadow.prev_len = guard.as_leaf().len();
            }
        }

        Ok(())
    }

    /// Splits the latched full leaf, placing the incoming pair on the
    /// correct side, keeps fast-path and shadow metadata coherent, and
    /// bubbles the separator up the held path.
    fn split_insert(
        &self,
        mut leaf_guard: BlockWriteGuard<'_>,
        index: usize,
        path: PathVec<'_>,
        key: Key,
        value: Value,
        mut fp: Option<&mut FpState>,
    ) {
        self.stats.inc_size();
        let leaf_id = leaf_guard.header().id();

        let mut shadow_guard = fp.as_ref().map(|_| self.fp_shadow.lock());

        let mut split_pos = SPLIT_LEAF_POS;
        let mut fp_move = false;
        if let (Some(fp), Some(shadow)) = (fp.as_deref(), shadow_guard.as_deref()) {
            if leaf_id == fp.id {
                (split_pos, fp_move) =
                    determine_split_pos(leaf_guard.as_leaf(), index, fp, shadow);
            }
        }
        debug_assert!((1..=LEAF_CAPACITY).contains(&split_pos));

        let new_leaf_id = self.manager.allocate();
        let mut new_guard = self.manager.write(new_leaf_id);
        self.stats.inc_leaves();
        self.manager.mark_dirty(new_leaf_id);
        self.manager.mark_dirty(leaf_id);

        let right_len = LEAF_CAPACITY + 1 - split_pos;
        {
            let leaf = leaf_guard.as_leaf_mut();
            let new_leaf = new_guard.init_leaf(new_leaf_id, leaf.header.next_id());
            new_leaf.header.set_len(right_len);
            leaf.header.set_next_id(new_leaf_id);
            leaf.header.set_len(split_pos);

            if index < split_pos {
                new_leaf.keys[..right_len]
                    .copy_from_slice(&leaf.keys[split_pos - 1..LEAF_CAPACITY]);
                new_leaf.values[..right_len]
                    .copy_from_slice(&leaf.values[split_pos - 1..LEAF_CAPACITY]);
                leaf.keys.copy_within(index..split_pos - 1, index + 1);
                leaf.values.copy_within(index..split_pos - 1, index + 1);
                leaf.keys[index] = key;
                leaf.values[index] = value;
            } else {
                let new_index = index - split_pos;
                new_leaf.keys[..new_index].copy_from_slice(&leaf.keys[split_pos..index]);
                new_leaf.keys[new_index] = key;
                new_leaf.keys[new_index + 1..new_index + 1 + (LEAF_CAPACITY - index)]
                    .copy_from_slice(&leaf.keys[index..LEAF_CAPACITY]);
                new_leaf.values[..new_index].copy_from_slice(&leaf.values[split_pos..index]);
                new_leaf.values[new_index] = value;
                new_leaf.values[new_index + 1..new_index + 1 + (LEAF_CAPACITY - index)]
                    .copy_from_slice(&leaf.values[index..LEAF_CAPACITY]);
            }
        }

        if leaf_id == self.tail_id.load(Ordering::Acquire) {
            self.tail_id.store(new_leaf_id, Ordering::Release);
        }

        let separator = new_guard.as_leaf().keys[0];

        if let Some(fp) = fp.as_deref_mut() {
            let shadow = shadow_guard
                .as_deref_mut()
                .expect("shadow lock held on every fast-path split");
            if leaf_id == fp.id {
                if fp_move {
                    self.stats.inc_soft_resets();
                    shadow.prev_min = fp.min;
                    shadow.prev_len = split_pos;
                    shadow.prev_id = fp.id;
                    fp.id = new_leaf_id;
                    fp.min = separator;
                    fp.len = right_len;
                    self.fp_id_hint.store(new_leaf_id, Ordering::Release);
                } else {
                    self.stats.inc_redistributes();
                    fp.max = separator;
                    fp.len = split_pos;
                }
            } else if new_guard.header().next_id() == fp.id {
                // The split landed immediately left of the hot leaf; the
                // new sibling is now its predecessor.
                shadow.prev_id = new_leaf_id;
                shadow.prev_min = separator;
                shadow.prev_len = right_len;
            }
        }

        drop(shadow_guard);
        drop(new_guard);
        drop(leaf_guard);
        self.internal_insert(path, separator, new_leaf_id);
    }

    fn internal_insert(&self, mut path: PathVec<'_>, mut key: Key, mut child_id: NodeId) {
        let mut root_guard = None;
        while let Some((node_id, mut guard)) = path.pop() {
            let index = guard.as_internal().child_slot(key);
            self.manager.mark_dirty(node_id);

            if !guard.as_internal().is_full() {
                guard.as_internal_mut().insert_at(index, key, child_id);
                return;
            }

            let new_node_id = self.manager.allocate();
            let mut new_guard = self.manager.write(new_node_id);
            self.stats.inc_internals();
            self.manager.mark_dirty(new_node_id);

            {
                let node = guard.as_internal_mut();
                let new_node = new_guard.init_internal(new_node_id);
                let left_len = SPLIT_INTERNAL_POS;
                let right_len = INTERNAL_CAPACITY - left_len;
                node.header.set_len(left_len);
                new_node.header.set_len(right_len);

                if index < left_len {
                    new_node.keys[..right_len]
                        .copy_from_slice(&node.keys[left_len..INTERNAL_CAPACITY]);
                    node.keys.copy_within(index..left_len, index + 1);
                    node.keys[index] = key;
                    new_node.children[..right_len + 1]
                        .copy_from_slice(&node.children[left_len..INTERNAL_CAPACITY + 1]);
                    node.children.copy_within(index + 1..left_len + 2, index + 2);
                    node.children[index + 1] = child_id;
                    key = node.keys[left_len];
                } else if index == left_len {
                    new_node.keys[..right_len]
                        .copy_from_slice(&node.keys[left_len..INTERNAL_CAPACITY]);
                    new_node.children[1..right_len + 1]
                        .copy_from_slice(&node.children[left_len + 1..INTERNAL_CAPACITY + 1]);
                    new_node.children[0] = child_id;
                    // the incoming key is promoted unchanged
                } else {
                    let new_index = index - left_len;
                    new_node.keys[..new_index - 1]
                        .copy_from_slice(&node.keys[left_len + 1..index]);
                    new_node.keys[new_index - 1] = key;
                    new_node.keys[new_index..new_index + (INTERNAL_CAPACITY - index)]
                        .copy_from_slice(&node.keys[index..INTERNAL_CAPACITY]);
                    new_node.children[..new_index]
                        .copy_from_slice(&node.children[left_len + 1..index + 1]);
                    new_node.children[new_index] = child_id;
                    new_node.children[new_index + 1..right_len + 1]
                        .copy_from_slice(&node.children[index + 1..INTERNAL_CAPACITY + 1]);
                    key = node.keys[left_len];
                }
            }

            child_id = new_node_id;
            if node_id == self.root_id {
                root_guard = Some(guard);
            }
        }

        let root_guard = root_guard.expect("split propagated past an unlatched root");
        self.create_new_root(key, child_id, root_guard);
    }

    /// Grows the tree by one level: the old root's contents move into a
    /// fresh left child, and the root becomes a one-separator node over
    /// the two halves. The root's block id never changes.
    fn create_new_root(&self, key: Key, right_id: NodeId, mut root_guard: BlockWriteGuard<'_>) {
        let left_id = self.manager.allocate();
        let mut left_guard = self.manager.write(left_id);
        self.stats.inc_internals();

        left_guard.copy_from(&root_guard);
        left_guard.header_mut().set_id(left_id);
        self.manager.mark_dirty(left_id);
        self.manager.mark_dirty(self.root_id);

        let root = root_guard.as_internal_mut();
        root.header.set_len(1);
        root.keys[0] = key;
        root.children[0] = left_id;
        root.children[1] = right_id;
        self.height.fetch_add(1, Ordering::AcqRel);
    }

    /// Repoints the fast path at the freshly located leaf after the miss
    /// budget is spent. The caller holds the fp mutex and the leaf's
    /// exclusive latch; an unsorted stale hot leaf has already been
    /// sorted.
    fn reset_fast_path(&self, fp: &mut FpState, leaf: &LeafNode, leaf_max: Key) {
        let mut shadow = self.fp_shadow.lock();
        if fp.id != self.tail_id.load(Ordering::Acquire)
            && leaf.len() > 0
            && leaf.keys[0] == fp.max
        {
            // The new hot leaf is the old one's successor: the old fast
            // path is exactly the shadow the split chooser wants.
            shadow.prev_id = fp.id;
            shadow.prev_len = fp.len;
            shadow.prev_min = fp.min;
        } else {
            shadow.prev_id = INVALID_NODE_ID;
        }
        drop(shadow);

        fp.id = leaf.header.id();
        fp.min = if leaf.len() > 0 { leaf.keys[0] } else { Key::MIN };
        fp.max = leaf_max;
        fp.len = leaf.len();
        fp.life.reset();
        self.fp_id_hint.store(fp.id, Ordering::Release);
    }
}

fn locate(leaf: &LeafNode, key: Key, sorted: bool) -> Option<usize> {
    if sorted {
        let index = leaf.value_slot(key);
        (index < leaf.len() && leaf.keys[index] == key).then_some(index)
    } else {
        leaf.keys[..leaf.len()].iter().position(|&k| k == key)
    }
}

/// Chooses where the full hot leaf splits. The previous leaf's key-range
/// width, projected through the fence estimator, marks the first outlier
/// slot; few early outliers mean the hot region keeps its leaf, a long
/// in-fence prefix means the region migrates to the new sibling.
fn determine_split_pos(
    leaf: &LeafNode,
    index: usize,
    fp: &FpState,
    shadow: &FpShadow,
) -> (usize, bool) {
    if shadow.prev_id == INVALID_NODE_ID || shadow.prev_len < IQR_SIZE_THRESH {
        return (SPLIT_LEAF_POS, true);
    }

    let width = fp.min.saturating_sub(shadow.prev_min);
    let max_distance = iqr::upper_bound(width, shadow.prev_len, fp.len);
    let outlier_pos = leaf.value_slot2(fp.min.saturating_add(max_distance));

    let (mut split_pos, fp_move) = if outlier_pos <= SPLIT_LEAF_POS {
        (outlier_pos, false)
    } else {
        (
            (outlier_pos - OUTLIER_SPLIT_MARGIN).max(SPLIT_LEAF_POS),
            true,
        )
    };
    if index < outlier_pos {
        split_pos += 1;
    }
    (split_pos.clamp(1, LEAF_CAPACITY), fp_move)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let manager = BlockManager::new(64);
        let tree: QuitTree = QuitTree::new(&manager);

        tree.insert(10, 100);
        tree.insert(5, 50);
        tree.insert(20, 200);

        assert_eq!(tree.get(5), Some(50));
        assert_eq!(tree.get(10), Some(100));
        assert_eq!(tree.get(20), Some(200));
        assert_eq!(tree.get(15), None);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn duplicate_insert_updates_in_place() {
        let manager = BlockManager::new(16);
        let tree: QuitTree = QuitTree::new(&manager);

        tree.insert(7, 1);
        tree.insert(7, 2);
        tree.insert(7, 3);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(7), Some(3));
    }

    #[test]
    fn ascending_load_is_mostly_fast_path() {
        let manager = BlockManager::new(4096);
        let tree: QuitTree = QuitTree::new(&manager);

        let n = 10_000u64;
        for k in 0..n {
            tree.insert(k, k * 2);
        }

        assert_eq!(tree.len(), n);
        let snap = tree.stats_snapshot();
        assert!(
            snap.fast_hits as u64 >= n - 100,
            "fast hits {} too low",
            snap.fast_hits
        );
        assert_eq!(snap.fast_hits + snap.fast_fails, n as u32);

        let keys: Vec<Key> = tree.scan_all().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn descending_load_forces_hard_resets() {
        let manager = BlockManager::new(4096);
        let tree: QuitTree = QuitTree::new(&manager);

        let n = 10_000u64;
        for k in (1..=n).rev() {
            tree.insert(k, k);
        }

        assert_eq!(tree.len(), n);
        assert!(tree.stats_snapshot().hard_resets > 0);
        let keys: Vec<Key> = tree.scan_all().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (1..=n).collect::<Vec<_>>());
    }

    #[test]
    fn counters_match_recount() {
        let manager = BlockManager::new(4096);
        let tree: QuitTree = QuitTree::new(&manager);

        for k in 0..30_000u64 {
            tree.insert(k.wrapping_mul(2654435761) % 1_000_003, k);
        }

        let (leaves, internals) = tree.recount();
        let snap = tree.stats_snapshot();
        assert_eq!(snap.leaves, leaves);
        assert_eq!(snap.internals, internals);
    }

    #[test]
    fn split_separator_is_right_leaf_minimum() {
        let manager = BlockManager::new(256);
        let tree: QuitTree = QuitTree::new(&manager);

        for k in 0..=(LEAF_CAPACITY as u64) {
            tree.insert(k, k);
        }

        // One split happened; both leaves populated, order preserved.
        let snap = tree.stats_snapshot();
        assert_eq!(snap.leaves, 2);
        let scanned = tree.scan_all();
        assert_eq!(scanned.len(), LEAF_CAPACITY + 1);
        assert!(scanned.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn append_mode_sorts_before_reads_see_disorder() {
        let manager = BlockManager::new(4096);
        let tree: QuitAppendTree = QuitTree::new(&manager);

        // Out-of-order burst inside one leaf range.
        for k in [50u64, 10, 40, 20, 30, 25, 5, 45] {
            tree.insert(k, k);
        }
        for k in [50u64, 10, 40, 20, 30, 25, 5, 45] {
            assert!(tree.contains(k), "missing {k}");
        }
        assert_eq!(tree.len(), 8);

        let keys: Vec<Key> = tree.scan_all().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![5, 10, 20, 25, 30, 40, 45, 50]);
    }

    #[test]
    fn append_mode_survives_splits() {
        let manager = BlockManager::new(4096);
        let tree: QuitAppendTree = QuitTree::new(&manager);

        let n = 5_000u64;
        for k in 0..n {
            tree.insert(k, k + 1);
        }
        for k in 0..n {
            assert_eq!(tree.get(k), Some(k + 1));
        }
        let keys: Vec<Key> = tree.scan_all().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn select_k_counts_by_scan_on_unsorted_hot_leaf() {
        let manager = BlockManager::new(256);
        let tree: QuitAppendTree = QuitTree::new(&manager);

        // Fill one leaf with even keys and overflow it: the split leaves
        // the odd gaps open in the left leaf, and the fast path migrates
        // to the right sibling.
        let mut keys: Vec<Key> = Vec::new();
        for i in 0..=LEAF_CAPACITY as u64 {
            tree.insert(i * 2, i);
            keys.push(i * 2);
        }
        let separator = 2 * SPLIT_LEAF_POS as u64;

        // Odd keys below the separator all miss; the last one trips the
        // hard reset, repointing the fast path at the left (head) leaf.
        for i in 0..RESET_THRESHOLD as u64 {
            tree.insert(2 * i + 1, i);
            keys.push(2 * i + 1);
        }

        // Out-of-order fast appends leave the non-tail hot leaf unsorted.
        for k in [201u64, 151] {
            tree.insert(k, k);
            keys.push(k);
        }
        assert!(!tree.fp_sorted.load(Ordering::Acquire));
        assert_ne!(
            tree.fp_id_hint.load(Ordering::Acquire),
            tree.tail_id.load(Ordering::Acquire)
        );

        // The probe sits below the appended strays, so only a scan can
        // count the hot leaf's remainder correctly.
        let probe = 220u64;
        let in_leaf_at_or_after = keys
            .iter()
            .filter(|&&k| k < separator && k >= probe)
            .count();
        assert_eq!(tree.select_k(in_leaf_at_or_after, probe), 1);
        assert_eq!(tree.select_k(in_leaf_at_or_after + 1, probe), 2);
        assert_eq!(tree.select_k(keys.len() + 1, 0), 2);
    }

    #[test]
    fn update_misses_absent_keys() {
        let manager = BlockManager::new(64);
        let tree: QuitTree = QuitTree::new(&manager);

        assert!(!tree.update(1, 9));
        tree.insert(1, 2);
        assert!(tree.update(1, 9));
        assert_eq!(tree.get(1), Some(9));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn determine_split_pos_migrates_without_shadow() {
        let manager = BlockManager::new(16);
        let tree: QuitTree = QuitTree::new(&manager);
        for k in 0..LEAF_CAPACITY as u64 {
            tree.insert(k, k);
        }

        let guard = tree.manager.read(tree.head_id);
        let fp = FpState {
            id: tree.head_id,
            min: 0,
            max: Key::MAX,
            len: LEAF_CAPACITY,
            life: ResetCounter::new(RESET_THRESHOLD),
        };
        let shadow = FpShadow {
            prev_id: INVALID_NODE_ID,
            prev_min: 0,
            prev_len: 0,
        };
        let (pos, moved) = determine_split_pos(guard.as_leaf(), LEAF_CAPACITY, &fp, &shadow);
        assert_eq!(pos, SPLIT_LEAF_POS);
        assert!(moved);
    }

    #[test]
    fn determine_split_pos_retains_on_early_outliers() {
        let manager = BlockManager::new(16);
        let tree: QuitTree = QuitTree::new(&manager);
        // Dense prefix at the hot range, then a far outlier tail, all in
        // one leaf.
        for k in 1000..1100u64 {
            tree.insert(k, k);
        }
        for k in 0..(LEAF_CAPACITY as u64 - 100) {
            tree.insert(1_000_000 + k, k);
        }

        let guard = tree.manager.read(tree.head_id);
        let fp = FpState {
            id: tree.head_id,
            min: 1000,
            max: Key::MAX,
            len: LEAF_CAPACITY,
            life: ResetCounter::new(RESET_THRESHOLD),
        };
        // Neighbour spanned [0, 1000) with a healthy population: the
        // fence lands past the dense prefix but well before the tail.
        let shadow = FpShadow {
            prev_id: 99,
            prev_min: 0,
            prev_len: IQR_SIZE_THRESH,
        };
        let (pos, moved) = determine_split_pos(guard.as_leaf(), 0, &fp, &shadow);
        assert!(!moved);
        // 100 in-fence keys, plus one for the incoming index below them.
        assert_eq!(pos, 101);
    }
}
