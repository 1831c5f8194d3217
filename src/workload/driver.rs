//! # Phase Driver
//!
//! Runs the benchmark phases against a tree, in order: preload, raw
//! writes, mixed read/write interleave, raw reads, updates, then three
//! range tiers targeting 1/1000, 1/100 and 1/10 of the load per query.
//! Every phase is timed in nanoseconds and appended to the CSV row;
//! phases with zero work contribute no columns. The row ends with the
//! tree's self-report.

use std::path::Path;
use std::time::Instant;

use eyre::Result;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{error, info};

use crate::config::Config;
use crate::storage::{Key, Value};
use crate::tree::stats::StatsSnapshot;
use crate::tree::{LilTree, QuitTree};
use crate::workload::report::ResultsWriter;
use crate::workload::ticket::work;

/// The operation surface the driver exercises. Concurrent trees implement
/// it natively; the single-threaded baseline sits behind a mutex.
pub trait TreeIndex: Sync {
    fn label(&self) -> &'static str;
    fn insert(&self, key: Key, value: Value);
    fn update(&self, key: Key, value: Value) -> bool;
    fn contains(&self, key: Key) -> bool;
    fn select_k(&self, count: usize, min_key: Key) -> u32;
    fn range(&self, min_key: Key, max_key: Key) -> u32;
    fn stats(&self) -> StatsSnapshot;
}

impl<const APPEND: bool> TreeIndex for QuitTree<'_, APPEND> {
    fn label(&self) -> &'static str {
        Self::NAME
    }
    fn insert(&self, key: Key, value: Value) {
        QuitTree::insert(self, key, value);
    }
    fn update(&self, key: Key, value: Value) -> bool {
        QuitTree::update(self, key, value)
    }
    fn contains(&self, key: Key) -> bool {
        QuitTree::contains(self, key)
    }
    fn select_k(&self, count: usize, min_key: Key) -> u32 {
        QuitTree::select_k(self, count, min_key)
    }
    fn range(&self, min_key: Key, max_key: Key) -> u32 {
        QuitTree::range(self, min_key, max_key)
    }
    fn stats(&self) -> StatsSnapshot {
        self.stats_snapshot()
    }
}

/// Baseline adapter: meaningful only at one worker thread, where the lock
/// is uncontended.
impl TreeIndex for Mutex<LilTree<'_>> {
    fn label(&self) -> &'static str {
        LilTree::NAME
    }
    fn insert(&self, key: Key, value: Value) {
        self.lock().insert(key, value);
    }
    fn update(&self, key: Key, value: Value) -> bool {
        self.lock().update(key, value)
    }
    fn contains(&self, key: Key) -> bool {
        self.lock().contains(key)
    }
    fn select_k(&self, count: usize, min_key: Key) -> u32 {
        self.lock().select_k(count, min_key)
    }
    fn range(&self, min_key: Key, max_key: Key) -> u32 {
        self.lock().range(min_key, max_key)
    }
    fn stats(&self) -> StatsSnapshot {
        self.lock().stats_snapshot()
    }
}

pub struct Workload<'c> {
    conf: &'c Config,
    offset: Key,
    rng: ChaCha8Rng,
}

impl<'c> Workload<'c> {
    pub fn new(conf: &'c Config) -> Self {
        Self {
            conf,
            offset: 0,
            rng: ChaCha8Rng::seed_from_u64(conf.seed),
        }
    }

    /// Runs every input file `REPEAT` times against the tree, appending
    /// one CSV row per file pass.
    pub fn run_all<T: TreeIndex>(
        &mut self,
        tree: &T,
        writer: &mut ResultsWriter,
        data_sets: &[(&Path, Vec<Key>)],
    ) -> Result<()> {
        for _ in 0..self.conf.repeat {
            for (path, data) in data_sets {
                self.run(tree, writer, path, data)?;
            }
        }
        Ok(())
    }

    fn run<T: TreeIndex>(
        &mut self,
        tree: &T,
        writer: &mut ResultsWriter,
        path: &Path,
        data: &[Key],
    ) -> Result<()> {
        let conf = self.conf;
        let num_inserts = data.len();
        let raw_writes = num_inserts * conf.raw_write_perc as usize / 100;
        let mixed_writes = num_inserts * conf.mixed_writes_perc as usize / 100;
        let mixed_reads = num_inserts * conf.mixed_reads_perc as usize / 100;
        let raw_queries = num_inserts * conf.raw_read_perc as usize / 100;
        let num_updates = num_inserts * conf.updates_perc as usize / 100;
        assert!(
            num_inserts >= raw_writes + mixed_writes,
            "write percentages exceed the input size"
        );
        let num_load = num_inserts - raw_writes - mixed_writes;

        let stem = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut row = format!(
            "{}, {}, {}, {}",
            tree.label(),
            conf.num_threads,
            stem,
            self.offset
        );

        self.run_preload(tree, data, num_load, &mut row);
        self.run_writes(tree, data, num_load, raw_writes, &mut row);
        self.run_mixed(tree, data, num_load + raw_writes, mixed_writes, mixed_reads, &mut row);
        self.run_reads(tree, data, num_inserts, raw_queries, &mut row);
        self.run_updates(tree, data, num_inserts, num_updates, &mut row);
        self.run_range(tree, data, num_inserts, conf.short_range, 1000, &mut row);
        self.run_range(tree, data, num_inserts, conf.mid_range, 100, &mut row);
        self.run_range(tree, data, num_inserts, conf.long_range, 10, &mut row);

        if conf.validate {
            self.validate(tree, data);
        }

        row.push_str(", ");
        row.push_str(&tree.stats().csv_columns());
        writer.write_row(&row)
    }

    fn run_preload<T: TreeIndex>(&self, tree: &T, data: &[Key], num_load: usize, row: &mut String) {
        if num_load == 0 {
            return;
        }
        if self.conf.verbose {
            info!(phase = "preload", count = num_load);
        }
        let offset = self.offset;
        let elapsed = work(0, num_load, self.conf.num_threads, |idx| {
            tree.insert(data[idx] + offset, idx as Value);
        });
        row.push_str(&format!(", {}", elapsed.as_nanos()));
    }

    fn run_writes<T: TreeIndex>(
        &self,
        tree: &T,
        data: &[Key],
        begin: usize,
        raw_writes: usize,
        row: &mut String,
    ) {
        if raw_writes == 0 {
            return;
        }
        if self.conf.verbose {
            info!(phase = "raw_writes", count = raw_writes);
        }
        let offset = self.offset;
        let elapsed = work(begin, begin + raw_writes, self.conf.num_threads, |idx| {
            tree.insert(data[idx] + offset, idx as Value);
        });
        row.push_str(&format!(", {}", elapsed.as_nanos()));
    }

    /// Single-threaded coin-flip interleave of inserts and (mostly
    /// missing) point lookups; reports the empty-lookup count alongside
    /// the duration.
    fn run_mixed<T: TreeIndex>(
        &mut self,
        tree: &T,
        data: &[Key],
        begin: usize,
        mixed_writes: usize,
        mixed_reads: usize,
        row: &mut String,
    ) {
        if mixed_writes == 0 && mixed_reads == 0 {
            return;
        }
        if self.conf.verbose {
            info!(phase = "mixed", writes = mixed_writes, reads = mixed_reads);
        }
        let offset = self.offset;
        let mut empty = 0u32;
        let mut inserts = 0usize;
        let mut queries = 0usize;
        let start = Instant::now();
        while inserts < mixed_writes || queries < mixed_reads {
            if queries >= mixed_reads || (inserts < mixed_writes && self.rng.gen_bool(0.5)) {
                let idx = begin + inserts;
                tree.insert(data[idx] + offset, idx as Value);
                inserts += 1;
            } else {
                let bound = (begin + inserts).max(1) as u64;
                let probe = self.rng.gen::<u64>() % bound + offset;
                if !tree.contains(probe) {
                    empty += 1;
                }
                queries += 1;
            }
        }
        let elapsed = start.elapsed();
        row.push_str(&format!(", {}, {}", elapsed.as_nanos(), empty));
    }

    fn run_reads<T: TreeIndex>(
        &mut self,
        tree: &T,
        data: &[Key],
        num_inserts: usize,
        raw_queries: usize,
        row: &mut String,
    ) {
        if raw_queries == 0 {
            return;
        }
        if self.conf.verbose {
            info!(phase = "raw_reads", count = raw_queries);
        }
        let offset = self.offset;
        let queries: Vec<Key> = (0..raw_queries)
            .map(|_| data[self.rng.gen_range(0..num_inserts)] + offset)
            .collect();
        let elapsed = work(0, raw_queries, self.conf.num_threads, |idx| {
            tree.contains(queries[idx]);
        });
        row.push_str(&format!(", {}", elapsed.as_nanos()));
    }

    fn run_updates<T: TreeIndex>(
        &mut self,
        tree: &T,
        data: &[Key],
        num_inserts: usize,
        num_updates: usize,
        row: &mut String,
    ) {
        if num_updates == 0 {
            return;
        }
        if self.conf.verbose {
            info!(phase = "updates", count = num_updates);
        }
        let offset = self.offset;
        let targets: Vec<Key> = (0..num_updates)
            .map(|_| data[self.rng.gen_range(0..num_inserts)] + offset)
            .collect();
        let elapsed = work(0, num_updates, self.conf.num_threads, |idx| {
            tree.update(targets[idx], idx as Value);
        });
        row.push_str(&format!(", {}", elapsed.as_nanos()));
    }

    /// `count` range queries, each counting `num_inserts / size` items
    /// forward from a sampled start key. Reports duration and the
    /// ceil-averaged leaf accesses per query.
    fn run_range<T: TreeIndex>(
        &mut self,
        tree: &T,
        data: &[Key],
        num_inserts: usize,
        count: usize,
        size: usize,
        row: &mut String,
    ) {
        if count == 0 {
            return;
        }
        let k = num_inserts / size;
        if num_inserts <= k + 1 {
            return;
        }
        if self.conf.verbose {
            info!(phase = "range", count, items_per_query = k);
        }
        let offset = self.offset;
        let mut leaf_accesses = 0u64;
        let start = Instant::now();
        for _ in 0..count {
            let min_key = data[self.rng.gen_range(0..num_inserts - k - 1)] + offset;
            leaf_accesses += tree.select_k(k, min_key) as u64;
        }
        let elapsed = start.elapsed();
        let per_query = leaf_accesses.div_ceil(count as u64);
        row.push_str(&format!(", {}, {}", elapsed.as_nanos(), per_query));
    }

    fn validate<T: TreeIndex>(&self, tree: &T, data: &[Key]) {
        let missing = data
            .iter()
            .filter(|&&key| !tree.contains(key + self.offset))
            .count();
        if missing > 0 {
            error!(missing, "validation failed: inserted keys not found");
        } else {
            info!("validation passed: every inserted key found");
        }
    }
}
