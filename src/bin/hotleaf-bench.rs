//! Benchmark driver: loads the configuration and the key files, then runs
//! the selected tree through the workload phases `RUNS` times over a
//! shared block arena, appending one CSV row per file pass.

use clap::Parser;
use eyre::{ensure, Result};
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hotleaf::config::{self, Args, Config, TreeVariant};
use hotleaf::keyset;
use hotleaf::storage::{BlockManager, Key};
use hotleaf::tree::{LilTree, QuitTree};
use hotleaf::workload::{ResultsWriter, TreeIndex, Workload};

fn main() -> Result<()> {
    let args = Args::parse();
    let conf = config::resolve(args)?;

    let default_level = if conf.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    ensure!(!conf.files.is_empty(), "no input key files given");
    if conf.tree == TreeVariant::Lil && conf.num_threads > 1 {
        warn!("the lil baseline serializes on a whole-tree mutex; use --num-threads 1");
    }

    info!(
        tree = conf.tree.name(),
        threads = conf.num_threads,
        blocks = conf.blocks_in_memory,
        results = %conf.results_csv.display(),
        "starting benchmark"
    );

    let mut data_sets = Vec::with_capacity(conf.files.len());
    for path in &conf.files {
        let keys = if conf.binary_input {
            keyset::read_binary(path)?
        } else {
            keyset::read_text(path)?
        };
        info!(file = %path.display(), keys = keys.len(), "loaded key file");
        data_sets.push((path.as_path(), keys));
    }

    let mut writer = ResultsWriter::append(&conf.results_csv)?;
    let mut manager = BlockManager::new(conf.blocks_in_memory);

    for run in 0..conf.runs {
        info!(run, "starting run");
        manager.reset();
        match conf.tree {
            TreeVariant::Quit => {
                let tree = QuitTree::<false>::new(&manager);
                run_one(&conf, &tree, &mut writer, &data_sets)?;
            }
            TreeVariant::QuitAppend => {
                let tree = QuitTree::<true>::new(&manager);
                run_one(&conf, &tree, &mut writer, &data_sets)?;
            }
            TreeVariant::Lil => {
                let tree = Mutex::new(LilTree::new(&manager));
                run_one(&conf, &tree, &mut writer, &data_sets)?;
            }
        }
    }
    Ok(())
}

fn run_one<T: TreeIndex>(
    conf: &Config,
    tree: &T,
    writer: &mut ResultsWriter,
    data_sets: &[(&std::path::Path, Vec<Key>)],
) -> Result<()> {
    let mut workload = Workload::new(conf);
    workload.run_all(tree, writer, data_sets)?;
    let stats = tree.stats();
    info!(
        size = stats.size,
        height = stats.height,
        leaves = stats.leaves,
        internals = stats.internals,
        fast_hits = stats.fast_hits,
        hard_resets = stats.hard_resets,
        "run complete"
    );
    Ok(())
}
