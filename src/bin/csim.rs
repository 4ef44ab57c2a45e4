use std::io::{Write, stdout};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use csim::config::CacheConfig;
use csim::lru::LruCache;
use csim::simulation::Simulation;
use csim::trace::Trace;

/// Replays a valgrind memory trace against a set-associative LRU cache.
#[derive(Parser, Debug)]
#[command(name = "csim", version)]
struct Cli {
    /// Number of set index bits (the cache has 2^s sets)
    #[arg(short = 's', value_name = "s")]
    set_index_bits: u32,

    /// Associativity (number of lines per set)
    #[arg(short = 'E', value_name = "E")]
    lines_per_set: usize,

    /// Number of block offset bits (blocks are 2^b bytes)
    #[arg(short = 'b', value_name = "b")]
    block_offset_bits: u32,

    /// Valgrind trace to replay
    #[arg(short = 't', value_name = "tracefile")]
    trace: PathBuf,

    /// Print the outcome of every record
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Also write "<hits> <misses> <evictions>" to this file
    #[arg(long, value_name = "FILE")]
    results: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let config = CacheConfig::new(
        cli.set_index_bits,
        cli.lines_per_set,
        cli.block_offset_bits,
    )
    .context("invalid cache configuration")?;
    let lru_cache = LruCache::new(config).context("invalid cache configuration")?;
    debug!("{}", lru_cache.format_info());

    let trace = Trace::open(&cli.trace)
        .with_context(|| format!("unable to open trace file {}", cli.trace.display()))?;

    let mut stdout = stdout().lock();
    let mut simulation = Simulation::new(lru_cache, cli.verbose);
    let stats = simulation
        .replay(trace, &mut stdout)
        .with_context(|| format!("failed to replay {}", cli.trace.display()))?;

    writeln!(stdout, "{stats}")?;
    info!(
        "Percent Hits: {:.3}%, Percent Misses: {:.3}%",
        stats.percent_hit(),
        stats.percent_miss()
    );

    if let Some(path) = cli.results {
        std::fs::write(
            &path,
            format!("{} {} {}\n", stats.hits, stats.misses, stats.evictions),
        )
        .with_context(|| format!("unable to write results to {}", path.display()))?;
    }

    Ok(())
}
