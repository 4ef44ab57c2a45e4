use std::io::{BufRead, Write};
use std::ops::AddAssign;

use log::{debug, trace, warn};

use crate::lru::{AccessOutcome, LruCache};
use crate::trace::{AccessRecord, MalformedRecord, Trace, TraceError};

#[derive(Debug)]
pub enum SimulationError {
    TraceUnavailable(std::io::Error),
    Output(std::io::Error),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::TraceUnavailable(e) => {
                f.write_fmt(format_args!("failed to read access trace: {e}"))
            }
            SimulationError::Output(e) => f.write_fmt(format_args!("failed to write output: {e}")),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::TraceUnavailable(e) | SimulationError::Output(e) => Some(e),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl Stats {
    fn record(&mut self, outcome: AccessOutcome) {
        match outcome {
            AccessOutcome::Hit => self.hits += 1,
            AccessOutcome::MissNoEviction => self.misses += 1,
            AccessOutcome::MissWithEviction { .. } => {
                self.misses += 1;
                self.evictions += 1;
            }
        }
    }

    pub fn accesses(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn percent_hit(&self) -> f64 {
        self.percent_of(self.hits)
    }

    pub fn percent_miss(&self) -> f64 {
        self.percent_of(self.misses)
    }

    fn percent_of(&self, count: u64) -> f64 {
        match self.accesses() {
            0 => 0.0,
            accesses => 100.0 * count as f64 / accesses as f64,
        }
    }

    /// Outcome words of a single record, as printed in verbose mode:
    /// the miss (with its eviction) always precedes the hits.
    fn describe(&self) -> String {
        let mut words = Vec::new();
        words.extend(std::iter::repeat_n("miss", self.misses as usize));
        words.extend(std::iter::repeat_n("eviction", self.evictions as usize));
        words.extend(std::iter::repeat_n("hit", self.hits as usize));
        words.join(" ")
    }
}

impl AddAssign for Stats {
    fn add_assign(&mut self, rhs: Self) {
        self.hits += rhs.hits;
        self.misses += rhs.misses;
        self.evictions += rhs.evictions;
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "hits:{} misses:{} evictions:{}",
            self.hits, self.misses, self.evictions
        ))
    }
}

/// Replays one record against `cache` and returns what it added to the counters.
///
/// A `Modify` is a load followed by a store to the same block. The store
/// always hits, since the load has just installed or refreshed the line.
pub fn process(record: &AccessRecord, cache: &mut LruCache) -> Result<Stats, MalformedRecord> {
    if record.size == 0 {
        return Err(MalformedRecord::ZeroSize(*record));
    }

    let (set_index, tag) = cache.config().decompose(record.address);

    let mut delta = Stats::default();
    for _ in 0..record.kind.accesses() {
        let outcome = cache.access(set_index, tag);
        trace!("{record}: set={set_index} tag={tag:#x} {outcome}");
        delta.record(outcome);
    }

    Ok(delta)
}

#[derive(Debug, Clone)]
pub struct Simulation {
    cache: LruCache,
    stats: Stats,
    verbose: bool,
}

impl Simulation {
    /// With `verbose` set, [`Simulation::replay`] writes one line per record.
    pub fn new(cache: LruCache, verbose: bool) -> Self {
        Self {
            cache,
            stats: Stats::default(),
            verbose,
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn cache(&self) -> &LruCache {
        &self.cache
    }

    pub fn step(&mut self, record: &AccessRecord) -> Result<Stats, MalformedRecord> {
        let delta = process(record, &mut self.cache)?;
        self.stats += delta;
        Ok(delta)
    }

    /// Replays `trace` in order. Malformed records are skipped, an unreadable
    /// trace ends the replay with the counters gathered so far left in place.
    pub fn replay<R: BufRead>(
        &mut self,
        trace: Trace<R>,
        out: &mut impl Write,
    ) -> Result<Stats, SimulationError> {
        let mut skipped = 0usize;

        for item in trace {
            let result = match item {
                Ok(record) => self.step(&record).map(|delta| (record, delta)),
                Err(TraceError::Malformed(e)) => Err(e),
                Err(TraceError::Unavailable(e)) => {
                    return Err(SimulationError::TraceUnavailable(e));
                }
            };

            match result {
                Ok((record, delta)) => {
                    if self.verbose {
                        writeln!(out, "{record} {}", delta.describe())
                            .map_err(SimulationError::Output)?;
                    }
                }
                Err(e) => {
                    skipped += 1;
                    warn!("skipping malformed record: {e}");
                }
            }
        }

        debug!(
            "replayed {} accesses, {skipped} records skipped, {:.3}% hits",
            self.stats.accesses(),
            self.stats.percent_hit()
        );

        Ok(self.stats)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CacheConfig;
    use crate::trace::AccessKind;

    fn cache(s: u32, e: usize, b: u32) -> LruCache {
        LruCache::new(CacheConfig::new(s, e, b).unwrap()).unwrap()
    }

    fn record(kind: AccessKind, address: u64) -> AccessRecord {
        AccessRecord {
            kind,
            address,
            size: 1,
        }
    }

    fn stats(hits: u64, misses: u64, evictions: u64) -> Stats {
        Stats {
            hits,
            misses,
            evictions,
        }
    }

    #[test]
    fn load_and_store_access_once() {
        let mut cache = cache(1, 1, 2);

        assert_eq!(
            process(&record(AccessKind::Load, 0x0), &mut cache),
            Ok(stats(0, 1, 0))
        );
        assert_eq!(
            process(&record(AccessKind::Store, 0x3), &mut cache),
            Ok(stats(1, 0, 0))
        );
        assert_eq!(
            process(&record(AccessKind::Store, 0x8), &mut cache),
            Ok(stats(0, 1, 1))
        );
    }

    #[test]
    fn modify_adds_a_guaranteed_hit() {
        let mut cache = cache(0, 1, 0);

        assert_eq!(
            process(&record(AccessKind::Modify, 0x10), &mut cache),
            Ok(stats(1, 1, 0))
        );
        assert_eq!(
            process(&record(AccessKind::Modify, 0x10), &mut cache),
            Ok(stats(2, 0, 0))
        );
        // the eviction is counted once
        assert_eq!(
            process(&record(AccessKind::Modify, 0x20), &mut cache),
            Ok(stats(1, 1, 1))
        );
    }

    #[test]
    fn zero_size_is_rejected_without_touching_the_cache() {
        let mut cache = cache(0, 1, 0);
        let zero = AccessRecord {
            kind: AccessKind::Load,
            address: 0x10,
            size: 0,
        };

        assert_eq!(
            process(&zero, &mut cache),
            Err(MalformedRecord::ZeroSize(zero))
        );
        assert!(!cache.lines(0)[0].valid);
    }

    #[test]
    fn verbose_replay_describes_each_record() {
        let mut simulation = Simulation::new(cache(0, 1, 0), true);
        let trace = Trace::new(" L 10,1\n M 20,1\n L 20,1\n S 10,0\n".as_bytes());
        let mut out = Vec::new();

        let totals = simulation.replay(trace, &mut out).unwrap();

        assert_eq!(totals, stats(2, 2, 1));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "L 10,1 miss\nM 20,1 miss eviction hit\nL 20,1 hit\n"
        );
    }

    #[test]
    fn quiet_replay_writes_nothing() {
        let mut simulation = Simulation::new(cache(0, 1, 0), false);
        let mut out = Vec::new();

        simulation
            .replay(Trace::new(" L 10,1\n".as_bytes()), &mut out)
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(simulation.stats(), stats(0, 1, 0));
    }

    #[test]
    fn summary_format() {
        assert_eq!(stats(4, 5, 3).to_string(), "hits:4 misses:5 evictions:3");
    }

    #[test]
    fn percentages() {
        let totals = stats(3, 1, 0);

        assert_eq!(totals.percent_hit(), 75.0);
        assert_eq!(totals.percent_miss(), 25.0);
        assert_eq!(Stats::default().percent_hit(), 0.0);
    }
}
