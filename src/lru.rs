use crate::config::{CacheConfig, ConfigError};

/// Set-associative cache with least-recently-used replacement.
///
/// All `num_sets * lines_per_set` lines live in one allocation. Set `i`
/// occupies `lines[i * ways..(i + 1) * ways]` and is kept in recency order,
/// most recently used first.
#[derive(Debug, Clone)]
pub struct LruCache {
    config: CacheConfig,
    lines: Vec<CacheLine>,
}

impl LruCache {
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        let mut lines = Vec::new();
        lines
            .try_reserve_exact(config.num_lines())
            .map_err(|_| ConfigError::TooLarge {
                set_index_bits: config.set_index_bits(),
                lines_per_set: config.lines_per_set(),
            })?;
        lines.resize(config.num_lines(), CacheLine::default());

        Ok(Self { config, lines })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn format_info(&self) -> String {
        let config = &self.config;
        [
            "LRU Cache:".to_string(),
            format!(
                "\tTotal Size: {}B",
                config.block_size() as u128 * config.num_lines() as u128
            ),
            format!("\tSets: {}", config.num_sets()),
            format!("\tWays: {}", config.lines_per_set()),
            format!("\tLine-Size: {}B", config.block_size()),
            format!(
                "\t| {} tag bits | {} set bits | {} offset bits |",
                config.tag_bits(),
                config.set_index_bits(),
                config.block_offset_bits()
            ),
        ]
        .join("\n")
    }

    pub fn reset(&mut self) {
        self.lines.fill(CacheLine::default());
    }

    /// Lines of one set, most recently used first.
    ///
    /// # Panics
    /// If `set_index` is not below `num_sets`.
    pub fn lines(&self, set_index: usize) -> &[CacheLine] {
        let ways = self.config.lines_per_set();
        &self.lines[set_index * ways..(set_index + 1) * ways]
    }

    /// Looks `tag` up in set `set_index`, installing it on a miss.
    ///
    /// # Panics
    /// If `set_index` is not below `num_sets`.
    pub fn access(&mut self, set_index: usize, tag: u64) -> AccessOutcome {
        let ways = self.config.lines_per_set();
        let lines = &mut self.lines[set_index * ways..(set_index + 1) * ways];

        CacheSet { lines }.get(tag)
    }

    pub fn get(&mut self, address: u64) -> AccessOutcome {
        let (set_index, tag) = self.config.decompose(address);
        self.access(set_index, tag)
    }
}

struct CacheSet<'a> {
    lines: &'a mut [CacheLine],
}

impl CacheSet<'_> {
    fn get(&mut self, tag: u64) -> AccessOutcome {
        // linear search for a valid cache-line with tag
        let hit = self
            .lines
            .iter()
            .position(|line| line.valid && line.tag == tag);

        if let Some(way) = hit {
            // Cache-Hit: set cache-line as the most recently used
            self.lines[..=way].rotate_right(1);
            return AccessOutcome::Hit;
        }

        // Cache-Miss: valid lines always form a prefix of the set, so the
        // first empty line sits right behind them. Without one, the least
        // recently used line at the back is replaced.
        let (way, outcome) = match self.lines.iter().position(|line| !line.valid) {
            Some(way) => (way, AccessOutcome::MissNoEviction),
            None => {
                let way = self.lines.len() - 1;
                let evicted_tag = self.lines[way].tag;
                (way, AccessOutcome::MissWithEviction { evicted_tag })
            }
        };

        self.lines[way] = CacheLine { valid: true, tag };
        self.lines[..=way].rotate_right(1);

        outcome
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CacheLine {
    pub valid: bool,
    pub tag: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    Hit,
    MissNoEviction,
    MissWithEviction { evicted_tag: u64 },
}

impl AccessOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, AccessOutcome::Hit)
    }
}

impl std::fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessOutcome::Hit => f.write_str("Hit"),
            AccessOutcome::MissNoEviction => f.write_str("Miss"),
            AccessOutcome::MissWithEviction { evicted_tag } => {
                f.write_fmt(format_args!("Miss evicted={evicted_tag:#X}"))
            }
        }
    }
}
