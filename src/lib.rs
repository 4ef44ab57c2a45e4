pub mod config;
pub mod lru;
pub mod simulation;
pub mod trace;

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
use wasm_bindgen::prelude::*;

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
#[wasm_bindgen]
pub fn run_simulation(
    trace: &str,
    set_index_bits: u32,
    lines_per_set: usize,
    block_offset_bits: u32,
) -> String {
    use config::CacheConfig;
    use lru::LruCache;
    use simulation::Simulation;

    let lru_cache = match CacheConfig::new(set_index_bits, lines_per_set, block_offset_bits)
        .and_then(LruCache::new)
    {
        Ok(lru_cache) => lru_cache,
        Err(e) => return e.to_string(),
    };

    let mut result = Vec::new();
    result.push(lru_cache.format_info());

    let mut simulation = Simulation::new(lru_cache, false);
    match simulation.replay(trace::Trace::new(trace.as_bytes()), &mut std::io::sink()) {
        Ok(stats) => result.push(stats.to_string()),
        Err(e) => return e.to_string(),
    };

    result.join("\n")
}
