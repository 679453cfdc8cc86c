use std::env;

const DEFAULT_MAX_SOURCE_BYTES: u64 = 1_073_741_824;
const HARD_MAX_SOURCE_BYTES: u64 = 8 * 1_073_741_824;
const MIN_SOURCE_BYTES: u64 = 4096;

const DEFAULT_HASH_BUF_BYTES: usize = 32 * 1024;
const MIN_HASH_BUF_BYTES: usize = 4 * 1024;
const MAX_HASH_BUF_BYTES: usize = 1024 * 1024;

const MAX_WORKERS: usize = 32;

/// Engine tunables, resolved once and passed by reference.
///
/// Environment overrides follow the parse-validate-clamp pattern; an unset
/// or unparseable variable silently falls back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on a single source XML file.
    pub max_source_bytes: u64,
    /// Worker count for the parallel validator stages.
    pub validate_workers: usize,
    /// Buffer length used when streaming bytes through a hasher.
    pub hash_buf_bytes: usize,
}

impl Config {
    pub fn load() -> Self {
        let max_source_bytes = env::var("MCB_MAX_SOURCE_BYTES")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.clamp(MIN_SOURCE_BYTES, HARD_MAX_SOURCE_BYTES))
            .unwrap_or(DEFAULT_MAX_SOURCE_BYTES);

        let validate_workers = env::var("MCB_VALIDATE_WORKERS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(MAX_WORKERS))
            .unwrap_or_else(|| num_cpus::get().clamp(1, MAX_WORKERS));

        let hash_buf_bytes = env::var("MCB_HASH_BUF_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.clamp(MIN_HASH_BUF_BYTES, MAX_HASH_BUF_BYTES))
            .unwrap_or(DEFAULT_HASH_BUF_BYTES);

        Self {
            max_source_bytes,
            validate_workers,
            hash_buf_bytes,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            validate_workers: num_cpus::get().clamp(1, MAX_WORKERS),
            hash_buf_bytes: DEFAULT_HASH_BUF_BYTES,
        }
    }
}
