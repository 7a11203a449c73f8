//! Crate-wide tunables: cache capacities, close deadlines, eviction cadence.
//!
//! Mirrors the teacher's `AppConfig::from_str` JSON/YAML sniffing so a config file
//! can be written in either format without a `--format` flag.

use std::io;

use serde_json;
use serde_yaml;

/// Default `ServiceFactoryCache` capacity for bound-name endpoint factories
/// (spec §4.1/§4.4).
pub const DEFAULT_NAME_CACHE_CAPACITY: usize = 8;

/// Default `ServiceFactoryCache` capacity for DTab-pair bindings (spec §4.4).
pub const DEFAULT_DTAB_CACHE_CAPACITY: usize = 4;

/// Default deadline, in milliseconds, a `ServiceFactory::close` is given to drain
/// outstanding services before being considered complete regardless.
pub const DEFAULT_CLOSE_DEADLINE_MS: u64 = 5_000;

/// Default interval, in milliseconds, for an optional periodic
/// `ServiceFactoryCache::reap_idle` sweep. The cache itself already reaps an
/// overshot entry the moment its last outstanding service closes (spec §4.1's
/// "evict as soon as an entry quiesces" is met by that quiesce hook alone); this
/// tunable is only for a caller that additionally wants a periodic backstop sweep
/// scheduled on its own reactor loop.
pub const DEFAULT_EVICTION_INTERVAL_MS: u64 = 10_000;

fn default_name_cache_capacity() -> usize {
    DEFAULT_NAME_CACHE_CAPACITY
}
fn default_dtab_cache_capacity() -> usize {
    DEFAULT_DTAB_CACHE_CAPACITY
}
fn default_close_deadline_ms() -> u64 {
    DEFAULT_CLOSE_DEADLINE_MS
}
fn default_eviction_interval_ms() -> u64 {
    DEFAULT_EVICTION_INTERVAL_MS
}

/// The naming/binding core's tunables, deserializable from either YAML or JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WilyConfig {
    #[serde(default = "default_name_cache_capacity")]
    pub name_cache_capacity: usize,

    #[serde(default = "default_dtab_cache_capacity")]
    pub dtab_cache_capacity: usize,

    #[serde(default = "default_close_deadline_ms")]
    pub close_deadline_ms: u64,

    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,
}

impl Default for WilyConfig {
    fn default() -> WilyConfig {
        WilyConfig {
            name_cache_capacity: DEFAULT_NAME_CACHE_CAPACITY,
            dtab_cache_capacity: DEFAULT_DTAB_CACHE_CAPACITY,
            close_deadline_ms: DEFAULT_CLOSE_DEADLINE_MS,
            eviction_interval_ms: DEFAULT_EVICTION_INTERVAL_MS,
        }
    }
}

impl WilyConfig {
    /// Parses `txt` as JSON if it looks like an object, YAML otherwise — the same
    /// sniff the teacher's `AppConfig::from_str` uses.
    pub fn from_str(txt: &str) -> io::Result<WilyConfig> {
        let trimmed = txt.trim_left();
        if trimmed.starts_with('{') {
            serde_json::from_str(trimmed).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        } else {
            serde_yaml::from_str(trimmed).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }
    }
}
