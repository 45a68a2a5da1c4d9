//! Tunables for the descriptor state cache.

use std::time::Duration;

pub const ENV_BUCKETS: &str = "FD_STATE_BUCKETS";
pub const ENV_STALENESS_MS: &str = "FD_STATE_STALENESS_MS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Size hint for the descriptor table; rounded up to a power of two.
    ///
    /// 4096 trades space for speed on a 64K-descriptor workload: inserting
    /// 64K entries and looking each up 100 times took 2.4s at 8192 buckets,
    /// 3.0s at 4096, 4.1s at 2048, 7.7s at 1024 and 14.1s at 512.
    pub bucket_hint: usize,
    pub name: String,
    /// How long a cached size is served before it is re-queried.
    pub staleness: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bucket_hint: 4096,
            name: "fdstate".to_string(),
            staleness: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config
    }

    /// Applies overrides from `lookup`; values that do not parse are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_BUCKETS) {
            match raw.trim().parse() {
                Ok(n) => self.bucket_hint = n,
                Err(_) => tracing::warn!(var = ENV_BUCKETS, value = %raw, "ignoring unparsable override"),
            }
        }
        if let Some(raw) = lookup(ENV_STALENESS_MS) {
            match raw.trim().parse() {
                Ok(ms) => self.staleness = Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(var = ENV_STALENESS_MS, value = %raw, "ignoring unparsable override")
                }
            }
        }
    }
}
