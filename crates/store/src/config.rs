use tabletop_core::keys::DEFAULT_KEY_PREFIX;

/// Which store implementation to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Shared Redis server (production).
    Redis,
    /// Process-local [`MemoryStore`](crate::MemoryStore). Only coordinates
    /// handlers inside a single process; intended for development and tests.
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}' (expected redis or memory)")),
        }
    }
}

/// Store connection settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Connection URL for the Redis backend.
    pub redis_url: String,
    /// Namespace prefix for every key and channel.
    pub key_prefix: String,
    /// How often the memory backend sweeps expired keys.
    pub sweep_interval_secs: u64,
}

impl StoreConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                    |
    /// |-----------------------------|----------------------------|
    /// | `STORE_BACKEND`             | `memory`                   |
    /// | `REDIS_URL`                 | `redis://127.0.0.1:6379/0` |
    /// | `STORE_KEY_PREFIX`          | `tabletop`                 |
    /// | `STORE_SWEEP_INTERVAL_SECS` | `30`                       |
    pub fn from_env() -> Self {
        let backend: StoreBackend = std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "memory".into())
            .parse()
            .unwrap_or_else(|e| panic!("STORE_BACKEND is invalid: {e}"));

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".into());

        let key_prefix =
            std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| DEFAULT_KEY_PREFIX.into());

        let sweep_interval_secs: u64 = std::env::var("STORE_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("STORE_SWEEP_INTERVAL_SECS must be a valid u64");

        Self {
            backend,
            redis_url,
            key_prefix,
            sweep_interval_secs,
        }
    }

    /// In-memory configuration used by tests and local tooling.
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: String::new(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            sweep_interval_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Redis".parse::<StoreBackend>(), Ok(StoreBackend::Redis));
        assert_eq!(" memory ".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("postgres".parse::<StoreBackend>().is_err());
    }
}
