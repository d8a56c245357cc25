//! Runtime-configurable tuning parameters.
//!
//! All values have defaults. Override via environment variables (prefixed
//! `TESSERA_`) or via the dotted-key properties blob handed over by the
//! process launcher.

use crate::error::{Result, TesseraError};
use std::time::Duration;

/// Tuning parameters for the wire codec, worker pool and shutdown.
#[derive(Debug, Clone)]
pub struct TesseraConfig {
    /// Chunk size for large-object wire streams.
    pub chunk_size: usize,

    /// Number of concurrent message-handler workers.
    pub worker_count: usize,

    /// Grace period for the shutdown ("bye") tree to drain.
    pub shutdown_timeout: Duration,

    /// Peer liveness check interval. Zero disables the check.
    pub alive_timeout: Duration,
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            shutdown_timeout: Duration::from_secs(10),
            alive_timeout: Duration::ZERO,
        }
    }
}

impl TesseraConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `TESSERA_CHUNK_SIZE`
    /// - `TESSERA_WORKER_COUNT`
    /// - `TESSERA_SHUTDOWN_TIMEOUT_SECS`
    /// - `TESSERA_ALIVE_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("TESSERA_CHUNK_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("TESSERA_WORKER_COUNT") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.worker_count = n;
            }
        }
        if let Ok(v) = std::env::var("TESSERA_SHUTDOWN_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                cfg.shutdown_timeout = Duration::from_secs(s);
            }
        }
        if let Ok(v) = std::env::var("TESSERA_ALIVE_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                cfg.alive_timeout = Duration::from_secs(s);
            }
        }

        cfg
    }

    /// Parse a launcher properties blob: one `key=value` per line, `#` comments.
    ///
    /// Recognized keys:
    /// - `tessera.network.chunk.size`
    /// - `tessera.network.workers.count`
    /// - `tessera.network.shutdown.timeout` (seconds)
    /// - `tessera.alive.timeout` (seconds)
    ///
    /// Unknown keys fail with `Config`: a typo'd tuning knob silently ignored
    /// is worse than a launch failure.
    pub fn from_properties(blob: &str) -> Result<Self> {
        let mut cfg = Self::default();

        for line in blob.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| TesseraError::Config(format!("not a key=value line: {line:?}")))?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "tessera.network.chunk.size" => cfg.chunk_size = parse_num(key, value)?,
                "tessera.network.workers.count" => cfg.worker_count = parse_num(key, value)?,
                "tessera.network.shutdown.timeout" => {
                    cfg.shutdown_timeout = Duration::from_secs(parse_num(key, value)?);
                }
                "tessera.alive.timeout" => {
                    cfg.alive_timeout = Duration::from_secs(parse_num(key, value)?);
                }
                _ => {
                    return Err(TesseraError::Config(format!("unknown property: {key}")));
                }
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(TesseraError::Config("chunk size must be positive".into()));
        }
        if self.worker_count == 0 {
            return Err(TesseraError::Config("worker count must be positive".into()));
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TesseraError::Config(format!("bad value for {key}: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TesseraConfig::default();
        assert_eq!(cfg.chunk_size, 16384);
        assert!(cfg.worker_count >= 1);
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(cfg.alive_timeout, Duration::ZERO);
    }

    #[test]
    fn properties_blob() {
        let cfg = TesseraConfig::from_properties(
            "# tuning\n\
             tessera.network.chunk.size = 4096\n\
             tessera.network.workers.count=2\n\
             tessera.network.shutdown.timeout=3\n",
        )
        .unwrap();
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.worker_count, 2);
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn unknown_property_is_rejected() {
        let err = TesseraConfig::from_properties("tessera.network.chunk.sise=1\n").unwrap_err();
        assert!(err.to_string().contains("unknown property"));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(TesseraConfig::from_properties("tessera.network.chunk.size=0").is_err());
    }
}
