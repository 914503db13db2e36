use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub max_connections: usize,                 // Further connections are closed on accept

    // Task queue
    pub worker_threads: usize,                  // Fixed worker pool size
    pub queue_capacity: usize,                  // Submit fails with QueueFull beyond this

    // Table
    pub full_scan_limit: usize,                 // Cap for unconditioned queries
    pub parallel_scan_threshold: usize,         // Rows before matching goes parallel

    // Wire
    pub max_frame_len: usize,
    pub lenient_decode: bool,                   // Corrupt filter matches nothing instead of failing
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:7878".to_string(),
            max_connections: 1024,
            worker_threads: num_cpus::get(),
            queue_capacity: 1024,
            full_scan_limit: 1000,
            parallel_scan_threshold: 4096,
            max_frame_len: 16 * 1024 * 1024,    // 16MB
            lenient_decode: false,
        }
    }
}

impl Config {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "worker_threads must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "queue_capacity must be at least 1"));
        }
        if self.full_scan_limit == 0 {
            return Err(Error::new(ErrorKind::InvalidConfig, "full_scan_limit must be at least 1"));
        }
        if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
            return Err(Error::new(
                ErrorKind::InvalidConfig,
                format!("max_frame_len {} outside 1..=u32::MAX", self.max_frame_len),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "bind_addr": "0.0.0.0:9000", "queue_capacity": 8 }}"#).unwrap();

        let config = Config::from_json_file(file.path()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.full_scan_limit, 1000);
        assert!(!config.lenient_decode);
    }

    #[test]
    fn zero_workers_rejected() {
        let config = Config { worker_threads: 0, ..Config::default() };
        assert_eq!(config.validate().unwrap_err().kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn malformed_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::from_json_file(file.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }
}
