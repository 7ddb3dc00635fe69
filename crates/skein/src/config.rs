//! Scheduler configuration
//!
//! Configuration comes from code (`SchedulerConfig::default()` plus the
//! builder-style setters) or from the environment:
//!
//! - `SKEIN_NUM_WORKERS`: worker thread count, `0` for one per logical CPU
//! - `SKEIN_TASK_STACK_SIZE`: stack size in bytes for task execution contexts

use crate::scheduler::MAX_WORKERS;
use std::num::ParseIntError;

/// Environment variable holding the worker count
pub const NUM_WORKERS_ENV: &str = "SKEIN_NUM_WORKERS";

/// Environment variable holding the task stack size in bytes
pub const TASK_STACK_SIZE_ENV: &str = "SKEIN_TASK_STACK_SIZE";

/// Errors produced while reading configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable did not contain an unsigned integer
    #[error("invalid value {value:?} for {var}: {source}")]
    InvalidNumber {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// Parse failure
        #[source]
        source: ParseIntError,
    },

    /// A task stack size of zero was requested
    #[error("{0} must be greater than zero")]
    ZeroStackSize(&'static str),
}

/// Scheduler construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Requested worker count (0 = autodetect)
    pub num_workers: usize,

    /// Stack size for task execution contexts (None = platform default)
    pub task_stack_size: Option<usize>,

    /// Prefix for worker and task thread names
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            task_stack_size: None,
            thread_name: "skein".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(NUM_WORKERS_ENV) {
            config.num_workers = parse_usize(NUM_WORKERS_ENV, &value)?;
        }

        if let Some(value) = lookup(TASK_STACK_SIZE_ENV) {
            let size = parse_usize(TASK_STACK_SIZE_ENV, &value)?;
            if size == 0 {
                return Err(ConfigError::ZeroStackSize(TASK_STACK_SIZE_ENV));
            }
            config.task_stack_size = Some(size);
        }

        Ok(config)
    }

    /// Set the requested worker count
    pub fn with_num_workers(mut self, count: usize) -> Self {
        self.num_workers = count;
        self
    }

    /// Set the task stack size
    pub fn with_task_stack_size(mut self, size: usize) -> Self {
        self.task_stack_size = Some(size);
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Worker count after autodetection and clamping
    pub fn resolved_workers(&self) -> usize {
        resolve_worker_count(self.num_workers)
    }
}

/// Resolve a requested worker count
///
/// Zero selects one worker per logical CPU. The result is clamped to the
/// number of bits in [`WorkerAffinity`](crate::WorkerAffinity).
pub fn resolve_worker_count(requested: usize) -> usize {
    let count = if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    };
    count.min(MAX_WORKERS)
}

fn parse_usize(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|source| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.num_workers, 0);
        assert_eq!(config.task_stack_size, None);
        assert_eq!(config.thread_name, "skein");
    }

    #[test]
    fn test_autodetect_worker_count() {
        let count = resolve_worker_count(0);
        assert!(count >= 1);
        assert!(count <= num_cpus::get().max(1));
        assert!(count <= MAX_WORKERS);
    }

    #[test]
    fn test_worker_count_is_clamped() {
        assert_eq!(resolve_worker_count(3), 3);
        assert_eq!(resolve_worker_count(MAX_WORKERS), MAX_WORKERS);
        assert_eq!(resolve_worker_count(MAX_WORKERS + 100), MAX_WORKERS);
    }

    #[test]
    fn test_from_lookup() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            (NUM_WORKERS_ENV, "6"),
            (TASK_STACK_SIZE_ENV, " 262144 "),
        ]))
        .unwrap();

        assert_eq!(config.num_workers, 6);
        assert_eq!(config.task_stack_size, Some(262144));
    }

    #[test]
    fn test_from_lookup_empty() {
        let config = SchedulerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let err = SchedulerConfig::from_lookup(lookup(&[(NUM_WORKERS_ENV, "many")])).unwrap_err();
        match err {
            ConfigError::InvalidNumber { var, value, .. } => {
                assert_eq!(var, NUM_WORKERS_ENV);
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_lookup_zero_stack() {
        let err =
            SchedulerConfig::from_lookup(lookup(&[(TASK_STACK_SIZE_ENV, "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroStackSize(TASK_STACK_SIZE_ENV));
    }

    #[test]
    fn test_builder_setters() {
        let config = SchedulerConfig::default()
            .with_num_workers(2)
            .with_task_stack_size(1 << 20)
            .with_thread_name("render");

        assert_eq!(config.resolved_workers(), 2);
        assert_eq!(config.task_stack_size, Some(1 << 20));
        assert_eq!(config.thread_name, "render");
    }
}
