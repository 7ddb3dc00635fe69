//! Helpers shared by the integration tests

#![allow(dead_code)]

use skein::{Scheduler, SchedulerConfig};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT_LOG: Once = Once::new();

/// Install a test-friendly subscriber filtered by `RUST_LOG`
pub fn init_logging() {
    INIT_LOG.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Scheduler with `workers` threads and logging set up
pub fn scheduler(workers: usize) -> Scheduler {
    init_logging();
    Scheduler::with_config(SchedulerConfig::default().with_num_workers(workers))
}
