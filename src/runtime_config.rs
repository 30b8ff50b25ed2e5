//! # Runtime Configuration Module
//!
//! Environment-driven tuning of the coroutine runtime.
//!
//! ## Environment Variables
//!
//! ### `KIT_STACK_SIZE`
//!
//! Stack size of every coroutine the crate spawns: server handlers,
//! `fetch_all` fetches and prerender workers. Accepts decimal (`524288`) or
//! hexadecimal (`0x80000`).
//!
//! Default: `0x80000` (512 KB). An internal `fetch` runs a whole nested
//! pipeline on the caller's stack, so the default is larger than a plain
//! request handler would need.
//!
//! ### `KIT_PRERENDER_WORKERS`
//!
//! Overrides `prerender.concurrency` from the config file.
//!
//! ## Usage
//!
//! ```rust
//! use kitrouter::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```

use std::env;

/// Default coroutine stack size (512 KB)
pub const DEFAULT_STACK_SIZE: usize = 0x80000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes
    pub stack_size: usize,
    /// Prerender worker count override
    pub prerender_workers: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            prerender_workers: None,
        }
    }
}

fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let stack_size = lookup("KIT_STACK_SIZE")
            .and_then(|v| parse_size(&v))
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_STACK_SIZE);
        let prerender_workers = lookup("KIT_PRERENDER_WORKERS")
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n: &usize| n > 0);
        RuntimeConfig {
            stack_size,
            prerender_workers,
        }
    }

    /// Apply the stack size to coroutines spawned without an explicit size.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
    }
}
