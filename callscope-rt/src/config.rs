//! Runtime configuration from the environment.

use std::env;

use callscope_common::DEFAULT_TRACE_FILE;

pub const DEFAULT_FUNC_POOL: usize = 1000;
pub const DEFAULT_CALLER_POOL: usize = 5000;
pub const DEFAULT_STACK_SIZE: usize = 100;

/// Options read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Trace output path (`PROFILE_LOG_FILE`).
    pub log_file: String,
    /// Function pool capacity (`PROFILE_FUNC_POOL`).
    pub func_pool: usize,
    /// Caller pool capacity (`PROFILE_CALLER_POOL`).
    pub caller_pool: usize,
    /// Per-thread call stack depth (`PROFILE_STACK_SIZE`). The internal
    /// frame array holds one extra slot.
    pub stack_size: usize,
    /// `PROFILE_DAEMON`: the child after a fork dumps instead of the
    /// original process.
    pub daemon: bool,
    /// `PROFILE_DISABLE`: everything becomes a no-op.
    pub disabled: bool,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            log_file: env::var("PROFILE_LOG_FILE")
                .unwrap_or_else(|_| DEFAULT_TRACE_FILE.to_string()),
            func_pool: positive_or("PROFILE_FUNC_POOL", DEFAULT_FUNC_POOL),
            caller_pool: positive_or("PROFILE_CALLER_POOL", DEFAULT_CALLER_POOL),
            stack_size: positive_or("PROFILE_STACK_SIZE", DEFAULT_STACK_SIZE),
            daemon: env::var_os("PROFILE_DAEMON").is_some(),
            disabled: env::var_os("PROFILE_DISABLE").is_some(),
        }
    }

    /// Internal frame-array size: the configured depth plus a sentinel slot.
    #[must_use]
    pub fn stack_limit(&self) -> usize {
        self.stack_size + 1
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: DEFAULT_TRACE_FILE.to_string(),
            func_pool: DEFAULT_FUNC_POOL,
            caller_pool: DEFAULT_CALLER_POOL,
            stack_size: DEFAULT_STACK_SIZE,
            daemon: false,
            disabled: false,
        }
    }
}

/// Parse a positive integer variable, falling back to `default` when the
/// variable is unset, unparsable, or not positive.
fn positive_or(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(value) => match value.trim().parse::<i64>() {
            Ok(n) if n > 0 => n as usize,
            _ => default,
        },
        Err(_) => default,
    }
}
