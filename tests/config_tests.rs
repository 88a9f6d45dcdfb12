//! Tests for configuration resolution.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use chatmux::config::MuxConfig;
use chatmux::error::MuxError;
use chatmux::protocol::CounterMode;
use chatmux::timeline::ResultMatching;
use chatmux::tools::ExecutionMode;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 12] = [
    "CHATMUX_WATCHDOG_TIMEOUT_MS",
    "CHATMUX_STEP_TIMEOUT_MS",
    "CHATMUX_TOOL_TIMEOUT_MS",
    "CHATMUX_TOOL_MAX_RETRIES",
    "CHATMUX_TOOL_RETRY_BACKOFF_MS",
    "CHATMUX_CANCEL_GRACE_MS",
    "CHATMUX_HEARTBEAT_INTERVAL_MS",
    "CHATMUX_MAX_TOOL_ITERATIONS",
    "CHATMUX_COUNTER_MODE",
    "CHATMUX_RESULT_MATCHING",
    "CHATMUX_TOOL_EXECUTION",
    "CHATMUX_LISTEN_ADDR",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clean_env() -> (std::sync::MutexGuard<'static, ()>, EnvGuard) {
    let lock = env_lock_guard();
    let guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }
    (lock, guard)
}

#[test]
fn env_overrides_defaults() {
    let _env = clean_env();
    std::env::set_var("CHATMUX_WATCHDOG_TIMEOUT_MS", "2500");
    std::env::set_var("CHATMUX_COUNTER_MODE", "per_session");
    std::env::set_var("CHATMUX_TOOL_EXECUTION", "parallel");
    std::env::set_var("CHATMUX_LISTEN_ADDR", "0.0.0.0:7000");

    let mut config = MuxConfig::default();
    config.apply_env();

    assert_eq!(config.watchdog_timeout, Duration::from_millis(2500));
    assert_eq!(config.counter_mode, CounterMode::PerSession);
    assert_eq!(config.tool_execution, ExecutionMode::Parallel);
    assert_eq!(config.listen_addr, "0.0.0.0:7000");
    assert_eq!(config.step_timeout, Duration::from_secs(120));
}

#[test]
fn invalid_env_values_are_skipped() {
    let _env = clean_env();
    std::env::set_var("CHATMUX_HEARTBEAT_INTERVAL_MS", "soon");
    std::env::set_var("CHATMUX_RESULT_MATCHING", "fuzzy");

    let mut config = MuxConfig::default();
    config.apply_env();

    assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(config.result_matching, ResultMatching::Strict);
}

#[test]
fn env_wins_over_file() {
    let _env = clean_env();
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "max_tool_iterations = 3\ncancel_grace_ms = 100\n")
        .expect("config file should be written");
    std::env::set_var("CHATMUX_MAX_TOOL_ITERATIONS", "7");

    let config = MuxConfig::load(Some(&path)).expect("config should load");
    assert_eq!(config.max_tool_iterations, 7);
    assert_eq!(config.cancel_grace, Duration::from_millis(100));
}

#[test]
fn env_cannot_disable_required_bounds() {
    let _env = clean_env();
    std::env::set_var("CHATMUX_MAX_TOOL_ITERATIONS", "0");
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "").expect("config file should be written");

    let err = MuxConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(
        err,
        MuxError::Configuration(message) if message.contains("max_tool_iterations")
    ));
}

#[test]
fn missing_explicit_file_is_an_io_error() {
    let _env = clean_env();
    let err = MuxConfig::load(Some(std::path::Path::new("/nonexistent/chatmux.toml"))).unwrap_err();
    assert!(matches!(err, MuxError::Io(_)));
}
