//! Configuration system (layered: defaults < file < env < code).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MuxError, Result};
use crate::protocol::CounterMode;
use crate::timeline::ResultMatching;
use crate::tools::ExecutionMode;

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<MuxConfig> = OnceLock::new();

const ENV_PREFIX: &str = "CHATMUX_";

/// Runtime configuration shared by the serving and receiving sides.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxConfig {
    /// Client-side idle window before a generation is forced to TimedOut.
    pub watchdog_timeout: Duration,
    /// Server-side bound on a single reasoning-engine suspension.
    pub step_timeout: Duration,
    /// Per-attempt bound on a tool handler.
    pub tool_timeout: Duration,
    /// Extra attempts after a tool timeout.
    pub tool_max_retries: u32,
    /// Base delay between tool attempts (scaled by attempt number).
    pub tool_retry_backoff: Duration,
    /// How long a cancelled generation may take to unwind.
    pub cancel_grace: Duration,
    pub heartbeat_interval: Duration,
    /// Upper bound on engine ↔ tool round trips per generation.
    pub max_tool_iterations: usize,
    pub counter_mode: CounterMode,
    pub result_matching: ResultMatching,
    pub tool_execution: ExecutionMode,
    pub listen_addr: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_secs(60),
            step_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(10),
            tool_max_retries: 1,
            tool_retry_backoff: Duration::from_millis(500),
            cancel_grace: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            max_tool_iterations: 10,
            counter_mode: CounterMode::default(),
            result_matching: ResultMatching::default(),
            tool_execution: ExecutionMode::default(),
            listen_addr: "127.0.0.1:8765".to_string(),
        }
    }
}

/// On-disk shape. Every field is optional so a file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    watchdog_timeout_ms: Option<u64>,
    step_timeout_ms: Option<u64>,
    tool_timeout_ms: Option<u64>,
    tool_max_retries: Option<u32>,
    tool_retry_backoff_ms: Option<u64>,
    cancel_grace_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    max_tool_iterations: Option<usize>,
    counter_mode: Option<CounterMode>,
    result_matching: Option<ResultMatching>,
    tool_execution: Option<ExecutionMode>,
    listen_addr: Option<String>,
}

impl MuxConfig {
    /// Defaults overlaid with `CHATMUX_*` environment variables (and `.env`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Get (or create) the global default config.
    pub fn global() -> &'static MuxConfig {
        DEFAULT_CONFIG.get_or_init(Self::from_env)
    }

    /// Default config file location (`<config dir>/chatmux/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "chatmux")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_file(toml::from_str(raw)?);
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Full resolution: defaults, then the file (explicit path or the default
    /// location when it exists), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        tracing::debug!(?config, "chatmux config resolved");
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        let ms = Duration::from_millis;
        if let Some(v) = file.watchdog_timeout_ms {
            self.watchdog_timeout = ms(v);
        }
        if let Some(v) = file.step_timeout_ms {
            self.step_timeout = ms(v);
        }
        if let Some(v) = file.tool_timeout_ms {
            self.tool_timeout = ms(v);
        }
        if let Some(v) = file.tool_max_retries {
            self.tool_max_retries = v;
        }
        if let Some(v) = file.tool_retry_backoff_ms {
            self.tool_retry_backoff = ms(v);
        }
        if let Some(v) = file.cancel_grace_ms {
            self.cancel_grace = ms(v);
        }
        if let Some(v) = file.heartbeat_interval_ms {
            self.heartbeat_interval = ms(v);
        }
        if let Some(v) = file.max_tool_iterations {
            self.max_tool_iterations = v;
        }
        if let Some(v) = file.counter_mode {
            self.counter_mode = v;
        }
        if let Some(v) = file.result_matching {
            self.result_matching = v;
        }
        if let Some(v) = file.tool_execution {
            self.tool_execution = v;
        }
        if let Some(v) = file.listen_addr {
            self.listen_addr = v;
        }
    }

    /// Overlay `CHATMUX_*` variables. Unparseable values are logged and skipped.
    pub fn apply_env(&mut self) {
        let ms = |key: &str| env_parse::<u64>(key).map(Duration::from_millis);
        if let Some(v) = ms("WATCHDOG_TIMEOUT_MS") {
            self.watchdog_timeout = v;
        }
        if let Some(v) = ms("STEP_TIMEOUT_MS") {
            self.step_timeout = v;
        }
        if let Some(v) = ms("TOOL_TIMEOUT_MS") {
            self.tool_timeout = v;
        }
        if let Some(v) = env_parse("TOOL_MAX_RETRIES") {
            self.tool_max_retries = v;
        }
        if let Some(v) = ms("TOOL_RETRY_BACKOFF_MS") {
            self.tool_retry_backoff = v;
        }
        if let Some(v) = ms("CANCEL_GRACE_MS") {
            self.cancel_grace = v;
        }
        if let Some(v) = ms("HEARTBEAT_INTERVAL_MS") {
            self.heartbeat_interval = v;
        }
        if let Some(v) = env_parse("MAX_TOOL_ITERATIONS") {
            self.max_tool_iterations = v;
        }
        if let Some(v) = env_parse("COUNTER_MODE") {
            self.counter_mode = v;
        }
        if let Some(v) = env_parse("RESULT_MATCHING") {
            self.result_matching = v;
        }
        if let Some(v) = env_parse("TOOL_EXECUTION") {
            self.tool_execution = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}LISTEN_ADDR")) {
            self.listen_addr = v;
        }
    }

    /// Reject settings that would disable a bound the runtime relies on.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("watchdog_timeout", self.watchdog_timeout),
            ("step_timeout", self.step_timeout),
            ("tool_timeout", self.tool_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(MuxError::Configuration(format!("{name} must be non-zero")));
            }
        }
        if self.max_tool_iterations == 0 {
            return Err(MuxError::Configuration(
                "max_tool_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_counter_mode(mut self, mode: CounterMode) -> Self {
        self.counter_mode = mode;
        self
    }

    pub fn with_result_matching(mut self, matching: ResultMatching) -> Self {
        self.result_matching = matching;
        self
    }

    pub fn with_tool_execution(mut self, mode: ExecutionMode) -> Self {
        self.tool_execution = mode;
        self
    }
}

fn env_parse<T>(suffix: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    let raw = std::env::var(&key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key = %key, value = %raw, error = %err, "ignoring invalid config value");
            None
        }
    }
}
