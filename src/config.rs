//! Worker configuration parsing and validation.
//!
//! A [`WorkerConfig`] can be built in code (starting from
//! [`WorkerConfig::default`]) or loaded from TOML:
//!
//! The two R scripts are not bundled; set `launcher_script` and
//! `handler_script` to where they are deployed.
//!
//! ```toml
//! launcher_script = "/opt/rworker/RunPlumber.R"
//! handler_script = "/opt/rworker/PlumberAPI.R"
//! lib_dir = "/home/me/.rworker/library"
//! request_timeout_seconds = 5.0
//! startup_timeout_seconds = 15.0
//! default_time_zone = "America/New_York"
//!
//! [executable]
//! install_dir = "C:/Program Files/R/R-4.4.1"
//!
//! [signals]
//! ready = "^Running plumber API at"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::models::timestamp::resolve_zone;
use crate::{AppError, Result};

/// Hints used to find the worker executable.
///
/// Search order: `install_dir`, the `home_env` environment variable, the
/// Windows registry key `registry_key` (Windows only), then `PATH`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutableHints {
    /// Explicit installation directory supplied by the caller.
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
    /// File name of the interpreter front-end.
    #[serde(default = "default_program")]
    pub program: String,
    /// Directory below an installation root that holds `program`.
    #[serde(default = "default_bin_subdir")]
    pub bin_subdir: PathBuf,
    /// Environment variable naming an installation root.
    #[serde(default = "default_home_env")]
    pub home_env: String,
    /// Registry key (under HKCU and HKLM) with an `InstallPath` value.
    #[serde(default = "default_registry_key")]
    pub registry_key: String,
}

impl Default for ExecutableHints {
    fn default() -> Self {
        Self {
            install_dir: None,
            program: default_program(),
            bin_subdir: default_bin_subdir(),
            home_env: default_home_env(),
            registry_key: default_registry_key(),
        }
    }
}

fn default_program() -> String {
    if cfg!(windows) {
        "Rscript.exe".into()
    } else {
        "Rscript".into()
    }
}

fn default_bin_subdir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("bin").join("x64")
    } else {
        PathBuf::from("bin")
    }
}

fn default_home_env() -> String {
    "R_HOME".into()
}

fn default_registry_key() -> String {
    r"SOFTWARE\R-Core\R64".into()
}

/// Line patterns the worker prints on its standard streams.
///
/// `ready`, `installing` and `ignore` are regular expressions; `debug_prefix`
/// is a literal prefix that is stripped before logging at debug level.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SignalConfig {
    /// Printed once the HTTP listener accepts connections.
    #[serde(default = "default_ready_pattern")]
    pub ready: String,
    /// Printed when the worker starts installing packages.
    #[serde(default = "default_installing_pattern")]
    pub installing: String,
    /// Lines that are dropped without logging.
    #[serde(default = "default_ignore_patterns")]
    pub ignore: Vec<String>,
    /// Prefix marking worker debug output.
    #[serde(default = "default_debug_prefix")]
    pub debug_prefix: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            ready: default_ready_pattern(),
            installing: default_installing_pattern(),
            ignore: default_ignore_patterns(),
            debug_prefix: default_debug_prefix(),
        }
    }
}

fn default_ready_pattern() -> String {
    "^Running plumber API at".into()
}

fn default_installing_pattern() -> String {
    "^INSTALLING_R_PACKAGES".into()
}

fn default_ignore_patterns() -> Vec<String> {
    vec!["^Running swagger Docs at".into()]
}

fn default_debug_prefix() -> String {
    "DEBUG:".into()
}

/// Full configuration of one worker session.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Where to look for the interpreter.
    #[serde(default)]
    pub executable: ExecutableHints,
    /// Flags passed to the interpreter before the launcher script.
    #[serde(default = "default_interpreter_flags")]
    pub interpreter_flags: Vec<String>,
    /// Script that boots the HTTP handler.
    ///
    /// The crate ships no R scripts, so point this at the deployed launcher.
    /// The default bare name resolves against the caller's working directory.
    #[serde(default = "default_launcher_script")]
    pub launcher_script: PathBuf,
    /// Script defining the RPC endpoints. Resolved like `launcher_script`.
    #[serde(default = "default_handler_script")]
    pub handler_script: PathBuf,
    /// Package library directory; the worker's default when unset.
    #[serde(default)]
    pub lib_dir: Option<PathBuf>,
    /// Package repository URL used when installing dependencies.
    #[serde(default = "default_repository")]
    pub repository: String,
    /// Ask the worker to update installed packages at startup.
    #[serde(default)]
    pub update_packages: bool,
    /// Fixed loopback port; an ephemeral one is chosen when unset.
    #[serde(default)]
    pub port: Option<u16>,
    /// Per-request timeout; 0 means wait forever.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,
    /// How long to wait for the readiness line.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: f64,
    /// Default timeout for `eval`; 0 means wait forever.
    #[serde(default = "default_eval_timeout")]
    pub eval_timeout_seconds: f64,
    /// How long `stop` waits before killing the worker.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: f64,
    /// IANA zone attached to timestamps; the system zone when unset.
    #[serde(default)]
    pub default_time_zone: Option<String>,
    /// Shared libraries (without `lib` prefix or extension) that must exist.
    #[serde(default = "default_required_libraries")]
    pub required_libraries: Vec<String>,
    /// Attempts after a refused connection before giving up.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// First retry delay; doubled on each further attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Pause after the readiness line before the first request.
    #[serde(default = "default_ready_settle_ms")]
    pub ready_settle_ms: u64,
    /// Stream line patterns.
    #[serde(default)]
    pub signals: SignalConfig,
}

fn default_interpreter_flags() -> Vec<String> {
    vec!["--vanilla".into()]
}

fn default_launcher_script() -> PathBuf {
    PathBuf::from("RunPlumber.R")
}

fn default_handler_script() -> PathBuf {
    PathBuf::from("PlumberAPI.R")
}

fn default_repository() -> String {
    "https://cloud.r-project.org".into()
}

fn default_request_timeout() -> f64 {
    5.0
}

fn default_startup_timeout() -> f64 {
    15.0
}

fn default_eval_timeout() -> f64 {
    60.0
}

fn default_stop_timeout() -> f64 {
    5.0
}

fn default_required_libraries() -> Vec<String> {
    vec!["sodium".into()]
}

fn default_connect_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_ready_settle_ms() -> u64 {
    100
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: ExecutableHints::default(),
            interpreter_flags: default_interpreter_flags(),
            launcher_script: default_launcher_script(),
            handler_script: default_handler_script(),
            lib_dir: None,
            repository: default_repository(),
            update_packages: false,
            port: None,
            request_timeout_seconds: default_request_timeout(),
            startup_timeout_seconds: default_startup_timeout(),
            eval_timeout_seconds: default_eval_timeout(),
            stop_timeout_seconds: default_stop_timeout(),
            default_time_zone: None,
            required_libraries: default_required_libraries(),
            connect_retries: default_connect_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            ready_settle_ms: default_ready_settle_ms(),
            signals: SignalConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges, the time zone name and the signal patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        check_seconds("request_timeout_seconds", self.request_timeout_seconds, true)?;
        check_seconds("startup_timeout_seconds", self.startup_timeout_seconds, false)?;
        check_seconds("eval_timeout_seconds", self.eval_timeout_seconds, true)?;
        check_seconds("stop_timeout_seconds", self.stop_timeout_seconds, false)?;

        if self.port == Some(0) {
            return Err(AppError::Config(
                "port must be between 1 and 65535; omit it to pick a free port".into(),
            ));
        }

        if self.repository.trim().is_empty() {
            return Err(AppError::Config("repository must not be empty".into()));
        }

        if self.executable.program.trim().is_empty() {
            return Err(AppError::Config("executable.program must not be empty".into()));
        }

        self.time_zone()?;
        crate::forwarder::classify::SignalPatterns::from_config(&self.signals)?;

        Ok(())
    }

    /// Default zone for timestamps without one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `default_time_zone` is not an IANA name.
    pub fn time_zone(&self) -> Result<Tz> {
        resolve_zone(self.default_time_zone.as_deref())
    }

    /// Timeout applied to ordinary requests; `None` when unbounded.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        optional_seconds(self.request_timeout_seconds)
    }

    /// Default timeout for `eval`; `None` when unbounded.
    #[must_use]
    pub fn eval_timeout(&self) -> Option<Duration> {
        optional_seconds(self.eval_timeout_seconds)
    }

    /// Readiness wait window.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        seconds(self.startup_timeout_seconds)
    }

    /// Graceful shutdown window before the worker is killed.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        seconds(self.stop_timeout_seconds)
    }

    /// Delay applied after readiness before the first request.
    #[must_use]
    pub fn ready_settle(&self) -> Duration {
        Duration::from_millis(self.ready_settle_ms)
    }
}

fn check_seconds(name: &str, value: f64, zero_allowed: bool) -> Result<()> {
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(AppError::Config(format!(
            "{name} must be a non-negative number of seconds that fits in a duration, got {value}"
        )));
    }
    if value <= 0.0 && !zero_allowed {
        return Err(AppError::Config(format!("{name} must be greater than zero")));
    }
    Ok(())
}

/// Out-of-range values saturate; `validate` rejects them up front.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

fn optional_seconds(value: f64) -> Option<Duration> {
    (value > 0.0).then(|| seconds(value))
}
