use std::path::PathBuf;
use std::time::Duration;

use rworker::{config::WorkerConfig, AppError};

fn sample_toml() -> &'static str {
    r#"
launcher_script = "/opt/rworker/RunPlumber.R"
handler_script = "/opt/rworker/PlumberAPI.R"
lib_dir = "/home/me/.rworker/library"
repository = "https://packagemanager.example.org/cran/latest"
update_packages = true
port = 8123
request_timeout_seconds = 0
startup_timeout_seconds = 30.5
eval_timeout_seconds = 2
stop_timeout_seconds = 1
default_time_zone = "America/New_York"
required_libraries = []
connect_retries = 3
retry_backoff_ms = 50
ready_settle_ms = 0

[executable]
install_dir = "/opt/R/4.4.1"
program = "Rscript"
bin_subdir = "bin"

[signals]
ready = "^Listening on"
ignore = ["^swagger", "^Loading"]
"#
}

#[test]
fn parses_full_config() {
    let config = WorkerConfig::from_toml_str(sample_toml()).expect("config parses");

    assert_eq!(config.launcher_script, PathBuf::from("/opt/rworker/RunPlumber.R"));
    assert_eq!(config.lib_dir, Some(PathBuf::from("/home/me/.rworker/library")));
    assert!(config.update_packages);
    assert_eq!(config.port, Some(8123));
    assert_eq!(config.executable.install_dir, Some(PathBuf::from("/opt/R/4.4.1")));
    assert_eq!(config.signals.ready, "^Listening on");
    assert_eq!(config.signals.ignore.len(), 2);
    assert!(config.required_libraries.is_empty());
    assert_eq!(config.connect_retries, 3);
}

#[test]
fn empty_document_uses_defaults() {
    let config = WorkerConfig::from_toml_str("").expect("empty config parses");
    assert_eq!(config, WorkerConfig::default());
    assert_eq!(config.interpreter_flags, vec!["--vanilla".to_owned()]);
    assert_eq!(config.required_libraries, vec!["sodium".to_owned()]);
    assert_eq!(config.signals.debug_prefix, "DEBUG:");
    assert_eq!(config.port, None);
}

#[test]
fn zero_request_timeout_means_unbounded() {
    let config = WorkerConfig::from_toml_str(sample_toml()).expect("config parses");
    assert_eq!(config.request_timeout(), None);
    assert_eq!(config.eval_timeout(), Some(Duration::from_secs(2)));
    assert_eq!(config.startup_timeout(), Duration::from_secs_f64(30.5));
    assert_eq!(config.stop_timeout(), Duration::from_secs(1));
    assert_eq!(config.ready_settle(), Duration::ZERO);
}

#[test]
fn configured_zone_is_resolved() {
    let config = WorkerConfig::from_toml_str(sample_toml()).expect("config parses");
    assert_eq!(config.time_zone().expect("zone"), chrono_tz::America::New_York);
}

#[test]
fn unknown_zone_is_rejected() {
    let err = WorkerConfig::from_toml_str(r#"default_time_zone = "Mars/Base""#).unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("Mars/Base")));
}

#[test]
fn zero_startup_timeout_is_rejected() {
    let err = WorkerConfig::from_toml_str("startup_timeout_seconds = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("startup_timeout_seconds")));
}

#[test]
fn negative_timeout_is_rejected() {
    let err = WorkerConfig::from_toml_str("eval_timeout_seconds = -1.0").unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("eval_timeout_seconds")));
}

#[test]
fn timeout_too_large_for_a_duration_is_rejected() {
    for field in [
        "request_timeout_seconds",
        "startup_timeout_seconds",
        "eval_timeout_seconds",
        "stop_timeout_seconds",
    ] {
        let err = WorkerConfig::from_toml_str(&format!("{field} = 1e20")).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains(field)), "{field}: {err}");
    }
}

#[test]
fn unvalidated_huge_timeout_saturates() {
    let config = WorkerConfig {
        startup_timeout_seconds: 1e20,
        eval_timeout_seconds: 1e20,
        ..WorkerConfig::default()
    };
    assert!(config.validate().is_err());
    assert_eq!(config.startup_timeout(), Duration::MAX);
    assert_eq!(config.eval_timeout(), Some(Duration::MAX));
}

#[test]
fn port_zero_is_rejected() {
    let err = WorkerConfig::from_toml_str("port = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("port")));
}

#[test]
fn blank_repository_is_rejected() {
    let err = WorkerConfig::from_toml_str(r#"repository = "  ""#).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn invalid_signal_pattern_is_rejected() {
    let err = WorkerConfig::from_toml_str("[signals]\nready = \"(unclosed\"").unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.starts_with("signals.ready")));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = WorkerConfig::from_toml_str("port = [").unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.starts_with("invalid config")));
}

#[test]
fn unknown_field_type_is_a_config_error() {
    let err = WorkerConfig::from_toml_str(r#"connect_retries = "many""#).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn loads_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rworker.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = WorkerConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.port, Some(8123));
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = WorkerConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("failed to read config")));
}
