//! Display format and classification of `AppError`.

use rworker::AppError;

#[test]
fn worker_error_displays_r_message() {
    let err = AppError::Worker {
        message: "object 'y' not found".into(),
        call_stack: vec!["eval(expr)".into()],
    };
    assert_eq!(err.to_string(), "from R: object 'y' not found");
}

#[test]
fn display_prefixes_are_distinct() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::NotInstalled("x".into()), "not installed: x"),
        (AppError::Spawn("x".into()), "spawn: x"),
        (AppError::StartupTimeout("x".into()), "startup timeout: x"),
        (AppError::Unauthorized("x".into()), "unauthorized: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::ProcessExited("x".into()), "worker exited: x"),
        (AppError::Codec("x".into()), "codec: x"),
        (AppError::InvalidKey("x".into()), "invalid key: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn only_lifecycle_failures_are_fatal() {
    assert!(AppError::NotInstalled("r".into()).is_fatal());
    assert!(AppError::StartupTimeout("slow".into()).is_fatal());
    assert!(AppError::ProcessExited("gone".into()).is_fatal());

    assert!(!AppError::Unauthorized("token".into()).is_fatal());
    assert!(!AppError::Transport("timeout".into()).is_fatal());
    assert!(!AppError::Worker {
        message: "boom".into(),
        call_stack: Vec::new(),
    }
    .is_fatal());
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
    assert_eq!(err, AppError::Io("pipe closed".into()));
}

#[test]
fn json_errors_become_codec_errors() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert!(matches!(err, AppError::Codec(msg) if msg.starts_with("json:")));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
    assert_error(&AppError::Io("x".into()));
}
