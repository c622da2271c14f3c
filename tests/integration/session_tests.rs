//! Session lifecycle with a shell script standing in for the worker process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rworker::config::WorkerConfig;
use rworker::{AppError, AsyncSession, LogSink, SessionState, Value};
use tracing::Level;

use super::test_helpers::{
    shell_worker_config, spawn_fake_worker, FakeWorker, Recorder, READY_SCRIPT,
};

async fn ready_session(script: &str) -> (AsyncSession, FakeWorker, Arc<Recorder>) {
    let (port, fake) = spawn_fake_worker().await;
    let sink = Arc::new(Recorder::default());
    let config = shell_worker_config(port, script);
    let session = AsyncSession::with_sink(config, Arc::clone(&sink) as Arc<dyn LogSink>).unwrap();
    fake.expect_token(&session.auth_token());
    (session, fake, sink)
}

fn kill_hard(pid: u32) {
    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

// ── Lifecycle ───────────────────────────────────────────────

/// The first operation starts the worker; stop returns to idle.
#[tokio::test]
async fn first_operation_starts_worker() {
    let (session, _fake, _sink) = ready_session(READY_SCRIPT).await;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.pid(), None);

    session.set("x", 42).await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.pid().is_some());
    assert_eq!(session.port(), session.config().port);
    assert_eq!(session.get("x").await.unwrap(), Value::Int(42));

    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.port(), None);
}

/// Map-like helpers and eval go through the same worker.
#[tokio::test]
async fn map_operations_and_eval() {
    let (session, _fake, _sink) = ready_session(READY_SCRIPT).await;

    assert!(session.is_empty().await.unwrap());
    session.set("x", 1).await.unwrap();
    session.set("y", 2).await.unwrap();

    assert_eq!(session.keys().await.unwrap(), vec!["x", "y"]);
    assert_eq!(session.len().await.unwrap(), 2);
    assert!(session.contains_key(" y ").await.unwrap());
    assert!(!session.contains_key("z").await.unwrap());
    assert_eq!(session.eval("x + y + 1").await.unwrap(), Value::Int(4));

    session.delete("x").await.unwrap();
    assert_eq!(session.keys().await.unwrap(), vec!["y"]);
    session.stop().await;
}

/// The worker is launched with the session's port and token.
#[tokio::test]
async fn worker_receives_port_and_token() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let script = format!(
        r#"printf '%s %s' "$1" "$6" > '{}'; {READY_SCRIPT}"#,
        args_file.display()
    );
    let (session, _fake, _sink) = ready_session(&script).await;

    session.start().await.unwrap();

    let seen = std::fs::read_to_string(&args_file).unwrap();
    let port = session.port().unwrap();
    assert_eq!(seen, format!("{port} {}", session.auth_token()));
    session.stop().await;
}

/// Stop is idempotent and sends a single shutdown request.
#[tokio::test]
async fn stop_is_idempotent() {
    let (session, fake, _sink) = ready_session(READY_SCRIPT).await;
    session.stop().await;
    assert_eq!(fake.count("/shutdown"), 0);

    session.start().await.unwrap();
    session.start().await.unwrap();
    session.stop().await;
    session.stop().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(fake.count("/shutdown"), 1);
}

/// A stopped session starts a fresh worker on the next operation.
#[tokio::test]
async fn restart_after_stop() {
    let (session, _fake, _sink) = ready_session(READY_SCRIPT).await;
    session.start().await.unwrap();
    let first = session.pid();
    session.stop().await;

    session.keys().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_ne!(session.pid(), first);
    session.stop().await;
}

// ── Failures ────────────────────────────────────────────────

/// A worker killed from outside is reported, never silently restarted.
#[tokio::test]
async fn killed_worker_is_reported_until_stop() {
    let (session, _fake, _sink) = ready_session(READY_SCRIPT).await;
    session.start().await.unwrap();
    let pid = session.pid().unwrap();

    kill_hard(pid);

    let deadline = Instant::now() + Duration::from_secs(5);
    let err = loop {
        match session.keys().await {
            Err(err) => break err,
            Ok(_) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(_) => panic!("worker still reported alive after SIGKILL"),
        }
    };
    assert!(matches!(err, AppError::ProcessExited(msg) if msg.contains("signal")));
    assert_eq!(session.state(), SessionState::Exited);

    assert!(matches!(session.get("x").await, Err(AppError::ProcessExited(_))));
    assert_eq!(session.pid(), Some(pid));

    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.keys().await.is_ok());
    session.stop().await;
}

/// Changing the token on a running session breaks authentication.
#[tokio::test]
async fn changed_token_is_rejected() {
    let (session, _fake, _sink) = ready_session(READY_SCRIPT).await;
    let original = session.auth_token();
    session.start().await.unwrap();

    session.set("x", 1).await.unwrap();

    session.set_auth_token("not-the-token").await;
    assert!(matches!(session.keys().await, Err(AppError::Unauthorized(_))));
    assert!(matches!(session.len().await, Err(AppError::Unauthorized(_))));
    assert!(matches!(session.get("x").await, Err(AppError::Unauthorized(_))));
    assert!(matches!(session.set("x", 2).await, Err(AppError::Unauthorized(_))));
    assert!(matches!(session.delete("x").await, Err(AppError::Unauthorized(_))));
    assert!(matches!(session.eval("x + 1").await, Err(AppError::Unauthorized(_))));
    assert_eq!(session.state(), SessionState::Ready);

    session.set_auth_token(original).await;
    assert_eq!(session.get("x").await.unwrap(), Value::Int(1));
    assert_eq!(session.eval("x + 1").await.unwrap(), Value::Int(2));
    session.stop().await;
}

/// R errors leave the session usable.
#[tokio::test]
async fn worker_errors_are_not_fatal() {
    let (session, _fake, _sink) = ready_session(READY_SCRIPT).await;

    let err = session.get("undefined").await.unwrap_err();
    assert!(matches!(err, AppError::Worker { .. }));
    assert!(!err.is_fatal());

    let err = session
        .eval_with_timeout("Sys.sleep(2)", Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Transport(_)));

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.eval("20 + 22").await.unwrap(), Value::Int(42));
    session.stop().await;
}

/// Blank names fail before anything is launched.
#[tokio::test]
async fn blank_name_does_not_start_worker() {
    let (session, fake, _sink) = ready_session(READY_SCRIPT).await;
    assert!(matches!(session.get("\t").await, Err(AppError::InvalidKey(_))));
    assert!(matches!(session.set("", 1).await, Err(AppError::InvalidKey(_))));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(fake.calls().is_empty());
}

// ── Startup ─────────────────────────────────────────────────

/// No readiness line within the window is a startup timeout.
#[tokio::test]
async fn silent_worker_times_out() {
    let (port, _fake) = spawn_fake_worker().await;
    let config = WorkerConfig {
        startup_timeout_seconds: 0.3,
        ..shell_worker_config(port, "exec sleep 30")
    };
    let session = AsyncSession::new(config).unwrap();

    let started = Instant::now();
    let err = session.start().await.unwrap_err();

    assert!(matches!(err, AppError::StartupTimeout(_)));
    assert!(err.is_fatal());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.pid(), None);
}

/// Package installation extends the startup window.
#[tokio::test]
async fn installing_extends_startup() {
    let script = format!("echo INSTALLING_R_PACKAGES; sleep 1; {READY_SCRIPT}");
    let (port, fake) = spawn_fake_worker().await;
    let sink = Arc::new(Recorder::default());
    let config = WorkerConfig {
        startup_timeout_seconds: 0.4,
        ..shell_worker_config(port, &script)
    };
    let session = AsyncSession::with_sink(config, Arc::clone(&sink) as Arc<dyn LogSink>).unwrap();
    fake.expect_token(&session.auth_token());

    session.start().await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert!(sink
        .lines()
        .iter()
        .any(|(level, line)| *level == Level::INFO && line.contains("installing R packages")));
    session.stop().await;
}

/// A worker that dies during startup reports its exit status and output.
#[tokio::test]
async fn early_exit_is_process_exited() {
    let script = "echo 'Error: there is no package called plumber' >&2; exit 3";
    let (session, _fake, sink) = ready_session(script).await;

    let err = session.start().await.unwrap_err();

    assert!(matches!(err, AppError::ProcessExited(msg) if msg.contains("exit code 3")));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(sink.lines().contains(&(
        Level::WARN,
        "Error: there is no package called plumber".to_owned()
    )));
}

/// A second session on an occupied port fails fast instead of waiting out
/// the startup window.
#[tokio::test]
async fn second_session_on_same_port_fails_fast() {
    let locks = tempfile::tempdir().unwrap();
    // Exclusive per-port directory stands in for the listener's bind.
    let bind = format!(r#"mkdir '{}/port-'"$1" 2>/dev/null"#, locks.path().display());
    let fail = r#"{ echo "createTcpServer: address already in use" >&2; exit 1; }"#;
    let script = format!("{bind} || {fail}; {READY_SCRIPT}");
    let (port, fake) = spawn_fake_worker().await;
    let first = AsyncSession::new(shell_worker_config(port, &script)).unwrap();
    let sink = Arc::new(Recorder::default());
    let second = AsyncSession::with_sink(
        shell_worker_config(port, &script),
        Arc::clone(&sink) as Arc<dyn LogSink>,
    )
    .unwrap();
    fake.expect_token(&first.auth_token());
    first.start().await.unwrap();

    let started = Instant::now();
    let err = second.start().await.unwrap_err();

    assert!(
        matches!(err, AppError::ProcessExited(ref msg) if msg.contains("exit code 1")),
        "{err}"
    );
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(second.state(), SessionState::Idle);
    assert!(sink
        .lines()
        .iter()
        .any(|(_, line)| line.contains("address already in use")));

    assert_eq!(first.state(), SessionState::Ready);
    assert!(first.keys().await.is_ok());
    first.stop().await;
}

/// A missing interpreter is reported before anything is spawned.
#[tokio::test]
async fn missing_interpreter_is_not_installed() {
    let (port, _fake) = spawn_fake_worker().await;
    let mut config = shell_worker_config(port, READY_SCRIPT);
    config.executable.program = "rworker-no-such-interpreter".into();
    let session = AsyncSession::new(config).unwrap();

    assert!(matches!(session.keys().await, Err(AppError::NotInstalled(_))));
    assert_eq!(session.state(), SessionState::Idle);
}

/// Invalid configuration is rejected when the session is built.
#[tokio::test]
async fn invalid_config_is_rejected_up_front() {
    let config = WorkerConfig {
        startup_timeout_seconds: 0.0,
        ..WorkerConfig::default()
    };
    assert!(matches!(AsyncSession::new(config), Err(AppError::Config(_))));
}
