//! Forwarding of the worker's stdout and stderr into the log sink.
//!
//! One task per stream reads lines through [`LogLineCodec`], classifies each
//! with [`SignalPatterns`] and either updates [`WorkerSignals`] or hands the
//! line to a [`LogSink`]:
//!
//! | Class                  | Effect                                      |
//! |------------------------|---------------------------------------------|
//! | [`LineClass::Ready`]   | readiness flag set                          |
//! | [`LineClass::Installing`] | installing flag set                      |
//! | [`LineClass::Ignored`] | dropped                                     |
//! | [`LineClass::Debug`]   | logged at `DEBUG` as `R:<rest>`             |
//! | [`LineClass::Message`] | `INFO` for stdout, `WARN` for stderr        |
//!
//! A forwarder never fails. On EOF, read error or cancellation it clears the
//! installing flag and reports the stream as closed.

pub mod classify;
pub mod codec;
pub mod signals;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Level};

pub use classify::{LineClass, SignalPatterns};
pub use codec::LogLineCodec;
pub use signals::{Readiness, WorkerSignals};

use crate::logging::LogSink;

/// Which of the worker's output streams a forwarder reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StreamKind {
    /// Level used for plain message lines from this stream.
    #[must_use]
    pub fn message_level(self) -> Level {
        match self {
            Self::Stdout => Level::INFO,
            Self::Stderr => Level::WARN,
        }
    }

    /// Short name used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Everything a forwarder task needs besides its stream.
#[derive(Debug, Clone)]
pub struct ForwarderContext {
    /// Session identifier for log fields.
    pub session_id: String,
    /// Compiled line patterns.
    pub patterns: Arc<SignalPatterns>,
    /// Shared startup flags.
    pub signals: WorkerSignals,
    /// Destination for message and debug lines.
    pub sink: Arc<dyn LogSink>,
    /// Stops the forwarder early.
    pub cancel: CancellationToken,
}

/// Read `stream` to the end, classifying and forwarding every line.
pub async fn run_forwarder<R>(ctx: ForwarderContext, kind: StreamKind, stream: R)
where
    R: AsyncRead + Unpin + Send,
{
    let session_id = ctx.session_id.as_str();
    let stream_name = kind.as_str();
    let mut framed = FramedRead::new(stream, LogLineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = ctx.cancel.cancelled() => {
                debug!(session_id, stream = stream_name, "forwarder: cancelled");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, stream = stream_name, "forwarder: EOF");
                        break;
                    }
                    Some(Err(err)) => {
                        debug!(
                            session_id,
                            stream = stream_name,
                            error = %err,
                            "forwarder: read failed, stopping"
                        );
                        break;
                    }
                    Some(Ok(line)) => forward_line(&ctx, kind, &line),
                }
            }
        }
    }

    ctx.signals.stream_closed();
}

/// Spawn [`run_forwarder`] on the current runtime.
#[must_use]
pub fn spawn_forwarder<R>(ctx: ForwarderContext, kind: StreamKind, stream: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run_forwarder(ctx, kind, stream))
}

fn forward_line(ctx: &ForwarderContext, kind: StreamKind, line: &str) {
    match ctx.patterns.classify(line) {
        LineClass::Ready => {
            debug!(session_id = ctx.session_id.as_str(), "forwarder: worker ready");
            ctx.signals.mark_ready();
        }
        LineClass::Installing => {
            ctx.sink.log(Level::INFO, "installing R packages, this may take a while");
            ctx.signals.set_installing(true);
        }
        LineClass::Ignored => {}
        LineClass::Debug(rest) => ctx.sink.log(Level::DEBUG, &format!("R:{rest}")),
        LineClass::Message(text) => ctx.sink.log(kind.message_level(), &text),
    }
}
