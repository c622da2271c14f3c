//! HTTP client for one running worker.

use std::time::Duration;

use chrono_tz::Tz;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use tracing::debug;

use super::response::{check_status, decode_body};
use crate::codec::table::{encode_table, ARROW_FILE_MEDIA_TYPE};
use crate::codec::{json, JSON_MEDIA_TYPE};
use crate::config::WorkerConfig;
use crate::models::Value;
use crate::{AppError, Result};

/// Header carrying the per-session secret.
pub const TOKEN_HEADER: &str = "Authentication-Token";

/// Retries for requests that could not connect at all.
///
/// The worker's listener sometimes refuses the first connections right after
/// it reports readiness. Requests that reached the worker are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// No retries at all.
    pub const NONE: Self = Self {
        retries: 0,
        initial_backoff: Duration::ZERO,
    };

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Trim a variable name and reject blank ones.
///
/// # Errors
///
/// Returns `AppError::InvalidKey` if `name` is empty after trimming.
pub fn normalize_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidKey(
            "variable names must contain at least one non-whitespace character".into(),
        ));
    }
    Ok(trimmed)
}

/// Client bound to `http://127.0.0.1:<port>` with the session token.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: Client,
    base_url: String,
    token: String,
    request_timeout: Option<Duration>,
    zone: Tz,
    retry: RetryPolicy,
    session_id: String,
}

impl RpcClient {
    /// Build a client for the worker on `port`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid default time zone and
    /// `AppError::Transport` if the HTTP client cannot be built.
    pub fn new(port: u16, token: &str, config: &WorkerConfig, session_id: &str) -> Result<Self> {
        let http = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| AppError::Transport(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            http,
            base_url: format!("http://127.0.0.1:{port}"),
            token: token.to_owned(),
            request_timeout: config.request_timeout(),
            zone: config.time_zone()?,
            retry: RetryPolicy {
                retries: config.connect_retries,
                initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            },
            session_id: session_id.to_owned(),
        })
    }

    /// Same client, sending `token` instead.
    #[must_use]
    pub fn with_token(&self, token: &str) -> Self {
        Self {
            token: token.to_owned(),
            ..self.clone()
        }
    }

    /// Names of all variables defined in the worker.
    ///
    /// # Errors
    ///
    /// Any RPC error, or `AppError::Protocol` if the answer is not a list of
    /// strings.
    pub async fn list(&self) -> Result<Vec<String>> {
        let value = self
            .call("list", true, self.retry, |http| Ok(self.post(http, "/list")))
            .await?;
        names_from_value(value)
    }

    /// Fetch variable `name`.
    ///
    /// # Errors
    ///
    /// Any RPC error; a missing variable is reported by the worker.
    pub async fn get(&self, name: &str) -> Result<Value> {
        let name = normalize_name(name)?;
        self.call("get", true, self.retry, |http| {
            Ok(self.post(http, "/get").query(&[("name", name)]))
        })
        .await
    }

    /// Assign `value` to variable `name`.
    ///
    /// Tables travel as a multipart part named `value` holding an Arrow IPC
    /// file; everything else as a JSON body.
    ///
    /// # Errors
    ///
    /// `AppError::Codec` if the value cannot be encoded, or any RPC error.
    pub async fn set(&self, name: &str, value: &Value) -> Result<()> {
        let name = normalize_name(name)?;

        if let Value::Table(batch) = value {
            let bytes = encode_table(batch)?;
            debug!(
                session_id = self.session_id.as_str(),
                name,
                bytes = bytes.len(),
                "sending table"
            );
            self.call("set", false, self.retry, |http| {
                let part = Part::bytes(bytes.clone())
                    .mime_str(ARROW_FILE_MEDIA_TYPE)
                    .map_err(|err| AppError::Codec(format!("invalid media type: {err}")))?;
                Ok(self
                    .put(http, "/set")
                    .query(&[("name", name)])
                    .multipart(Form::new().part("value", part)))
            })
            .await?;
            return Ok(());
        }

        let body = json::encode_set_body(value, self.zone)?;
        self.call("set", false, self.retry, |http| {
            Ok(self
                .put(http, "/set")
                .query(&[("name", name)])
                .header(CONTENT_TYPE, JSON_MEDIA_TYPE)
                .body(body.clone()))
        })
        .await?;
        Ok(())
    }

    /// Remove variable `name`.
    ///
    /// # Errors
    ///
    /// Any RPC error.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let name = normalize_name(name)?;
        self.call("delete", false, self.retry, |http| {
            Ok(self
                .request(http, reqwest::Method::DELETE, "/delete", self.request_timeout)
                .query(&[("name", name)]))
        })
        .await?;
        Ok(())
    }

    /// Evaluate `expr` and return its value. `None` waits forever.
    ///
    /// # Errors
    ///
    /// `AppError::Worker` if evaluation raised an error, or any RPC error.
    pub async fn eval(&self, expr: &str, timeout: Option<Duration>) -> Result<Value> {
        let body = json::encode_eval_body(expr)?;
        self.call("eval", true, self.retry, |http| {
            Ok(self
                .request(http, reqwest::Method::POST, "/eval", timeout)
                .header(CONTENT_TYPE, JSON_MEDIA_TYPE)
                .body(body.clone()))
        })
        .await
    }

    /// Ask the worker to quit. Sent once; callers usually ignore the result
    /// because the worker drops the connection while exiting.
    ///
    /// # Errors
    ///
    /// Any RPC error.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.call("shutdown", false, RetryPolicy::NONE, |http| {
            Ok(self.request(http, reqwest::Method::POST, "/shutdown", Some(timeout)))
        })
        .await?;
        Ok(())
    }

    fn post(&self, http: &Client, path: &str) -> RequestBuilder {
        self.request(http, reqwest::Method::POST, path, self.request_timeout)
    }

    fn put(&self, http: &Client, path: &str) -> RequestBuilder {
        self.request(http, reqwest::Method::PUT, path, self.request_timeout)
    }

    fn request(
        &self,
        http: &Client,
        method: reqwest::Method,
        path: &str,
        timeout: Option<Duration>,
    ) -> RequestBuilder {
        let builder = http
            .request(method, format!("{}{path}", self.base_url))
            .header(TOKEN_HEADER, &self.token);
        match timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    async fn call<F>(
        &self,
        op: &str,
        expect_value: bool,
        retry: RetryPolicy,
        build: F,
    ) -> Result<Value>
    where
        F: Fn(&Client) -> Result<RequestBuilder>,
    {
        let session_id = self.session_id.as_str();
        let mut attempt = 0;

        let response = loop {
            debug!(session_id, op, url = self.base_url.as_str(), "sending request");
            match build(&self.http)?.send().await {
                Ok(response) => break response,
                Err(err) if err.is_connect() && attempt < retry.retries => {
                    let delay = retry.delay(attempt);
                    attempt += 1;
                    debug!(session_id, op, attempt, ?delay, %err, "connection failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(transport_error(op, &err)),
            }
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(op, &err))?;

        check_status(status, &body)?;

        if !expect_value {
            debug!(session_id, op, "request succeeded");
            return Ok(Value::Null);
        }
        decode_body(content_type.as_deref(), &body, self.zone)
    }
}

fn transport_error(op: &str, err: &reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Transport(format!("{op} request timed out: {err}"))
    } else {
        AppError::Transport(format!("{op} request failed: {err}"))
    }
}

/// The worker unboxes one-element vectors, so a single name arrives as a
/// string and no names as `null` or `[]`.
fn names_from_value(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(name) => Ok(vec![name]),
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                other => Err(AppError::Protocol(format!(
                    "variable list contains a {} instead of a name",
                    other.kind()
                ))),
            })
            .collect(),
        other => Err(AppError::Protocol(format!(
            "expected a list of variable names, got a {}",
            other.kind()
        ))),
    }
}
