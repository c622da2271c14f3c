//! Classification of worker output lines.

use regex::Regex;

use crate::config::SignalConfig;
use crate::{AppError, Result};

/// What a single output line means to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// The HTTP listener is up.
    Ready,
    /// The worker is installing packages; startup may take a while.
    Installing,
    /// Known noise, dropped.
    Ignored,
    /// Worker debug output with the prefix removed.
    Debug(String),
    /// Anything else, logged verbatim.
    Message(String),
}

/// Compiled form of [`SignalConfig`].
#[derive(Debug, Clone)]
pub struct SignalPatterns {
    ready: Regex,
    installing: Regex,
    ignore: Vec<Regex>,
    debug_prefix: String,
}

impl SignalPatterns {
    /// Compile the configured patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first pattern that fails to compile.
    pub fn from_config(config: &SignalConfig) -> Result<Self> {
        Ok(Self {
            ready: compile("signals.ready", &config.ready)?,
            installing: compile("signals.installing", &config.installing)?,
            ignore: config
                .ignore
                .iter()
                .map(|pattern| compile("signals.ignore", pattern))
                .collect::<Result<Vec<_>>>()?,
            debug_prefix: config.debug_prefix.clone(),
        })
    }

    /// Classify one line; the first matching rule wins.
    #[must_use]
    pub fn classify(&self, line: &str) -> LineClass {
        if self.ready.is_match(line) {
            return LineClass::Ready;
        }
        if self.installing.is_match(line) {
            return LineClass::Installing;
        }
        if self.ignore.iter().any(|re| re.is_match(line)) {
            return LineClass::Ignored;
        }
        if !self.debug_prefix.is_empty() {
            if let Some(rest) = line.strip_prefix(&self.debug_prefix) {
                return LineClass::Debug(rest.to_owned());
            }
        }
        LineClass::Message(line.to_owned())
    }
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| AppError::Config(format!("{name}: invalid pattern: {err}")))
}
