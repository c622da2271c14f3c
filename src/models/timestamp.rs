//! Timestamps with an optional zone and default-zone resolution.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::{AppError, Result};

/// A point in time as exchanged with the worker.
///
/// `Naive` values carry wall-clock time only and are localized in the
/// session's default zone when they are sent. Values read back from the
/// worker are always `Zoned`, annotated with that same default zone.
///
/// Equality compares absolute instants; a `Zoned` value in UTC equals the
/// same instant in any other zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timestamp {
    /// Wall-clock time without a zone.
    Naive(NaiveDateTime),
    /// Absolute instant with an IANA zone annotation.
    Zoned(DateTime<Tz>),
}

impl Timestamp {
    /// Whether the timestamp lacks a zone.
    #[must_use]
    pub fn is_naive(&self) -> bool {
        matches!(self, Self::Naive(_))
    }

    /// Attach `zone` to a naive timestamp, or return the zoned value as-is.
    ///
    /// A wall-clock time repeated by a backward DST transition resolves to
    /// the earlier instant.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Codec` when the wall-clock time does not exist in
    /// `zone` (skipped by a forward DST transition).
    pub fn resolve(&self, zone: Tz) -> Result<DateTime<Tz>> {
        match self {
            Self::Zoned(dt) => Ok(*dt),
            Self::Naive(naive) => match zone.from_local_datetime(naive) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt),
                LocalResult::None => Err(AppError::Codec(format!(
                    "local time {naive} does not exist in time zone {zone}"
                ))),
            },
        }
    }

    /// Milliseconds since the UNIX epoch, resolving naive values in `zone`.
    ///
    /// # Errors
    ///
    /// Propagates [`Timestamp::resolve`] failures.
    pub fn to_epoch_millis(&self, zone: Tz) -> Result<i64> {
        Ok(self.resolve(zone)?.timestamp_millis())
    }

    /// Build a zoned timestamp from (possibly fractional) epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Codec` if `millis` is not finite or out of range.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_epoch_millis(millis: f64, zone: Tz) -> Result<Self> {
        if !millis.is_finite() {
            return Err(AppError::Codec(format!("invalid epoch milliseconds: {millis}")));
        }
        let whole = millis.floor();
        let sub_ms_nanos = ((millis - whole) * 1_000_000.0).round() as i64;
        let base = DateTime::<Utc>::from_timestamp_millis(whole as i64).ok_or_else(|| {
            AppError::Codec(format!("epoch milliseconds out of range: {millis}"))
        })?;
        let instant = base + chrono::Duration::nanoseconds(sub_ms_nanos);
        Ok(Self::Zoned(instant.with_timezone(&zone)))
    }

    /// The zone annotation, if any.
    #[must_use]
    pub fn zone(&self) -> Option<Tz> {
        match self {
            Self::Naive(_) => None,
            Self::Zoned(dt) => Some(dt.timezone()),
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Naive(naive) => write!(f, "{naive}"),
            Self::Zoned(dt) => write!(f, "{} {}", dt.to_rfc3339(), dt.timezone()),
        }
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(value: NaiveDateTime) -> Self {
        Self::Naive(value)
    }
}

impl From<DateTime<Tz>> for Timestamp {
    fn from(value: DateTime<Tz>) -> Self {
        Self::Zoned(value)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Zoned(value.with_timezone(&Tz::UTC))
    }
}

/// Resolve a configured zone name, or the system zone when `name` is `None`.
///
/// # Errors
///
/// Returns `AppError::Config` if `name` is not a known IANA zone.
pub fn resolve_zone(name: Option<&str>) -> Result<Tz> {
    match name {
        Some(name) => name
            .trim()
            .parse::<Tz>()
            .map_err(|err| AppError::Config(format!("unknown time zone {name:?}: {err}"))),
        None => Ok(system_zone()),
    }
}

/// The operating system's configured zone, falling back to UTC.
#[must_use]
pub fn system_zone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            warn!(zone = %name, "system time zone is not a known IANA zone, using UTC");
            Tz::UTC
        }),
        Err(err) => {
            warn!(%err, "could not determine the system time zone, using UTC");
            Tz::UTC
        }
    }
}
