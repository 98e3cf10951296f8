use anyhow::anyhow;
use chrono::{DateTime, Duration, SubsecRound, Utc};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Drops sub-millisecond precision so a timestamp survives the
/// millisecond ISO-8601 text form unchanged.
#[must_use]
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(3)
}

/// Converts a (possibly fractional) hour count into a duration rounded to
/// the millisecond. Rejects zero, negative and non-finite offsets.
pub fn hours_to_duration(hours: f64) -> anyhow::Result<Duration> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(anyhow!("expiry offset must be a positive number of hours, got {hours}"));
    }
    let millis = (hours * MILLIS_PER_HOUR).round();
    if millis < 1.0 || millis > i64::MAX as f64 {
        return Err(anyhow!("expiry offset out of range: {hours}h"));
    }
    Duration::try_milliseconds(millis as i64)
        .ok_or_else(|| anyhow!("expiry offset out of range: {hours}h"))
}

/// Formats a positive remaining duration as whole hours and minutes.
#[must_use]
pub fn format_remaining(remaining: Duration) -> String {
    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() % 60;
    format!("{hours}h {minutes}m")
}

/// ISO-8601 timestamps with millisecond precision and a `Z` suffix,
/// the same text a browser's `Date.toISOString` produces.
pub mod iso8601_serde {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Accepts any RFC 3339 timestamp, dropping digits finer than a
    /// millisecond so the value matches what [`format`] writes back.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| super::truncate_to_millis(dt.with_timezone(&Utc)))
    }
}
