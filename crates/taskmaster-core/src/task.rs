use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::{format_remaining, iso8601_serde};

pub const DEFAULT_CATEGORY: &str = "Personal";
pub const DEFAULT_EXPIRY_HOURS: f64 = 24.0;
pub const EXPIRED_LABEL: &str = "Expired";

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Sort rank; lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Ok(Priority::Low),
            "medium" | "m" => Ok(Priority::Medium),
            "high" | "h" => Ok(Priority::High),
            other => Err(anyhow!("invalid priority: {other}")),
        }
    }
}

/// One to-do item. The expiry fields are recomputed by the store and can
/// only be read from outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,

    #[serde(rename = "task")]
    pub text: String,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(with = "iso8601_serde")]
    created_at: DateTime<Utc>,

    #[serde(with = "iso8601_serde")]
    expires_at: DateTime<Utc>,

    #[serde(default)]
    pub is_complete: bool,

    #[serde(default)]
    is_expired: bool,

    #[serde(default)]
    time_remaining: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Task {
    /// Builds a fresh, incomplete task. `text` is trimmed and must not be
    /// empty; `expiry` must be positive.
    pub fn new(
        id: u64,
        text: &str,
        priority: Priority,
        category: impl Into<String>,
        created_at: DateTime<Utc>,
        expiry: Duration,
    ) -> anyhow::Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("task text cannot be empty"));
        }
        if expiry <= Duration::zero() {
            return Err(anyhow!("expiry must be in the future, got {expiry}"));
        }
        let expires_at = created_at
            .checked_add_signed(expiry)
            .ok_or_else(|| anyhow!("expiry {expiry} is past the representable date range"))?;

        Ok(Self {
            id,
            text: text.to_string(),
            priority,
            category: category.into(),
            created_at,
            expires_at,
            is_complete: false,
            is_expired: false,
            time_remaining: String::new(),
        })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired
    }

    pub fn time_remaining(&self) -> &str {
        &self.time_remaining
    }

    /// Not complete and not expired.
    pub fn is_pending(&self) -> bool {
        !self.is_complete && !self.is_expired
    }

    /// Recomputes the derived expiry fields against `now`. Returns true when
    /// this call is the one that flipped the task to expired.
    pub(crate) fn refresh_expiry(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_expired {
            self.time_remaining = EXPIRED_LABEL.to_string();
            return false;
        }

        let remaining = self.expires_at - now;
        if remaining <= Duration::zero() {
            self.is_expired = true;
            self.time_remaining = EXPIRED_LABEL.to_string();
            true
        } else {
            self.time_remaining = format_remaining(remaining);
            false
        }
    }
}
