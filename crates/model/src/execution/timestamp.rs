use crate::error::TimestampError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The logical execution time of a scheduled run.
///
/// `raw` is kept verbatim because it is embedded in object keys; two runs of
/// the same logical execution must produce byte-identical keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTs {
    raw: String,
    at: NaiveDateTime,
}

impl ExecutionTs {
    pub fn parse(raw: &str) -> Result<Self, TimestampError> {
        let raw = raw.trim();
        let at = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            dt.with_timezone(&Utc).naive_utc()
        } else if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            dt
        } else if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            d.and_time(chrono::NaiveTime::MIN)
        } else {
            return Err(TimestampError::Unrecognised(raw.to_string()));
        };

        Ok(Self {
            raw: raw.to_string(),
            at,
        })
    }

    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            raw: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            at: now.naive_utc(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.at
    }

    pub fn date(&self) -> NaiveDate {
        self.at.date()
    }

    pub fn year(&self) -> String {
        format!("{:04}", self.at.year())
    }

    pub fn month(&self) -> String {
        format!("{:02}", self.at.month())
    }

    pub fn day(&self) -> String {
        format!("{:02}", self.at.day())
    }
}

impl FromStr for ExecutionTs {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ExecutionTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
