use crate::{core::utils::join_key_segments, execution::timestamp::ExecutionTs};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic location of one compressed extract inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// `{prefix}/{schema}/{source}/{yyyy}/{mm}/{dd}/{source}.{execution_ts}.csv.gz`
    pub fn partitioned(prefix: &str, schema: &str, source: &str, ts: &ExecutionTs) -> Self {
        let file = format!("{source}.{}.csv.gz", ts.as_str());
        let year = ts.year();
        let month = ts.month();
        let day = ts.day();
        Self(join_key_segments([
            prefix,
            schema,
            source,
            year.as_str(),
            month.as_str(),
            day.as_str(),
            file.as_str(),
        ]))
    }

    /// `{prefix}/{name}_{YYYY-MM-DD}.csv.gz`
    pub fn dated(prefix: &str, name: &str, date: NaiveDate) -> Self {
        let file = format!("{name}_{}.csv.gz", date.format("%Y-%m-%d"));
        Self(join_key_segments([prefix, file.as_str()]))
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
