use crate::execution::timestamp::ExecutionTs;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Variables handed to a query template.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryContext {
    vars: BTreeMap<String, JsonValue>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard variables of a scheduled run: `ts`, `execution_ts`,
    /// `year`, `month`, `day`, plus `database` when known.
    pub fn for_execution(ts: &ExecutionTs, database: Option<&str>) -> Self {
        let mut ctx = Self::new()
            .with("ts", ts.as_str())
            .with("execution_ts", ts.as_str())
            .with("year", ts.year())
            .with("month", ts.month())
            .with("day", ts.day());
        if let Some(db) = database {
            ctx.insert("database", db);
        }
        ctx
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }

    pub fn vars(&self) -> &BTreeMap<String, JsonValue> {
        &self.vars
    }

    /// Overlays `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: QueryContext) {
        self.vars.extend(other.vars);
    }
}
