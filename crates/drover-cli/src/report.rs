use chrono::{DateTime, Utc};
use drover_runtime::RequestError;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Summary of one batch run, results in input order.
#[derive(Debug, Serialize)]
pub struct Report {
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<Entry>,
}

/// Outcome of a single request.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Entry {
    Ok { index: usize, value: JsonValue },
    Error { index: usize, error: String },
}

impl Entry {
    fn is_ok(&self) -> bool {
        matches!(self, Entry::Ok { .. })
    }
}

impl Report {
    /// Build from a fail-fast run, where every slot succeeded.
    pub fn from_values(values: Vec<JsonValue>, elapsed: Duration) -> Self {
        Self::from_entries(
            values
                .into_iter()
                .enumerate()
                .map(|(index, value)| Entry::Ok { index, value })
                .collect(),
            elapsed,
        )
    }

    /// Build from a settled run.
    pub fn from_settled(results: Vec<Result<JsonValue, RequestError>>, elapsed: Duration) -> Self {
        Self::from_entries(
            results
                .into_iter()
                .enumerate()
                .map(|(index, result)| match result {
                    Ok(value) => Entry::Ok { index, value },
                    Err(error) => Entry::Error {
                        index,
                        error: error.to_string(),
                    },
                })
                .collect(),
            elapsed,
        )
    }

    fn from_entries(results: Vec<Entry>, elapsed: Duration) -> Self {
        let succeeded = results.iter().filter(|entry| entry.is_ok()).count();
        Self {
            completed_at: Utc::now(),
            elapsed_ms: elapsed.as_millis().try_into().unwrap_or(u64::MAX),
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}
