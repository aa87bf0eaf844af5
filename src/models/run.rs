//! Run-level bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

/// Report for one end-to-end pipeline invocation. Append-only: one per
/// run, written regardless of the run's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub listings_found: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub status: RunStatus,
    pub error_detail: Option<String>,
}

impl RunReport {
    /// A freshly started, still-running report.
    pub fn started(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            listings_found: 0,
            new_count: 0,
            updated_count: 0,
            status: RunStatus::Running,
            error_detail: None,
        }
    }

    /// Close the report as successful.
    pub fn succeed(
        mut self,
        finished_at: DateTime<Utc>,
        listings_found: usize,
        new_count: usize,
        updated_count: usize,
    ) -> Self {
        self.finished_at = Some(finished_at);
        self.listings_found = listings_found;
        self.new_count = new_count;
        self.updated_count = updated_count;
        self.status = RunStatus::Success;
        self
    }

    /// Close the report as failed, recording the error detail.
    pub fn fail(mut self, finished_at: DateTime<Utc>, error: impl ToString) -> Self {
        self.finished_at = Some(finished_at);
        self.status = RunStatus::Failed;
        self.error_detail = Some(error.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(RunStatus::Running.as_str(), "running");
        assert_eq!(RunStatus::Success.as_str(), "success");
        assert_eq!(RunStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_report_lifecycle() {
        let t0 = Utc::now();
        let report = RunReport::started(t0);
        assert_eq!(report.status, RunStatus::Running);
        assert!(report.finished_at.is_none());

        let done = report.clone().succeed(t0, 25, 3, 1);
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.listings_found, 25);
        assert_eq!(done.new_count, 3);

        let failed = report.fail(t0, "navigation timed out");
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error_detail.as_deref(), Some("navigation timed out"));
    }
}
