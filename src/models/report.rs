//! Per-object download outcomes and the batch report built from them.

use serde::{Deserialize, Serialize};

/// Why a download task did not transfer anything.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The index already holds this key/etag pair.
    Indexed,
    /// A file of the expected size is already at the destination.
    PresentOnDisk,
    /// Zero-byte `folder/` key; there is no content to fetch.
    DirectoryMarker,
}

/// Terminal state of one download task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success,
    Skipped(SkipReason),
    Failed(String),
}

/// Aggregated outcome counts. `total` counts submitted tasks.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl DownloadStats {
    pub fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Success => self.success += 1,
            DownloadOutcome::Skipped(_) => self.skipped += 1,
            DownloadOutcome::Failed(_) => self.failed += 1,
        }
        self.total += 1;
    }
}

/// Settings snapshot embedded in the report.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportConfig {
    pub worker_count: usize,
    pub retry_limit: u32,
}

/// Artifact persisted once per download batch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DownloadReport {
    /// RFC 3339 timestamp taken when the batch finished.
    pub timestamp: String,

    pub output_dir: String,

    pub statistics: DownloadStats,

    pub config: ReportConfig,

    /// Whether the batch was cut short by cancellation.
    #[serde(default)]
    pub interrupted: bool,

    /// Objects never handed to a worker because of cancellation.
    #[serde(default)]
    pub not_submitted: usize,
}

impl DownloadReport {
    pub fn has_failures(&self) -> bool {
        self.statistics.failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_every_outcome_once() {
        let mut stats = DownloadStats::default();
        for outcome in [
            DownloadOutcome::Success,
            DownloadOutcome::Skipped(SkipReason::Indexed),
            DownloadOutcome::Skipped(SkipReason::PresentOnDisk),
            DownloadOutcome::Failed("boom".into()),
        ] {
            stats.record(&outcome);
        }
        assert_eq!(stats.success, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, stats.success + stats.failed + stats.skipped);
    }

    #[test]
    fn report_serializes_with_statistics_and_config_sections() {
        let report = DownloadReport {
            timestamp: "2024-05-01T10:00:00Z".into(),
            output_dir: "downloads".into(),
            statistics: DownloadStats {
                success: 1,
                failed: 0,
                skipped: 2,
                total: 3,
            },
            config: ReportConfig {
                worker_count: 5,
                retry_limit: 3,
            },
            interrupted: false,
            not_submitted: 0,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["statistics"]["total"], 3);
        assert_eq!(value["config"]["worker_count"], 5);
        assert_eq!(value["config"]["retry_limit"], 3);
    }
}
