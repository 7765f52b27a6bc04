use std::path::PathBuf;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("invalid_selector: {0}")]
    InvalidSelector(String),
    #[error("unsupported: {0}")]
    UnsupportedOperation(String),
    #[error("invalid_table_id: {0}")]
    InvalidTableId(String),
    #[error("missing_project: set GOOGLE_CLOUD_PROJECT, run on GCE or use a project.dataset.table id")]
    MissingProject,
}

/// An item as found on the listing page, before its detail page was visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawListingItem {
    pub name: String,
    pub raw_vote_text: String,
    pub detail_url: String,
}

/// The row persisted to every sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedRecord {
    pub project_name: String,
    pub main_page_votes: u64,
    // serialized as null when the detail page could not be read
    pub project_page_votes: Option<u64>,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct ScreenshotArtifact {
    pub local_path: PathBuf,
    pub captured_at: DateTime<Tz>,
}

impl ScreenshotArtifact {
    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    MissingDetailUrl,
    EmptyVoteText,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::MissingDetailUrl => write!(f, "missing detail url"),
            DropReason::EmptyVoteText => write!(f, "vote element has no text"),
        }
    }
}

/// Result of harvesting a single container on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingOutcome {
    Harvested(RawListingItem),
    Dropped { index: usize, reason: DropReason },
}

/// Final state of one item once it went through the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Complete(ScrapedRecord),
    Degraded { record: ScrapedRecord, reason: String },
    Dropped { index: usize, reason: DropReason },
}

impl ItemOutcome {
    pub fn record(&self) -> Option<&ScrapedRecord> {
        match self {
            ItemOutcome::Complete(r) => Some(r),
            ItemOutcome::Degraded { record, .. } => Some(record),
            ItemOutcome::Dropped { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum SinkOutcome {
    Written,
    Skipped(String),
    PartiallyRejected(Vec<RejectedRow>),
    Failed(String),
}

/// A row the analytics table refused, with the reasons it gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub index: usize,
    pub messages: Vec<String>,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<ItemOutcome>,
    pub screenshot: Option<ScreenshotArtifact>,
    pub sinks: Vec<(String, SinkOutcome)>,
}

impl RunReport {
    pub fn records(&self) -> Vec<ScrapedRecord> {
        self.outcomes
            .iter()
            .filter_map(|o| o.record().cloned())
            .collect()
    }

    pub fn dropped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Dropped { .. }))
            .count()
    }

    pub fn degraded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Degraded { .. }))
            .count()
    }

    /// Writes the aggregated run summary through the logger.
    pub fn log_summary(&self) {
        let records = self.records();
        info!(
            "run finished: {} records ({} degraded), {} items dropped",
            records.len(),
            self.degraded(),
            self.dropped()
        );
        for outcome in &self.outcomes {
            match outcome {
                ItemOutcome::Complete(_) => {}
                ItemOutcome::Degraded { record, reason } => {
                    warn!(
                        "project page votes unknown for {}: {}",
                        record.project_name, reason
                    )
                }
                ItemOutcome::Dropped { index, reason } => {
                    warn!("listing item {} dropped: {}", index, reason)
                }
            }
        }
        match &self.screenshot {
            Some(s) => debug!("screenshot kept at {:?}", s.local_path),
            None => debug!("no screenshot for this run"),
        }
        for (name, outcome) in &self.sinks {
            match outcome {
                SinkOutcome::Written => info!("sink {}: written", name),
                SinkOutcome::Skipped(why) => info!("sink {}: skipped, {}", name, why),
                SinkOutcome::PartiallyRejected(rows) => {
                    error!("sink {}: {} rows rejected", name, rows.len());
                    for row in rows {
                        error!("  row {}: {}", row.index, row.messages.join("; "));
                    }
                }
                SinkOutcome::Failed(e) => error!("sink {}: failed, {}", name, e),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(name: &str, votes: Option<u64>) -> ScrapedRecord {
        ScrapedRecord {
            project_name: name.into(),
            main_page_votes: 1,
            project_page_votes: votes,
            timestamp: "2025-01-01T00:00:00.000000+00:00".into(),
        }
    }

    #[test]
    fn unknown_votes_serialize_as_null() {
        let v = serde_json::to_value(record("a", None)).unwrap();
        assert!(v["project_page_votes"].is_null());

        let v = serde_json::to_value(record("a", Some(0))).unwrap();
        assert_eq!(v["project_page_votes"], 0);
    }

    #[test]
    fn report_counts() {
        let report = RunReport {
            outcomes: vec![
                ItemOutcome::Complete(record("a", Some(1))),
                ItemOutcome::Dropped {
                    index: 1,
                    reason: DropReason::MissingDetailUrl,
                },
                ItemOutcome::Degraded {
                    record: record("c", None),
                    reason: "timeout".into(),
                },
            ],
            screenshot: None,
            sinks: vec![],
        };
        assert_eq!(report.records().len(), 2);
        assert_eq!(report.dropped(), 1);
        assert_eq!(report.degraded(), 1);
    }
}
