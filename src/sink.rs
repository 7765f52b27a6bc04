use async_trait::async_trait;

use crate::types::{ScrapedRecord, SinkOutcome};

pub const EMPTY_RUN_STATUS: &str = "No project votes scraped.";

/// Destination the records of a run are written to, once.
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, records: &[ScrapedRecord]) -> anyhow::Result<SinkOutcome>;
}

pub struct StdoutSink;

impl StdoutSink {
    pub fn render(records: &[ScrapedRecord]) -> anyhow::Result<String> {
        if records.is_empty() {
            return Ok(EMPTY_RUN_STATUS.into());
        }
        Ok(serde_json::to_string_pretty(records)?)
    }
}

#[async_trait]
impl RecordSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn write(&self, records: &[ScrapedRecord]) -> anyhow::Result<SinkOutcome> {
        println!("{}", Self::render(records)?);
        Ok(SinkOutcome::Written)
    }
}
