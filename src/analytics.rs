use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

use crate::{
    gcp::{access_token, default_project, project_id, METADATA_URL},
    sink::RecordSink,
    types::{RejectedRow, ScrapedRecord, ScraperError, SinkOutcome},
};

/// Fully qualified analytics table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Accepts `project.dataset.table`, or `dataset.table` with `default_project`.
    pub fn parse(id: &str, default_project: Option<&str>) -> Result<Self, ScraperError> {
        let parts = id.split('.').collect::<Vec<&str>>();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ScraperError::InvalidTableId(id.into()));
        }
        match parts.as_slice() {
            [project, dataset, table] => Ok(TableRef {
                project: project.to_string(),
                dataset: dataset.to_string(),
                table: table.to_string(),
            }),
            [dataset, table] => match default_project {
                Some(project) => Ok(TableRef {
                    project: project.into(),
                    dataset: dataset.to_string(),
                    table: table.to_string(),
                }),
                None => Err(ScraperError::MissingProject),
            },
            _ => Err(ScraperError::InvalidTableId(id.into())),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertError>,
}

#[derive(Deserialize, Debug)]
struct InsertError {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize, Debug)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    message: String,
}

impl InsertAllResponse {
    pub fn rejected_rows(&self) -> Vec<RejectedRow> {
        self.insert_errors
            .iter()
            .map(|e| RejectedRow {
                index: e.index,
                messages: e
                    .errors
                    .iter()
                    .map(|p| {
                        if p.location.is_empty() {
                            format!("{}: {}", p.reason, p.message)
                        } else {
                            format!("{} at {}: {}", p.reason, p.location, p.message)
                        }
                    })
                    .collect(),
            })
            .collect()
    }
}

pub fn insert_all_body(records: &[ScrapedRecord]) -> Value {
    json!({
        "kind": "bigquery#tableDataInsertAllRequest",
        "rows": records.iter().map(|r| json!({ "json": r })).collect::<Vec<Value>>(),
    })
}

#[derive(Builder, Debug)]
#[builder(setter(into))]
pub struct AnalyticsOptions {
    table: String,
    #[builder(default = "self.default_url()")]
    url: Url,
    #[builder(default = "self.default_client()")]
    client: Client,
    // asked for the project and token when the environment has none
    #[builder(default = "METADATA_URL.into()")]
    metadata_url: String,
}

impl AnalyticsOptions {
    pub fn default_builder() -> AnalyticsOptionsBuilder {
        AnalyticsOptionsBuilder::default()
    }
}

impl AnalyticsOptionsBuilder {
    fn default_url(&self) -> Url {
        Url::from_str("https://bigquery.googleapis.com/bigquery/v2/").unwrap()
    }
    fn default_client(&self) -> Client {
        Client::new()
    }
}

/// Streams records into a table with a single `insertAll` call.
///
/// The table id is only resolved when records are written, so a missing
/// project fails the sink and not the run.
pub struct AnalyticsSink {
    client: Client,
    url: Url,
    table_id: String,
    metadata_url: String,
}

impl AnalyticsSink {
    pub fn new(o: AnalyticsOptions) -> Self {
        AnalyticsSink {
            client: o.client,
            url: o.url,
            table_id: o.table,
            metadata_url: o.metadata_url,
        }
    }

    /// Full table reference, the project coming from the id, the environment or the metadata server.
    pub async fn resolve_table(&self) -> anyhow::Result<TableRef> {
        match TableRef::parse(&self.table_id, default_project().as_deref()) {
            Err(ScraperError::MissingProject) => {
                let project = project_id(&self.client, &self.metadata_url)
                    .await
                    .context(ScraperError::MissingProject)?;
                Ok(TableRef::parse(&self.table_id, Some(&project))?)
            }
            r => Ok(r?),
        }
    }

    pub fn insert_url(&self, table: &TableRef) -> String {
        format!(
            "{}projects/{}/datasets/{}/tables/{}/insertAll",
            self.url, table.project, table.dataset, table.table
        )
    }

    pub async fn insert(
        &self,
        table: &TableRef,
        records: &[ScrapedRecord],
    ) -> anyhow::Result<Vec<RejectedRow>> {
        let token = access_token(&self.client, &self.metadata_url).await?;
        let res = self
            .client
            .post(self.insert_url(table))
            .bearer_auth(token)
            .json(&insert_all_body(records))
            .send()
            .await
            .context(format!("could not reach analytics table {}", table))?;

        if res.status() == StatusCode::OK {
            Ok(res.json::<InsertAllResponse>().await?.rejected_rows())
        } else {
            Err(anyhow!(res.text().await?))
        }
    }
}

#[async_trait]
impl RecordSink for AnalyticsSink {
    fn name(&self) -> &str {
        "analytics"
    }

    async fn write(&self, records: &[ScrapedRecord]) -> anyhow::Result<SinkOutcome> {
        if records.is_empty() {
            return Ok(SinkOutcome::Skipped("no records to insert".into()));
        }
        let table = match self.resolve_table().await {
            Ok(t) => t,
            Err(e) => {
                error!("could not resolve analytics table {}: {:#}", self.table_id, e);
                return Ok(SinkOutcome::Failed(format!("{:#}", e)));
            }
        };

        info!("inserting {} rows into {}", records.len(), table);
        let rejected = self.insert(&table, records).await?;
        if rejected.is_empty() {
            info!("successfully inserted {} rows into {}", records.len(), table);
            Ok(SinkOutcome::Written)
        } else {
            Ok(SinkOutcome::PartiallyRejected(rejected))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_table_ids() {
        assert_eq!(
            TableRef::parse("p.d.t", None).unwrap(),
            TableRef {
                project: "p".into(),
                dataset: "d".into(),
                table: "t".into()
            }
        );
        assert_eq!(
            TableRef::parse("sprawdzamy.votes", Some("proj")).unwrap().to_string(),
            "proj.sprawdzamy.votes"
        );
        assert!(matches!(
            TableRef::parse("sprawdzamy.votes", None),
            Err(ScraperError::MissingProject)
        ));
        assert!(TableRef::parse("votes", Some("p")).is_err());
        assert!(TableRef::parse("a..b", Some("p")).is_err());
        assert!(TableRef::parse("a.b.c.d", None).is_err());
    }

    #[test]
    fn builds_insert_url() -> anyhow::Result<()> {
        let sink = AnalyticsSink::new(AnalyticsOptions::default_builder().table("p.d.t").build()?);
        let table = tokio_test::block_on(sink.resolve_table())?;
        assert_eq!(
            sink.insert_url(&table),
            "https://bigquery.googleapis.com/bigquery/v2/projects/p/datasets/d/tables/t/insertAll"
        );
        Ok(())
    }

    #[test]
    fn wraps_each_record_as_a_row() {
        let records = vec![ScrapedRecord {
            project_name: "Alpha".into(),
            main_page_votes: 42,
            project_page_votes: Some(42),
            timestamp: "t".into(),
        }];
        let body = insert_all_body(&records);
        assert_eq!(body["rows"].as_array().unwrap().len(), 1);
        assert_eq!(body["rows"][0]["json"]["project_name"], "Alpha");
        assert_eq!(body["rows"][0]["json"]["project_page_votes"], 42);
    }

    #[test]
    fn reports_rejected_rows() {
        let res: InsertAllResponse = serde_json::from_str(
            r#"{"kind":"bigquery#tableDataInsertAllResponse","insertErrors":[
                {"index":1,"errors":[{"reason":"invalid","location":"main_page_votes","message":"bad int"}]},
                {"index":3,"errors":[{"reason":"stopped","message":""}]}]}"#,
        )
        .unwrap();
        let rows = res.rejected_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].messages, vec!["invalid at main_page_votes: bad int"]);
        assert_eq!(rows[1].messages, vec!["stopped: "]);

        let ok: InsertAllResponse =
            serde_json::from_str(r#"{"kind":"bigquery#tableDataInsertAllResponse"}"#).unwrap();
        assert!(ok.rejected_rows().is_empty());
    }

    #[test]
    fn empty_runs_are_not_sent() -> anyhow::Result<()> {
        let sink = AnalyticsSink::new(AnalyticsOptions::default_builder().table("p.d.t").build()?);
        let outcome = tokio_test::block_on(sink.write(&[]))?;
        assert!(matches!(outcome, SinkOutcome::Skipped(_)));
        Ok(())
    }

    #[test]
    fn unresolvable_project_fails_the_sink_only() -> anyhow::Result<()> {
        std::env::remove_var(crate::gcp::PROJECT_ENV);
        let sink = AnalyticsSink::new(
            AnalyticsOptions::default_builder()
                .table("sprawdzamy.votes")
                .metadata_url("http://127.0.0.1:9/")
                .build()?,
        );
        let records = vec![ScrapedRecord {
            project_name: "Alpha".into(),
            main_page_votes: 1,
            project_page_votes: None,
            timestamp: "t".into(),
        }];
        match tokio_test::block_on(sink.write(&records))? {
            SinkOutcome::Failed(e) => assert!(e.contains("missing_project")),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }
}
