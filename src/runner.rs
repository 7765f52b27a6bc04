use std::fs;

use anyhow::Context;
use tokio::time::sleep;

use crate::{
    analytics::{AnalyticsOptions, AnalyticsSink},
    browser_controller::{launch, BackendPolicy, PageFetcher},
    config::{CompiledSelectors, ScraperOptions},
    detail::{harvest_details, DetailVisit},
    listing::harvest_listing,
    normalizer::Normalizer,
    sink::{RecordSink, StdoutSink},
    types::{ItemOutcome, ListingOutcome, RawListingItem, RunReport, ScreenshotArtifact, SinkOutcome},
    uploader::Uploader,
    utils::{screenshot_file_name, warsaw_now},
};

/// One scrape: listing page, detail pages, normalization, sinks.
pub struct Runner {
    options: ScraperOptions,
    selectors: CompiledSelectors,
    fetcher: Box<dyn PageFetcher>,
    sinks: Vec<Box<dyn RecordSink>>,
    uploader: Option<Uploader>,
}

impl Runner {
    /// Launches the backend picked by the configured policy.
    pub fn new(options: ScraperOptions) -> anyhow::Result<Self> {
        let backend = options.backend.choose();
        let fetcher = launch(backend, &options).context(format!("could not launch {}", backend))?;
        Self::with_fetcher(options, fetcher)
    }

    pub fn with_fetcher(options: ScraperOptions, fetcher: Box<dyn PageFetcher>) -> anyhow::Result<Self> {
        let selectors = options.selectors.compile()?;

        let mut sinks: Vec<Box<dyn RecordSink>> = vec![];
        if options.sinks.stdout {
            sinks.push(Box::new(StdoutSink));
        }
        if let Some(table) = &options.sinks.analytics_table {
            let o = AnalyticsOptions::default_builder().table(table.clone()).build()?;
            sinks.push(Box::new(AnalyticsSink::new(o)));
        }

        let uploader = match &options.sinks.bucket {
            Some(bucket) => Some(Uploader::new(bucket)?),
            None => None,
        };

        Ok(Runner {
            options,
            selectors,
            fetcher,
            sinks,
            uploader,
        })
    }

    /// Replaces the record sinks built from the options.
    pub fn with_sinks(mut self, sinks: Vec<Box<dyn RecordSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub async fn run(&mut self) -> anyhow::Result<RunReport> {
        let (outcomes, screenshot) = self.scrape().await?;
        let mut sinks = vec![];

        if let (Some(uploader), Some(screenshot)) = (&self.uploader, &screenshot) {
            let outcome = match screenshot {
                Ok(artifact) => match uploader.upload_screenshot(artifact).await {
                    Ok(url) => {
                        info!("screenshot uploaded to {}", url);
                        SinkOutcome::Written
                    }
                    Err(e) => SinkOutcome::Failed(format!("{:#}", e)),
                },
                Err(e) => SinkOutcome::Failed(format!("{:#}", e)),
            };
            sinks.push(("screenshot".to_string(), outcome));
        }

        let records = outcomes
            .iter()
            .filter_map(|o| o.record().cloned())
            .collect::<Vec<_>>();
        for sink in &self.sinks {
            let outcome = match sink.write(&records).await {
                Ok(o) => o,
                Err(e) => SinkOutcome::Failed(format!("{:#}", e)),
            };
            sinks.push((sink.name().to_string(), outcome));
        }

        Ok(RunReport {
            outcomes,
            screenshot: screenshot.and_then(Result::ok),
            sinks,
        })
    }

    /// Harvests the listing and every detail page, without touching the sinks.
    ///
    /// Only a failure to load the listing page itself is returned as an error.
    /// The screenshot is `None` when no bucket is configured.
    pub async fn scrape(
        &mut self,
    ) -> anyhow::Result<(Vec<ItemOutcome>, Option<anyhow::Result<ScreenshotArtifact>>)> {
        let target = self.options.target_url.clone();
        info!("scraping {} with {}", target, self.fetcher.backend());

        let html = self
            .fetcher
            .fetch(&target)
            .await
            .context(format!("could not load listing page {}", target))?;

        // taken before any detail navigation replaces the listing page
        let screenshot = if self.uploader.is_some() {
            Some(self.capture_screenshot().await)
        } else {
            None
        };
        if let Some(Err(e)) = &screenshot {
            error!("error taking or saving screenshot: {:#}", e);
        }

        let listing = harvest_listing(&html, &target, &self.selectors);
        let items = listing
            .iter()
            .filter_map(|o| match o {
                ListingOutcome::Harvested(item) => Some(item.clone()),
                ListingOutcome::Dropped { .. } => None,
            })
            .collect::<Vec<RawListingItem>>();

        let visits = harvest_details(
            self.fetcher.as_mut(),
            items,
            &self.selectors.detail_vote,
            self.options.min_delay,
            self.options.max_delay,
            sleep,
        )
        .await;

        Ok((assemble(listing, visits), screenshot))
    }

    async fn capture_screenshot(&mut self) -> anyhow::Result<ScreenshotArtifact> {
        let dir = &self.options.screenshot_dir;
        fs::create_dir_all(dir).context(format!("could not create screenshot dir {:?}", dir))?;

        let captured_at = warsaw_now();
        let local_path = dir.join(screenshot_file_name(&captured_at));
        self.fetcher.screenshot(&local_path).await?;
        info!("screenshot saved locally to {:?}", local_path);

        Ok(ScreenshotArtifact {
            local_path,
            captured_at,
        })
    }
}

/// Normalizes the visits, keeping dropped listing items at their listing position.
fn assemble(listing: Vec<ListingOutcome>, visits: Vec<DetailVisit>) -> Vec<ItemOutcome> {
    let mut normalizer = Normalizer::new();
    let mut visits = visits.into_iter();

    listing
        .into_iter()
        .filter_map(|o| match o {
            ListingOutcome::Dropped { index, reason } => Some(ItemOutcome::Dropped { index, reason }),
            ListingOutcome::Harvested(_) => {
                let visit = visits.next()?;
                let record = normalizer.normalize(&visit.item, visit.vote_text.as_deref());
                if record.project_page_votes.is_some() {
                    return Some(ItemOutcome::Complete(record));
                }
                let reason = match (visit.failure, visit.vote_text) {
                    (Some(failure), _) => failure,
                    (None, Some(text)) => format!("vote text {:?} is not a number", text),
                    (None, None) => "no vote text".to_string(),
                };
                Some(ItemOutcome::Degraded { record, reason })
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::DropReason;

    fn item(name: &str, votes: &str) -> RawListingItem {
        RawListingItem {
            name: name.into(),
            raw_vote_text: votes.into(),
            detail_url: format!("https://x.com/{}", name),
        }
    }

    #[test]
    fn assemble_keeps_dropped_items_in_place() {
        let listing = vec![
            ListingOutcome::Harvested(item("a", "1")),
            ListingOutcome::Dropped {
                index: 1,
                reason: DropReason::MissingDetailUrl,
            },
            ListingOutcome::Harvested(item("c", "x")),
        ];
        let visits = vec![
            DetailVisit {
                item: item("a", "1"),
                vote_text: Some("2".into()),
                failure: None,
            },
            DetailVisit {
                item: item("c", "x"),
                vote_text: Some("n/a".into()),
                failure: None,
            },
        ];
        let out = assemble(listing, visits);
        assert_eq!(out.len(), 3);
        match &out[0] {
            ItemOutcome::Complete(r) => {
                assert_eq!(r.main_page_votes, 1);
                assert_eq!(r.project_page_votes, Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(out[1], ItemOutcome::Dropped { index: 1, .. }));
        match &out[2] {
            ItemOutcome::Degraded { record, reason } => {
                assert_eq!(record.main_page_votes, 0);
                assert_eq!(record.project_page_votes, None);
                assert!(reason.contains("n/a"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
