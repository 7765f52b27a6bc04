use std::{path::PathBuf, time::Duration};

use scraper::Selector;

use crate::{
    browser_controller::{BackendSelection, BrowserBackend},
    types::ScraperError,
    utils::{DEFAULT_SCRAPE_INTERVAL_MINUTES, DEFAULT_SCREENSHOT_DIR, DEFAULT_TARGET_URL},
};

pub const ITEM_SELECTOR: &str = ".ideas article.idea";
pub const NAME_SELECTOR: &str = "h2 a";
pub const VOTE_SELECTOR: &str = "strong";
pub const DETAIL_VOTE_SELECTOR: &str = "aside.digger strong";
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(3);

/// CSS selectors describing the listing and detail page layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSelectors {
    /// one container per project on the listing page
    pub item: String,
    /// link inside a container, gives both the name and the detail url
    pub name: String,
    /// vote count inside a container
    pub vote: String,
    /// vote count on the detail page, first match wins
    pub detail_vote: String,
}

impl Default for VoteSelectors {
    fn default() -> Self {
        VoteSelectors {
            item: ITEM_SELECTOR.into(),
            name: NAME_SELECTOR.into(),
            vote: VOTE_SELECTOR.into(),
            detail_vote: DETAIL_VOTE_SELECTOR.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledSelectors {
    pub item: Selector,
    pub name: Selector,
    pub vote: Selector,
    pub detail_vote: Selector,
}

impl VoteSelectors {
    pub fn compile(&self) -> Result<CompiledSelectors, ScraperError> {
        Ok(CompiledSelectors {
            item: parse_selector(&self.item)?,
            name: parse_selector(&self.name)?,
            vote: parse_selector(&self.vote)?,
            detail_vote: parse_selector(&self.detail_vote)?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector, ScraperError> {
    Selector::parse(s).map_err(|e| ScraperError::InvalidSelector(format!("{} ({:?})", s, e)))
}

/// Where the records (and the screenshot) of a run end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTargets {
    pub stdout: bool,
    /// `project.dataset.table` or `dataset.table`
    pub analytics_table: Option<String>,
    /// bucket receiving the listing page screenshot; no screenshot when unset
    pub bucket: Option<String>,
}

impl Default for SinkTargets {
    fn default() -> Self {
        SinkTargets {
            stdout: true,
            analytics_table: None,
            bucket: None,
        }
    }
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScraperOptions {
    // listing page holding every project
    #[builder(default = "self.default_target_url()")]
    pub target_url: String,
    // run chrome without a window
    #[builder(default = "true")]
    pub headless: bool,
    #[builder(default)]
    pub selectors: VoteSelectors,
    // lower bound of the pause between two detail pages
    #[builder(default = "DEFAULT_MIN_DELAY")]
    pub min_delay: Duration,
    // upper bound of the pause between two detail pages
    #[builder(default = "DEFAULT_MAX_DELAY")]
    pub max_delay: Duration,
    // fixed pause after every navigation, lets late scripts settle
    #[builder(default = "Duration::ZERO")]
    pub settle_after_navigation: Duration,
    // browser idle timeout
    #[builder(default = "Duration::from_secs(45)")]
    pub browser_timeout: Duration,
    #[builder(default = "self.default_backend()")]
    pub backend: BackendSelection,
    #[builder(default)]
    pub sinks: SinkTargets,
    // local directory where the listing page screenshot is written
    #[builder(default = "self.default_screenshot_dir()")]
    pub screenshot_dir: PathBuf,
    // only read by the --watch loop
    #[builder(default = "DEFAULT_SCRAPE_INTERVAL_MINUTES")]
    pub scrape_interval_minutes: u32,
}

impl ScraperOptions {
    pub fn default_builder() -> ScraperOptionsBuilder {
        ScraperOptionsBuilder::default()
    }
}

impl ScraperOptionsBuilder {
    fn default_target_url(&self) -> String {
        DEFAULT_TARGET_URL.into()
    }
    fn default_backend(&self) -> BackendSelection {
        BackendSelection::Random(vec![BrowserBackend::Chrome])
    }
    fn default_screenshot_dir(&self) -> PathBuf {
        PathBuf::from(DEFAULT_SCREENSHOT_DIR)
    }

    fn validate(&self) -> Result<(), String> {
        let min = self.min_delay.unwrap_or(DEFAULT_MIN_DELAY);
        let max = self.max_delay.unwrap_or(DEFAULT_MAX_DELAY);
        if min > max {
            return Err(format!("min_delay {:?} exceeds max_delay {:?}", min, max));
        }
        if let Some(0) = self.scrape_interval_minutes {
            return Err("scrape_interval_minutes must be positive".into());
        }
        if let Some(url) = &self.target_url {
            if !crate::utils::is_absolute(url) {
                return Err(format!("target_url must be an http(s) url, got {}", url));
            }
        }
        if let Some(BackendSelection::Random(choices)) = &self.backend {
            if choices.is_empty() {
                return Err("backend choice list is empty".into());
            }
        }
        Ok(())
    }
}
