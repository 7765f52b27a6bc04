use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::Tab;
use headless_chrome::{browser::default_executable, Browser, LaunchOptions};
use rand::seq::SliceRandom;
use reqwest::Client;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::{config::ScraperOptions, types::ScraperError};

/// The single page every navigation of a run goes through.
#[async_trait(?Send)]
pub trait PageFetcher {
    fn backend(&self) -> BrowserBackend;

    /// Navigates to `url`, waits for the load to finish and returns the document html.
    async fn fetch(&mut self, url: &str) -> Result<String>;

    /// Full page png of the current document.
    async fn screenshot(&mut self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum BrowserBackend {
    /// headless chrome, renders scripts and can take screenshots
    Chrome,
    /// plain GET requests, static html only
    Http,
}

impl std::fmt::Display for BrowserBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserBackend::Chrome => write!(f, "chrome"),
            BrowserBackend::Http => write!(f, "http"),
        }
    }
}

/// Picks the backend a run is performed with.
pub trait BackendPolicy {
    fn choose(&self) -> BrowserBackend;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelection {
    Fixed(BrowserBackend),
    /// uniform pick per run, varies the automation fingerprint
    Random(Vec<BrowserBackend>),
}

impl BackendSelection {
    /// Selection over the distinct `choices`, each one equally likely.
    pub fn from_choices(mut choices: Vec<BrowserBackend>) -> Result<Self> {
        choices.sort();
        choices.dedup();
        match choices.as_slice() {
            [] => Err(anyhow!("at least one backend is required")),
            [only] => Ok(BackendSelection::Fixed(*only)),
            _ => Ok(BackendSelection::Random(choices)),
        }
    }
}

impl BackendPolicy for BackendSelection {
    fn choose(&self) -> BrowserBackend {
        match self {
            BackendSelection::Fixed(b) => *b,
            BackendSelection::Random(choices) => {
                let mut rng = rand::thread_rng();
                *choices.choose(&mut rng).unwrap_or(&BrowserBackend::Chrome)
            }
        }
    }
}

pub fn launch(backend: BrowserBackend, options: &ScraperOptions) -> Result<Box<dyn PageFetcher>> {
    info!("launching browser backend {}", backend);
    let fetcher: Box<dyn PageFetcher> = match backend {
        BrowserBackend::Chrome => Box::new(ChromeFetcher::new(options)?),
        BrowserBackend::Http => Box::new(HttpFetcher::new(options)?),
    };
    debug!("browser backend {} launched", backend);
    Ok(fetcher)
}

pub struct ChromeFetcher {
    // kept alive for as long as the tab is used, the process dies with it
    _browser: Browser,
    tab: Arc<Tab>,
    settle: Duration,
}

impl ChromeFetcher {
    pub fn new(options: &ScraperOptions) -> Result<Self> {
        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let executable = default_executable().map_err(|e| anyhow!(e))?;
        let launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .path(Some(executable))
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(options.browser_timeout)
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .build()
            .map_err(|e| anyhow!("couldn't build chrome launch options: {}", e))?;
        let browser = Browser::new(launch_options).context("browser launching error")?;
        let tab = browser.new_tab().context("could not create new tab")?;

        Ok(ChromeFetcher {
            _browser: browser,
            tab,
            settle: options.settle_after_navigation,
        })
    }
}

#[async_trait(?Send)]
impl PageFetcher for ChromeFetcher {
    fn backend(&self) -> BrowserBackend {
        BrowserBackend::Chrome
    }

    async fn fetch(&mut self, url: &str) -> Result<String> {
        debug!("navigating to {}", url);
        self.tab
            .navigate_to(url)
            .context(format!("could not navigate to {}", url))?
            .wait_until_navigated()
            .context(format!("navigation to {} did not finish", url))?;

        if !self.settle.is_zero() {
            debug!("settling for {:?}", self.settle);
            sleep(self.settle).await;
        }

        self.tab
            .get_content()
            .context(format!("could not read content of {}", url))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let viewport = self
            .tab
            .wait_for_element("body")
            .context("page has no body to capture")?
            .get_box_model()
            .context("could not measure page")?
            .margin_viewport();

        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, Some(viewport), true)
            .context(format!("screenshot of {} could not be captured", self.tab.get_url()))?;

        debug!("saving screenshot to {:?}", path);
        fs::write(path, png).context(format!("could not save screenshot to {:?}", path))?;
        Ok(())
    }
}

pub struct HttpFetcher {
    client: Client,
    settle: Duration,
}

impl HttpFetcher {
    pub fn new(options: &ScraperOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.browser_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("could not build http client")?;
        Ok(HttpFetcher {
            client,
            settle: options.settle_after_navigation,
        })
    }
}

#[async_trait(?Send)]
impl PageFetcher for HttpFetcher {
    fn backend(&self) -> BrowserBackend {
        BrowserBackend::Http
    }

    async fn fetch(&mut self, url: &str) -> Result<String> {
        debug!("fetching {}", url);
        let res = self
            .client
            .get(url)
            .send()
            .await
            .context(format!("could not fetch {}", url))?
            .error_for_status()?;
        let body = res.text().await?;

        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }
        Ok(body)
    }

    async fn screenshot(&mut self, _path: &Path) -> Result<()> {
        Err(ScraperError::UnsupportedOperation("the http backend cannot take screenshots".into()).into())
    }
}
