use scraper::{Html, Selector};
use std::{future::Future, time::Duration};

use crate::{
    browser_controller::PageFetcher,
    listing::element_text,
    types::RawListingItem,
    utils::{first_token, random_delay},
};

/// A listing item paired with what its detail page said about the votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailVisit {
    pub item: RawListingItem,
    pub vote_text: Option<String>,
    // why no vote text could be read, if it could not
    pub failure: Option<String>,
}

/// First token of the first element matching `selector`.
pub fn extract_detail_vote(html: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(html);
    let element = document.select(selector).next()?;
    first_token(&element_text(&element)).map(String::from)
}

/// Visits every detail page in order through the shared fetcher.
///
/// A failed visit never drops the item, it only leaves its vote text empty.
/// Between two visits the harvester awaits `pause` with a random duration in
/// `[min_delay, max_delay]`, usually `tokio::time::sleep`.
pub async fn harvest_details<P, F>(
    fetcher: &mut dyn PageFetcher,
    items: Vec<RawListingItem>,
    selector: &Selector,
    min_delay: Duration,
    max_delay: Duration,
    mut pause: P,
) -> Vec<DetailVisit>
where
    P: FnMut(Duration) -> F,
    F: Future<Output = ()>,
{
    let total = items.len();
    info!("visiting {} project pages", total);

    let mut visits = Vec::with_capacity(total);
    for (idx, item) in items.into_iter().enumerate() {
        info!("processing project {}/{}: {}", idx + 1, total, item.name);

        let (vote_text, failure) = match fetcher.fetch(&item.detail_url).await {
            Ok(html) => match extract_detail_vote(&html, selector) {
                Some(text) => (Some(text), None),
                None => (None, Some("vote element not found".to_string())),
            },
            Err(e) => {
                warn!("error visiting project page {}: {:#}", item.detail_url, e);
                (None, Some(format!("{:#}", e)))
            }
        };
        visits.push(DetailVisit {
            item,
            vote_text,
            failure,
        });

        if idx + 1 < total {
            let delay = random_delay(min_delay, max_delay);
            debug!("sleeping for {:?}", delay);
            pause(delay).await;
        }
    }
    visits
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::browser_controller::BrowserBackend;
    use async_trait::async_trait;
    use std::path::Path;

    struct StaticFetcher;

    #[async_trait(?Send)]
    impl PageFetcher for StaticFetcher {
        fn backend(&self) -> BrowserBackend {
            BrowserBackend::Http
        }

        async fn fetch(&mut self, _url: &str) -> anyhow::Result<String> {
            Ok(r#"<aside class="digger"><strong>3</strong></aside>"#.into())
        }

        async fn screenshot(&mut self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn items(n: usize) -> Vec<RawListingItem> {
        (0..n)
            .map(|i| RawListingItem {
                name: format!("p{}", i),
                raw_vote_text: "1".into(),
                detail_url: format!("https://x.com/{}", i),
            })
            .collect()
    }

    fn pauses_for(n: usize, min: Duration, max: Duration) -> Vec<Duration> {
        let mut pauses = vec![];
        let visits = tokio_test::block_on(harvest_details(
            &mut StaticFetcher,
            items(n),
            &selector(),
            min,
            max,
            |d| {
                pauses.push(d);
                std::future::ready(())
            },
        ));
        assert_eq!(visits.len(), n);
        pauses
    }

    fn selector() -> Selector {
        Selector::parse("aside.digger strong").unwrap()
    }

    #[test]
    fn takes_first_match_first_token() {
        let html = r#"<main><strong>1</strong><aside class="digger"><strong> 42 Głosów</strong></aside>
            <aside class="digger"><strong>9</strong></aside></main>"#;
        assert_eq!(extract_detail_vote(html, &selector()), Some("42".into()));
    }

    #[test]
    fn missing_or_blank_element_is_none() {
        assert_eq!(extract_detail_vote("<p>nothing</p>", &selector()), None);
        assert_eq!(
            extract_detail_vote(r#"<aside class="digger"><strong> </strong></aside>"#, &selector()),
            None
        );
    }

    #[test]
    fn pauses_between_items_but_not_after_the_last() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(300);
        assert!(pauses_for(0, min, max).is_empty());
        assert!(pauses_for(1, min, max).is_empty());

        let pauses = pauses_for(4, min, max);
        assert_eq!(pauses.len(), 3);
        assert!(pauses.iter().all(|d| *d >= min && *d <= max));
    }
}
