use scraper::{ElementRef, Html};

use crate::{
    config::CompiledSelectors,
    types::{DropReason, ListingOutcome, RawListingItem},
    utils::{absolutize, first_token},
};

/// Harvests every project container of the listing page, in document order.
///
/// Containers that cannot be turned into an item are reported as dropped, they
/// never abort the harvest. Duplicates are kept.
pub fn harvest_listing(
    html: &str,
    target_url: &str,
    selectors: &CompiledSelectors,
) -> Vec<ListingOutcome> {
    let document = Html::parse_document(html);
    let containers = document.select(&selectors.item).collect::<Vec<ElementRef>>();
    info!("found {} project containers on the listing page", containers.len());

    containers
        .iter()
        .enumerate()
        .map(|(index, container)| {
            match harvest_item(container, target_url, selectors) {
                Ok(item) => {
                    debug!("harvested {} ({})", item.name, item.detail_url);
                    ListingOutcome::Harvested(item)
                }
                Err(reason) => {
                    warn!("skipping container {}: {}", index, reason);
                    ListingOutcome::Dropped { index, reason }
                }
            }
        })
        .collect()
}

fn harvest_item(
    container: &ElementRef,
    target_url: &str,
    selectors: &CompiledSelectors,
) -> Result<RawListingItem, DropReason> {
    let link = container
        .select(&selectors.name)
        .next()
        .ok_or(DropReason::MissingDetailUrl)?;
    let name = element_text(&link);
    let href = link
        .value()
        .attr("href")
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(DropReason::MissingDetailUrl)?;

    let raw_vote_text = match container.select(&selectors.vote).next() {
        Some(vote) => first_token(&element_text(&vote))
            .ok_or(DropReason::EmptyVoteText)?
            .to_string(),
        None => "0".into(),
    };

    Ok(RawListingItem {
        name,
        raw_vote_text,
        detail_url: absolutize(target_url, href),
    })
}

pub fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::VoteSelectors;

    const TARGET: &str = "https://example.com/path/x";

    fn harvest(body: &str) -> Vec<ListingOutcome> {
        let html = format!("<html><body><div class=\"ideas\">{}</div></body></html>", body);
        harvest_listing(&html, TARGET, &VoteSelectors::default().compile().unwrap())
    }

    fn article(name: &str, href: Option<&str>, votes: Option<&str>) -> String {
        let link = match href {
            Some(h) => format!("<h2><a href=\"{}\">{}</a></h2>", h, name),
            None => format!("<h2><a>{}</a></h2>", name),
        };
        let votes = votes
            .map(|v| format!("<p><strong>{}</strong></p>", v))
            .unwrap_or_default();
        format!("<article class=\"idea\">{}{}</article>", link, votes)
    }

    fn harvested(outcomes: &[ListingOutcome]) -> Vec<RawListingItem> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                ListingOutcome::Harvested(i) => Some(i.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_listing_yields_nothing() {
        assert!(harvest("").is_empty());
        assert!(harvest("<article class=\"other\"></article>").is_empty());
    }

    #[test]
    fn extracts_name_votes_and_absolute_url() {
        let out = harvest(&article("  Alpha ", Some("/idea/123"), Some(" 42 Głosów ")));
        assert_eq!(
            out,
            vec![ListingOutcome::Harvested(RawListingItem {
                name: "Alpha".into(),
                raw_vote_text: "42".into(),
                detail_url: "https://example.com/idea/123".into(),
            })]
        );
    }

    #[test]
    fn missing_vote_element_defaults_to_zero() {
        let items = harvested(&harvest(&article("A", Some("https://x.com/a"), None)));
        assert_eq!(items[0].raw_vote_text, "0");
    }

    #[test]
    fn missing_href_is_dropped_not_fatal() {
        let body = [
            article("A", None, Some("1")),
            article("B", Some(""), Some("2")),
            article("C", Some("/c"), Some("3")),
        ]
        .concat();
        let out = harvest(&body);
        assert_eq!(out.len(), 3);
        assert_eq!(
            out[0],
            ListingOutcome::Dropped {
                index: 0,
                reason: DropReason::MissingDetailUrl
            }
        );
        assert!(matches!(out[1], ListingOutcome::Dropped { index: 1, .. }));
        let items = harvested(&out);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "C");
    }

    #[test]
    fn blank_vote_text_drops_the_item() {
        let out = harvest(&article("A", Some("/a"), Some("   ")));
        assert_eq!(
            out,
            vec![ListingOutcome::Dropped {
                index: 0,
                reason: DropReason::EmptyVoteText
            }]
        );
    }

    #[test]
    fn keeps_document_order_and_duplicates() {
        let body = [
            article("B", Some("/b"), Some("2")),
            article("A", Some("/a"), Some("1")),
            article("B", Some("/b"), Some("2")),
        ]
        .concat();
        let names = harvested(&harvest(&body))
            .into_iter()
            .map(|i| i.name)
            .collect::<Vec<String>>();
        assert_eq!(names, vec!["B", "A", "B"]);
    }

    #[test]
    fn non_numeric_vote_token_is_passed_through_raw() {
        let items = harvested(&harvest(&article("A", Some("/a"), Some("brak głosów"))));
        assert_eq!(items[0].raw_vote_text, "brak");
    }
}
