use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};

use crate::{
    types::{RawListingItem, ScrapedRecord},
    utils::first_token,
};

/// Digits-only first token as an integer, anything else is `None`.
pub fn parse_votes(raw: &str) -> Option<u64> {
    let token = first_token(raw)?;
    if !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

pub fn parse_main_votes(raw: &str) -> u64 {
    parse_votes(raw).unwrap_or(0)
}

pub fn parse_detail_votes(raw: Option<&str>) -> Option<u64> {
    raw.and_then(parse_votes)
}

/// Hands out strictly increasing UTC instants at microsecond precision.
#[derive(Debug, Default)]
pub struct Stamper {
    last: Option<DateTime<Utc>>,
}

impl Stamper {
    pub fn new() -> Self {
        Stamper { last: None }
    }

    pub fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = now.duration_trunc(Duration::microseconds(1)).unwrap_or(now);
        let stamp = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Turns harvested text into records, stamping each at normalization time.
#[derive(Debug, Default)]
pub struct Normalizer {
    stamper: Stamper,
}

impl Normalizer {
    pub fn new() -> Self {
        Normalizer {
            stamper: Stamper::new(),
        }
    }

    pub fn normalize(&mut self, item: &RawListingItem, detail_vote_text: Option<&str>) -> ScrapedRecord {
        let ts = self.stamper.stamp();
        normalize_at(item, detail_vote_text, &ts)
    }
}

pub fn normalize_at(
    item: &RawListingItem,
    detail_vote_text: Option<&str>,
    ts: &DateTime<Utc>,
) -> ScrapedRecord {
    ScrapedRecord {
        project_name: item.name.clone(),
        main_page_votes: parse_main_votes(&item.raw_vote_text),
        project_page_votes: parse_detail_votes(detail_vote_text),
        timestamp: format_timestamp(ts),
    }
}
