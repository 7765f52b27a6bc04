use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use rand::Rng;
use std::{str::FromStr, time::Duration};

pub const DEFAULT_TARGET_URL: &str = "https://sprawdzamy.com/zgloszone-pomysly/";
pub const DEFAULT_SCREENSHOT_DIR: &str = "/tmp/screenshots";
pub const DEFAULT_SCRAPE_INTERVAL_MINUTES: u32 = 15;
pub const SCREENSHOT_TIMEZONE: Tz = chrono_tz::Europe::Warsaw;
pub const SCREENSHOT_FORMAT_STRING: &str = "%Y%m%d_%H%M%S_%Z%z";
pub const PNG_CONTENT_TYPE: &str = "image/png";

lazy_static! {
    pub static ref BUCKET_NAME: String = match std::env::var("BUCKET") {
        Ok(b) => b,
        Err(_) => "your-bucket".into(),
    };
    pub static ref ANALYTICS_TABLE: String = match std::env::var("BIGQUERY_TABLE") {
        Ok(t) => t,
        Err(_) => "sprawdzamy.votes".into(),
    };
}

/// First whitespace-delimited token, `None` for blank text.
pub fn first_token(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

/// `scheme://host` of a url, taken as its first three `/`-separated segments.
pub fn site_root(url: &str) -> String {
    url.split('/').take(3).collect::<Vec<&str>>().join("/")
}

pub fn is_absolute(href: &str) -> bool {
    href.starts_with("http://") || href.starts_with("https://")
}

/// Resolves a listing href against the site root of `target_url`.
pub fn absolutize(target_url: &str, href: &str) -> String {
    if is_absolute(href) {
        return href.into();
    }
    let root = site_root(target_url);
    if href.starts_with('/') {
        format!("{}{}", root, href)
    } else {
        format!("{}/{}", root, href)
    }
}

/// Uniformly random duration in `[min, max]`; `min` when the window is inverted.
pub fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let ms = rng.gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(ms as u64)
}

pub fn warsaw_now() -> DateTime<Tz> {
    Utc::now().with_timezone(&SCREENSHOT_TIMEZONE)
}

pub fn screenshot_file_name(captured_at: &DateTime<Tz>) -> String {
    format!(
        "main_page_{}.png",
        captured_at.format(SCREENSHOT_FORMAT_STRING)
    )
}

/// Cron schedule firing every `interval_minutes`, aligned on the clock.
pub fn watch_schedule(interval_minutes: u32) -> anyhow::Result<Schedule> {
    let expr = match interval_minutes {
        0 => return Err(anyhow!("interval must be positive")),
        m if m < 60 => format!("0 0/{} * * * *", m),
        m if m % 60 == 0 && m < 24 * 60 => format!("0 0 0/{} * * *", m / 60),
        m => {
            return Err(anyhow!(
                "interval of {} minutes is neither below an hour nor a whole number of hours",
                m
            ))
        }
    };
    Schedule::from_str(&expr).map_err(|e| anyhow!("invalid schedule {}: {}", expr, e))
}
