//! Google News RSS fetcher.
//!
//! A read-only side feature: builds a localized feed URL for a topic, pulls
//! the RSS document and flattens the first few items for display. It never
//! touches the chat transcript.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::constants;
use crate::error::NewsError;
use crate::render::truncate_chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topic {
    #[default]
    TopStories,
    World,
    Nation,
    Business,
    Technology,
    Science,
    Health,
    Entertainment,
    Sports,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::TopStories,
        Topic::World,
        Topic::Nation,
        Topic::Business,
        Topic::Technology,
        Topic::Science,
        Topic::Health,
        Topic::Entertainment,
        Topic::Sports,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Topic::TopStories => "Top stories",
            Topic::World => "World",
            Topic::Nation => "U.S.",
            Topic::Business => "Business",
            Topic::Technology => "Technology",
            Topic::Science => "Science",
            Topic::Health => "Health",
            Topic::Entertainment => "Entertainment",
            Topic::Sports => "Sports",
        }
    }

    /// Google News `topic=` value. Top stories has none.
    pub fn feed_param(self) -> Option<&'static str> {
        match self {
            Topic::TopStories => None,
            Topic::World => Some("WORLD"),
            Topic::Nation => Some("NATION"),
            Topic::Business => Some("BUSINESS"),
            Topic::Technology => Some("TECHNOLOGY"),
            Topic::Science => Some("SCIENCE"),
            Topic::Health => Some("HEALTH"),
            Topic::Entertainment => Some("ENTERTAINMENT"),
            Topic::Sports => Some("SPORTS"),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Topic {
    type Err = NewsError;

    /// Accepts the display label, the feed parameter, or a short alias.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        match wanted.to_ascii_lowercase().as_str() {
            "" | "top" => return Ok(Topic::TopStories),
            "us" => return Ok(Topic::Nation),
            _ => {}
        }
        Topic::ALL
            .into_iter()
            .find(|t| {
                t.label().eq_ignore_ascii_case(wanted)
                    || t.feed_param().is_some_and(|p| p.eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| NewsError::InvalidQuery(format!("unknown topic '{}'", wanted)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsQuery {
    pub topic: Topic,
    pub country: String,
    pub language: String,
    pub limit: usize,
    pub display_tz: Tz,
}

impl NewsQuery {
    pub fn new(
        topic: Topic,
        country: &str,
        language: &str,
        limit: usize,
        display_tz: &str,
    ) -> Result<Self, NewsError> {
        let country = country.trim().to_ascii_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(NewsError::InvalidQuery(format!(
                "country must be a two-letter code, got '{}'",
                country
            )));
        }
        let language = language.trim().to_ascii_lowercase();
        if !(2..=3).contains(&language.len()) || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(NewsError::InvalidQuery(format!(
                "language must be a two or three letter code, got '{}'",
                language
            )));
        }
        let display_tz = display_tz
            .trim()
            .parse::<Tz>()
            .map_err(|e| NewsError::InvalidQuery(format!("unknown timezone '{}': {}", display_tz, e)))?;

        Ok(Self {
            topic,
            country,
            language,
            limit,
            display_tz,
        })
    }
}

impl Default for NewsQuery {
    fn default() -> Self {
        Self {
            topic: Topic::TopStories,
            country: "US".to_string(),
            language: "en".to_string(),
            limit: constants::NEWS_DEFAULT_LIMIT,
            display_tz: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsItem {
    pub title: String,
    pub summary: String,
    pub link: String,
    pub source: String,
    pub time: String,
}

// RSS 2.0, only the fields we display.
#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    source: Option<RssSource>,
}

#[derive(Debug, Deserialize)]
struct RssSource {
    #[serde(rename = "$text", default)]
    name: String,
}

pub struct NewsClient {
    client: Client,
    base_url: String,
}

impl NewsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NewsError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn feed_url(&self, query: &NewsQuery) -> String {
        let NewsQuery { country, language, .. } = query;
        let url = format!(
            "{}/rss?hl={language}-{country}&gl={country}&ceid={country}:{language}",
            self.base_url
        );
        match query.topic.feed_param() {
            Some(topic) => format!("{}&topic={}", url, topic),
            None => url,
        }
    }

    #[instrument(skip(self), fields(topic = %query.topic))]
    pub async fn fetch(&self, query: &NewsQuery) -> Result<Vec<NewsItem>, NewsError> {
        let url = self.feed_url(query);
        debug!(%url, "Fetching news feed");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "News feed request failed");
            return Err(NewsError::HttpStatus(status));
        }
        let body = response.text().await?;
        parse_feed(&body, query)
    }
}

/// Flattens an RSS document into at most `query.limit` display items.
pub fn parse_feed(xml: &str, query: &NewsQuery) -> Result<Vec<NewsItem>, NewsError> {
    let rss: Rss = quick_xml::de::from_str(xml).map_err(|e| NewsError::Parse(e.to_string()))?;

    Ok(rss
        .channel
        .items
        .into_iter()
        .take(query.limit)
        .map(|item| {
            let summary = unescape_html(&strip_tags(&item.description));
            NewsItem {
                title: unescape_html(&item.title),
                summary: truncate_chars(summary.trim(), constants::NEWS_SUMMARY_MAX_CHARS).to_string(),
                link: item.link.trim().to_string(),
                source: item.source.map(|s| unescape_html(&s.name)).unwrap_or_default(),
                time: item
                    .pub_date
                    .as_deref()
                    .map(|d| format_pub_date(d, query.display_tz))
                    .unwrap_or_default(),
            }
        })
        .collect())
}

/// RFC 2822 `pubDate` shown in `tz`, or empty when it does not parse.
fn format_pub_date(raw: &str, tz: Tz) -> String {
    match DateTime::parse_from_rfc2822(raw.trim()) {
        Ok(dt) => dt.with_timezone(&tz).format("%b %d, %I:%M %p").to_string(),
        Err(e) => {
            debug!(%raw, error = %e, "Unparsable pubDate");
            String::new()
        }
    }
}

/// Resolves HTML entities (named and numeric). Malformed input is kept as is.
fn unescape_html(text: &str) -> String {
    unescape_with(text, resolve_html5_entity)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r##"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <generator>NFE/5.0</generator>
    <title>Top stories - Google News</title>
    <link>https://news.google.com/?hl=en-US&amp;gl=US&amp;ceid=US:en</link>
    <language>en-US</language>
    <item>
      <title>Rust 2.0 &amp;amp; friends - The Crab Times</title>
      <link>https://news.example.com/a</link>
      <pubDate>Wed, 15 Oct 2025 14:03:00 GMT</pubDate>
      <description>&lt;a href="https://news.example.com/a"&gt;Rust 2.0&lt;/a&gt;&amp;nbsp;&amp;nbsp;&lt;font color="#6f6f6f"&gt;The Crab Times&lt;/font&gt;</description>
      <source url="https://crab.example.com">The Crab Times</source>
    </item>
    <item>
      <title>Second</title>
      <link>https://news.example.com/b</link>
      <pubDate>not a date</pubDate>
      <description>plain</description>
    </item>
    <item>
      <title>Third</title>
      <link>https://news.example.com/c</link>
    </item>
  </channel>
</rss>"##;

    #[test]
    fn test_topic_parsing() {
        assert_eq!("World".parse::<Topic>().unwrap(), Topic::World);
        assert_eq!("technology".parse::<Topic>().unwrap(), Topic::Technology);
        assert_eq!("U.S.".parse::<Topic>().unwrap(), Topic::Nation);
        assert_eq!("us".parse::<Topic>().unwrap(), Topic::Nation);
        assert_eq!("NATION".parse::<Topic>().unwrap(), Topic::Nation);
        assert_eq!("Top stories".parse::<Topic>().unwrap(), Topic::TopStories);
        assert!("Weather".parse::<Topic>().is_err());
    }

    #[test]
    fn test_query_validation() {
        let query = NewsQuery::new(Topic::World, "in", "EN", 5, "Asia/Kolkata").unwrap();
        assert_eq!(query.country, "IN");
        assert_eq!(query.language, "en");

        assert!(NewsQuery::new(Topic::World, "USA", "en", 5, "UTC").is_err());
        assert!(NewsQuery::new(Topic::World, "US", "e1", 5, "UTC").is_err());
        assert!(NewsQuery::new(Topic::World, "US", "en", 5, "Mars/Olympus").is_err());
    }

    #[test]
    fn test_feed_url() {
        let client = NewsClient::new("https://news.google.com/", Duration::from_secs(5)).unwrap();
        let top = NewsQuery::default();
        assert_eq!(
            client.feed_url(&top),
            "https://news.google.com/rss?hl=en-US&gl=US&ceid=US:en"
        );

        let world = NewsQuery::new(Topic::World, "GB", "en", 3, "Europe/London").unwrap();
        assert_eq!(
            client.feed_url(&world),
            "https://news.google.com/rss?hl=en-GB&gl=GB&ceid=GB:en&topic=WORLD"
        );
    }

    #[test]
    fn test_parse_feed_flattens_items() {
        let query = NewsQuery::new(Topic::TopStories, "US", "en", 8, "US/Pacific").unwrap();
        let items = parse_feed(FEED, &query).unwrap();
        assert_eq!(items.len(), 3);

        let first = &items[0];
        assert_eq!(first.title, "Rust 2.0 & friends - The Crab Times");
        assert_eq!(first.link, "https://news.example.com/a");
        assert_eq!(first.source, "The Crab Times");
        assert!(first.summary.starts_with("Rust 2.0"));
        assert!(first.summary.contains("The Crab Times"));
        assert!(!first.summary.contains('<'));
        // 14:03 GMT is 07:03 PDT.
        assert_eq!(first.time, "Oct 15, 07:03 AM");

        assert_eq!(items[1].time, "");
        assert_eq!(items[1].source, "");
        assert_eq!(items[2].summary, "");
    }

    #[test]
    fn test_parse_feed_respects_limit() {
        let query = NewsQuery::new(Topic::TopStories, "US", "en", 1, "UTC").unwrap();
        let items = parse_feed(FEED, &query).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].time, "Oct 15, 02:03 PM");
    }

    #[test]
    fn test_summary_truncated_to_300_chars() {
        let long = "é".repeat(500);
        let xml = format!(
            "<rss><channel><item><title>t</title><description>{}</description></item></channel></rss>",
            long
        );
        let items = parse_feed(&xml, &NewsQuery::default()).unwrap();
        assert_eq!(items[0].summary.chars().count(), 300);
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        assert!(matches!(
            parse_feed("this is not xml <", &NewsQuery::default()),
            Err(NewsError::Parse(_))
        ));
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<b>bold</b> text"), "bold text");
        assert_eq!(strip_tags("a<br/>b"), "a b");
        assert_eq!(strip_tags("no tags"), "no tags");
    }
}
