use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;
use tracing::warn;

use crate::{Error, Result};

const RESULTS_HEADER: &str = r#"header[class="resultsHeader"]"#;
const NO_RESULTS: &str = r#"div[class="noResults"]"#;
const RESULT_ITEM: &str = "li[data-docid]";
const ITEM_TITLE: &str = "h2";
const ITEM_DATE: &str = r#"span[class="date"]"#;
const ITEM_SOURCE: &str = r#"span[class="source"]"#;

static RESULT_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d[\d.,]*)\+?\)").expect("result count pattern is valid"));

const DATE_FORMATS: &[&str] = &["%B %d, %Y", "%d %B %Y", "%b %d, %Y", "%d %b %Y", "%Y-%m-%d"];

/// One entry of a result listing, as the portal shows it before download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub id: String,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub raw_date: String,
    pub source: String,
}

/// One page of a result listing plus the total the listing header reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub total: usize,
    pub refs: Vec<ArticleRef>,
}

/// Parses a result listing page on the blocking pool.
pub async fn parse_listing(html: Arc<String>) -> Result<ListingPage> {
    spawn_blocking(move || parse_listing_sync(&html)).await?
}

fn parse_listing_sync(html: &str) -> Result<ListingPage> {
    let doc = Html::parse_document(html);

    let header_selector = create_selector(RESULTS_HEADER)?;
    let no_results_selector = create_selector(NO_RESULTS)?;
    let item_selector = create_selector(RESULT_ITEM)?;

    let total = match doc.select(&header_selector).next() {
        Some(header) => parse_result_count(&element_text(header))?,
        None if doc.select(&no_results_selector).next().is_some() => 0,
        None => return Err(Error::ParseMissingSelector(RESULTS_HEADER.into())),
    };

    let mut refs = Vec::new();
    for item in doc.select(&item_selector) {
        match parse_item(item)? {
            Some(article) => refs.push(article),
            None => warn!("skipping a listing entry without a document id"),
        }
    }

    Ok(ListingPage { total, refs })
}

fn parse_item(item: ElementRef<'_>) -> Result<Option<ArticleRef>> {
    let Some(id) = item
        .value()
        .attr("data-docid")
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return Ok(None);
    };

    let title = first_text(item, ITEM_TITLE)?;
    let raw_date = first_text(item, ITEM_DATE)?;
    let source = first_text(item, ITEM_SOURCE)?;

    Ok(Some(ArticleRef {
        id: id.to_string(),
        title,
        date: parse_date(&raw_date),
        raw_date,
        source,
    }))
}

/// Reads the count from a header like `"News (1.234)"`.
/// Both `.` and `,` are accepted as thousands separators, and a capped `"(10,000+)"` reads as the cap.
pub fn parse_result_count(header: &str) -> Result<usize> {
    RESULT_COUNT
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace(['.', ','], ""))
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| Error::ParseResultCount(header.to_string()))
}

/// Parses the long-form English dates the listing uses. Trailing text such as a
/// weekday or time of day is ignored.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_and_remainder(raw, fmt).ok())
        .map(|(date, _rest)| date)
}

fn first_text(item: ElementRef<'_>, sel_str: &str) -> Result<String> {
    let selector = create_selector(sel_str)?;
    Ok(item.select(&selector).next().map(element_text).unwrap_or_default())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}
