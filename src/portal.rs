use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::parse::{parse_listing, ArticleRef, ListingPage};
use crate::plan::{Batch, Direction};
use crate::request::{build_client, request_page_html, request_payload, Throttle};
use crate::window::MonthWindow;
use crate::{Result, DOWNLOAD_PATH, SEARCH_PATH};

/// What to search for: the query plus the filters that narrow it to one month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub source: Option<String>,
    pub window: MonthWindow,
    pub direction: Direction,
    pub page_size: usize,
}

/// The two things the portal lets us do: list results and download a range of them.
#[async_trait]
pub trait Portal: Send + Sync {
    /// Fetches the 0-based `page` of the result listing.
    async fn listing(&self, search: &SearchRequest, page: usize) -> Result<ListingPage>;

    /// Downloads the articles of `batch` as a single payload.
    async fn download(
        &self,
        search: &SearchRequest,
        batch: &Batch,
        refs: &[ArticleRef],
    ) -> Result<Vec<u8>>;
}

/// Talks to the portal's URL API over HTTP.
#[derive(Debug)]
pub struct HttpPortal {
    base_url: Url,
    client: Client,
    throttle: Throttle,
}

impl HttpPortal {
    pub fn new(
        base_url: Url,
        cookie: Option<&str>,
        delay: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url,
            client: build_client(cookie, timeout)?,
            throttle: Throttle::new(delay),
        })
    }

    fn search_url(&self, path: &str, search: &SearchRequest) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", &search.query)
                .append_pair("startdate", &search.window.first_day().to_string())
                .append_pair("enddate", &search.window.last_day().to_string())
                .append_pair("sort", search.direction.sort_param());
            if let Some(source) = &search.source {
                pairs.append_pair("source", source);
            }
        }
        Ok(url)
    }

    pub(crate) fn listing_url(&self, search: &SearchRequest, page: usize) -> Result<Url> {
        let mut url = self.search_url(SEARCH_PATH, search)?;
        url.query_pairs_mut()
            .append_pair("pagesize", &search.page_size.to_string())
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    pub(crate) fn download_url(
        &self,
        search: &SearchRequest,
        batch: &Batch,
        refs: &[ArticleRef],
    ) -> Result<Url> {
        let mut url = self.search_url(DOWNLOAD_PATH, search)?;
        let doc_ids = refs
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        url.query_pairs_mut()
            .append_pair("range", &batch.range_param())
            .append_pair("format", "rtf")
            .append_pair("separatefiles", "true")
            .append_pair("docids", &doc_ids);
        Ok(url)
    }
}

#[async_trait]
impl Portal for HttpPortal {
    async fn listing(&self, search: &SearchRequest, page: usize) -> Result<ListingPage> {
        let url = self.listing_url(search, page)?;
        let html = request_page_html(&self.client, &self.throttle, url).await?;
        parse_listing(Arc::new(html)).await
    }

    async fn download(
        &self,
        search: &SearchRequest,
        batch: &Batch,
        refs: &[ArticleRef],
    ) -> Result<Vec<u8>> {
        let url = self.download_url(search, batch, refs)?;
        request_payload(&self.client, &self.throttle, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal() -> HttpPortal {
        HttpPortal::new(
            Url::parse("https://portal.example/uni/").unwrap(),
            Some("session=abc"),
            Duration::ZERO,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    fn search() -> SearchRequest {
        SearchRequest {
            query: "climate NEAR/10 protest*".into(),
            source: Some("Agence France Presse - English".into()),
            window: MonthWindow::new(2020, 2).unwrap(),
            direction: Direction::Backward,
            page_size: 25,
        }
    }

    #[test]
    fn listing_url_carries_the_month_filter() {
        let url = portal().listing_url(&search(), 3).unwrap();
        assert_eq!(url.path(), "/uni/api/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| pairs.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("q"), Some("climate NEAR/10 protest*"));
        assert_eq!(get("startdate"), Some("2020-02-01"));
        assert_eq!(get("enddate"), Some("2020-02-29"));
        assert_eq!(get("sort"), Some("datedescending"));
        assert_eq!(get("source"), Some("Agence France Presse - English"));
        assert_eq!(get("pagesize"), Some("25"));
        assert_eq!(get("page"), Some("3"));
    }

    #[test]
    fn download_url_names_range_and_documents() {
        let batch = Batch {
            direction: Direction::Backward,
            first: 1,
            last: 2,
        };
        let refs: Vec<ArticleRef> = ["a", "b"]
            .iter()
            .map(|id| ArticleRef {
                id: id.to_string(),
                title: String::new(),
                date: None,
                raw_date: String::new(),
                source: String::new(),
            })
            .collect();
        let url = portal().download_url(&search(), &batch, &refs).unwrap();
        assert_eq!(url.path(), "/uni/api/download");
        let query = url.query().unwrap();
        assert!(query.contains("range=1-2"));
        assert!(query.contains("docids=a%2Cb"));
        assert!(query.contains("format=rtf"));
    }
}
