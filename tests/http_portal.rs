use std::time::Duration;

use nexis_harvest::parse::ArticleRef;
use nexis_harvest::plan::{Batch, Direction};
use nexis_harvest::portal::{HttpPortal, Portal, SearchRequest};
use nexis_harvest::window::MonthWindow;
use nexis_harvest::Error;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"
<html><body>
  <header class="resultsHeader">News (2)</header>
  <ol>
    <li data-docid="doc-1"><h2>First</h2><span class="date">March 2, 2021</span><span class="source">AFP</span></li>
    <li data-docid="doc-2"><h2>Second</h2><span class="date">March 30, 2021</span><span class="source">AFP</span></li>
  </ol>
</body></html>
"#;

fn search() -> SearchRequest {
    SearchRequest {
        query: "climate".into(),
        source: None,
        window: MonthWindow::new(2021, 3).unwrap(),
        direction: Direction::Forward,
        page_size: 10,
    }
}

fn portal(server: &MockServer) -> HttpPortal {
    let base = Url::parse(&format!("{}/uni/", server.uri())).unwrap();
    HttpPortal::new(
        base,
        Some("session=abc"),
        Duration::ZERO,
        Duration::from_secs(5),
    )
    .unwrap()
}

fn refs() -> Vec<ArticleRef> {
    ["doc-1", "doc-2"]
        .iter()
        .map(|id| ArticleRef {
            id: id.to_string(),
            title: String::new(),
            date: None,
            raw_date: String::new(),
            source: String::new(),
        })
        .collect()
}

#[tokio::test]
async fn listing_is_requested_and_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uni/api/search"))
        .and(query_param("q", "climate"))
        .and(query_param("startdate", "2021-03-01"))
        .and(query_param("enddate", "2021-03-31"))
        .and(query_param("sort", "dateascending"))
        .and(query_param("page", "0"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .expect(1)
        .mount(&server)
        .await;

    let page = portal(&server).listing(&search(), 0).await.unwrap();
    assert_eq!(page.total, 2);
    let ids: Vec<_> = page.refs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["doc-1", "doc-2"]);
}

#[tokio::test]
async fn download_returns_the_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uni/api/download"))
        .and(query_param("range", "1-2"))
        .and(query_param("docids", "doc-1,doc-2"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let batch = Batch {
        direction: Direction::Forward,
        first: 1,
        last: 2,
    };
    let payload = portal(&server)
        .download(&search(), &batch, &refs())
        .await
        .unwrap();
    assert_eq!(payload, b"PK\x03\x04");
}

#[tokio::test]
async fn too_many_requests_means_quota_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uni/api/download"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let batch = Batch {
        direction: Direction::Forward,
        first: 1,
        last: 2,
    };
    let err = portal(&server)
        .download(&search(), &batch, &refs())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PortalQuotaExhausted));
}

#[tokio::test]
async fn server_errors_surface_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uni/api/search"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = portal(&server).listing(&search(), 0).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 503, .. }));
}
