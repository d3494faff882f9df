use std::time::Duration;

use reqwest::{header, Client, Response, StatusCode};
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Builds the one client every portal request goes through.
pub(crate) fn build_client(cookie: Option<&str>, timeout: Duration) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    if let Some(cookie) = cookie {
        let value = header::HeaderValue::from_str(cookie)
            .map_err(|_| Error::Config("the session cookie is not a valid header value".into()))?;
        headers.insert(header::COOKIE, value);
    }
    let client = Client::builder()
        .user_agent(default_user_agent())
        .default_headers(headers)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

fn default_user_agent() -> String {
    format!(
        "{}/{} (rust; {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// Keeps at least `interval` between the starts of two consecutive requests.
#[derive(Debug)]
pub(crate) struct Throttle {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits for the next free slot. The lock is held while sleeping, so
    /// concurrent callers queue up instead of firing together.
    pub(crate) async fn wait(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if let Some(at) = *next_slot {
            if at > Instant::now() {
                debug!(wait_ms = (at - Instant::now()).as_millis() as u64, "throttling");
                sleep_until(at).await;
            }
        }
        *next_slot = Some(Instant::now() + self.interval);
    }
}

/// Sends a GET and maps the portal's refusal codes onto errors.
pub(crate) async fn get(client: &Client, throttle: &Throttle, url: Url) -> Result<Response> {
    throttle.wait().await;
    debug!(%url, "GET");
    let res = client.get(url.clone()).send().await?;
    check_status(res.status(), &url)?;
    Ok(res)
}

/// Requests a page and returns the HTML.
pub(crate) async fn request_page_html(
    client: &Client,
    throttle: &Throttle,
    url: Url,
) -> Result<String> {
    let html = get(client, throttle, url).await?.text().await?;
    Ok(html)
}

/// Requests a download and returns the raw payload.
pub(crate) async fn request_payload(
    client: &Client,
    throttle: &Throttle,
    url: Url,
) -> Result<Vec<u8>> {
    let bytes = get(client, throttle, url).await?.bytes().await?;
    Ok(bytes.to_vec())
}

fn check_status(status: StatusCode, url: &Url) -> Result<()> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::PortalQuotaExhausted);
    }
    if !status.is_success() {
        return Err(Error::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(())
}
