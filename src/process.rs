use std::collections::BTreeMap;

use chrono::{Local, NaiveDate};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::parse::{ArticleRef, ListingPage};
use crate::plan::{plan_batches, reachable, Batch};
use crate::portal::{HttpPortal, Portal, SearchRequest};
use crate::quota::{Admission, Quota, QuotaLedger};
use crate::store::{write_batches, DownloadedBatch, Store};
use crate::window::MonthWindow;
use crate::{info_time, Error, Result};

/// Why a run ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every reachable batch of every month is on disk.
    Completed,
    /// Our own count of today's downloads reached the daily limit.
    DailyQuota,
    /// The portal refused further downloads.
    PortalQuota,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub months_searched: usize,
    pub months_skipped: usize,
    pub batches: usize,
    pub articles: usize,
    pub skipped_existing: usize,
    pub stop: StopReason,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            months_searched: 0,
            months_skipped: 0,
            batches: 0,
            articles: 0,
            skipped_existing: 0,
            stop: StopReason::Completed,
        }
    }
}

/// Runs the whole harvest described by `config` against the real portal.
pub async fn run(config: &RunConfig) -> Result<RunSummary> {
    let portal = HttpPortal::new(
        config.base_url.clone(),
        config.cookie.as_deref(),
        config.delay,
        config.timeout,
    )?;
    let store = Store::new(&config.data_dir);

    if config.dry_run {
        return plan_site(&portal, config, &store).await;
    }

    let today = today();
    let mut quota = match QuotaLedger::load(&store.quota_path()).await? {
        Some(ledger) => Quota::from_ledger(config.batch_size, config.daily_limit, &ledger, today),
        None => Quota::new(config.batch_size, config.daily_limit, today),
    };
    info!(
        remaining = quota.remaining(),
        limit = config.daily_limit,
        "downloads left today"
    );

    process_site(&portal, config, &store, &mut quota).await
}

/// Walks every month of the configured span and downloads what is missing,
/// until everything is on disk or the quota runs out.
///
/// Portal requests go out strictly one after another. Only writing to disk runs
/// on a separate task.
pub async fn process_site<P: Portal + ?Sized>(
    portal: &P,
    config: &RunConfig,
    store: &Store,
    quota: &mut Quota,
) -> Result<RunSummary> {
    let start_time = Local::now();
    info_time!(
        "Started harvesting {}..={} ({:?})",
        config.start_year,
        config.end_year,
        config.direction
    );

    let (batch_tx, batch_rx) = mpsc::channel(4);
    let writer = tokio::spawn(write_batches(store.clone(), batch_rx));

    let walked = process_months(portal, config, store, quota, batch_tx).await;

    // The sender is gone by now, so the writer finishes with whatever was queued.
    // A failed writer also explains a failed send, so its error goes first.
    writer.await??;
    let summary = walked?;

    store_ledger(store, quota).await?;
    info_time!(
        start_time,
        "Finished: {} batches, {} articles, stopped: {:?}",
        summary.batches,
        summary.articles,
        summary.stop
    );
    Ok(summary)
}

async fn process_months<P: Portal + ?Sized>(
    portal: &P,
    config: &RunConfig,
    store: &Store,
    quota: &mut Quota,
    batch_tx: mpsc::Sender<DownloadedBatch>,
) -> Result<RunSummary> {
    let mut summary = RunSummary::new();

    for window in MonthWindow::span(config.start_year, config.end_year) {
        if store
            .month_settled(window, config.direction, config.batch_size, config.query_cap)
            .await?
        {
            debug!(%window, "month already complete");
            summary.months_skipped += 1;
            continue;
        }

        let search = search_request(config, window);
        let Some(first_page) = refusable(portal.listing(&search, 0).await)? else {
            return Ok(stop_on_refusal(quota, summary, window));
        };
        summary.months_searched += 1;

        let plan = plan_batches(
            first_page.total,
            config.query_cap,
            config.batch_size,
            config.direction,
        );
        info!(
            %window,
            total = first_page.total,
            batches = plan.len(),
            "searched month"
        );
        let out_of_reach =
            first_page.total - reachable(first_page.total, config.query_cap, config.direction);
        if out_of_reach > 0 {
            debug!(%window, out_of_reach, "results beyond the reach of this pass");
        }

        let mut cursor = ListingCursor::new(portal, &search, first_page);
        for batch in plan {
            if store.has_batch(window, &batch).await? {
                summary.skipped_existing += 1;
                continue;
            }

            if quota.admit(today(), batch.len())? == Admission::DailyExhausted {
                info!(%window, %batch, "daily download limit reached, stopping");
                summary.stop = StopReason::DailyQuota;
                return Ok(summary);
            }

            let Some(refs) = refusable(cursor.refs_for(&batch).await)? else {
                return Ok(stop_on_refusal(quota, summary, window));
            };
            warn_outside_window(window, &refs);

            let batch_start = Local::now();
            let Some(payload) = refusable(portal.download(&search, &batch, &refs).await)? else {
                return Ok(stop_on_refusal(quota, summary, window));
            };
            quota.record(today());
            store_ledger(store, quota).await?;
            info_time!(
                batch_start,
                "Downloaded {window} {batch} ({} articles, {} left today)",
                refs.len(),
                quota.remaining()
            );

            summary.batches += 1;
            summary.articles += batch.len();
            batch_tx
                .send(DownloadedBatch {
                    window,
                    batch,
                    refs,
                    payload,
                })
                .await?;
        }
    }

    Ok(summary)
}

/// Searches every month and logs the batches a real run would fetch.
/// Never downloads, so it costs no download quota.
pub async fn plan_site<P: Portal + ?Sized>(
    portal: &P,
    config: &RunConfig,
    store: &Store,
) -> Result<RunSummary> {
    let mut summary = RunSummary::new();
    for window in MonthWindow::span(config.start_year, config.end_year) {
        if store
            .month_settled(window, config.direction, config.batch_size, config.query_cap)
            .await?
        {
            summary.months_skipped += 1;
            continue;
        }
        let search = search_request(config, window);
        let Some(page) = refusable(portal.listing(&search, 0).await)? else {
            warn!(%window, "portal refused the search, stopping");
            summary.stop = StopReason::PortalQuota;
            return Ok(summary);
        };
        summary.months_searched += 1;
        let plan = plan_batches(
            page.total,
            config.query_cap,
            config.batch_size,
            config.direction,
        );
        for batch in plan {
            if store.has_batch(window, &batch).await? {
                summary.skipped_existing += 1;
                continue;
            }
            info!(%window, %batch, "would download");
            summary.batches += 1;
            summary.articles += batch.len();
        }
    }
    Ok(summary)
}

/// Separates the portal's quota refusal, which ends a run cleanly, from real failures.
fn refusable<T>(res: Result<T>) -> Result<Option<T>> {
    match res {
        Ok(value) => Ok(Some(value)),
        Err(Error::PortalQuotaExhausted) => Ok(None),
        Err(e) => Err(e),
    }
}

/// The portal refused a listing or a download: nothing more goes out today.
fn stop_on_refusal(quota: &mut Quota, mut summary: RunSummary, window: MonthWindow) -> RunSummary {
    quota.exhaust(today());
    warn!(%window, "portal refused the request, quota exhausted");
    summary.stop = StopReason::PortalQuota;
    summary
}

fn search_request(config: &RunConfig, window: MonthWindow) -> SearchRequest {
    SearchRequest {
        query: config.query.clone(),
        source: config.source.clone(),
        window,
        direction: config.direction,
        page_size: config.page_size,
    }
}

async fn store_ledger(store: &Store, quota: &Quota) -> Result<()> {
    quota.ledger().save(&store.quota_path()).await
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn warn_outside_window(window: MonthWindow, refs: &[ArticleRef]) {
    for r in refs {
        if let Some(date) = r.date.filter(|d| !window.contains(*d)) {
            warn!(%window, id = %r.id, %date, "listing entry dated outside its month");
        }
    }
}

/// Fetches listing pages lazily while batches walk forward through a listing.
///
/// Pages behind the current batch are dropped, so at most the pages spanning
/// one batch are held at a time.
pub struct ListingCursor<'a, P: Portal + ?Sized> {
    portal: &'a P,
    search: &'a SearchRequest,
    pages: BTreeMap<usize, Vec<ArticleRef>>,
}

impl<'a, P: Portal + ?Sized> ListingCursor<'a, P> {
    pub fn new(portal: &'a P, search: &'a SearchRequest, first_page: ListingPage) -> Self {
        let mut pages = BTreeMap::new();
        pages.insert(0, first_page.refs);
        Self {
            portal,
            search,
            pages,
        }
    }

    /// The article references at the batch's listing positions. A listing that
    /// shrank since it was counted yields fewer references than the batch spans.
    pub async fn refs_for(&mut self, batch: &Batch) -> Result<Vec<ArticleRef>> {
        let page_size = self.search.page_size.max(1);
        let first_page = (batch.first - 1) / page_size;
        let last_page = (batch.last - 1) / page_size;

        self.pages = self.pages.split_off(&first_page);

        let mut refs = Vec::with_capacity(batch.len());
        for page in first_page..=last_page {
            if !self.pages.contains_key(&page) {
                let fetched = self.portal.listing(self.search, page).await?;
                self.pages.insert(page, fetched.refs);
            }
            let Some(entries) = self.pages.get(&page) else {
                continue;
            };
            let page_start = page * page_size + 1;
            for (offset, entry) in entries.iter().enumerate() {
                let position = page_start + offset;
                if (batch.first..=batch.last).contains(&position) {
                    refs.push(entry.clone());
                }
            }
        }

        if refs.len() < batch.len() {
            warn!(
                %batch,
                found = refs.len(),
                "listing returned fewer entries than expected"
            );
        }
        Ok(refs)
    }
}
