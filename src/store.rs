use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::parse::ArticleRef;
use crate::plan::{Batch, Direction};
use crate::window::MonthWindow;
use crate::Result;

const PAYLOAD_EXT: &str = "zip";
const MANIFEST_EXT: &str = "json";
const QUOTA_FILE: &str = "quota.json";

/// A downloaded batch on its way to disk.
#[derive(Debug)]
pub struct DownloadedBatch {
    pub window: MonthWindow,
    pub batch: Batch,
    pub refs: Vec<ArticleRef>,
    pub payload: Vec<u8>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    window: String,
    batch: &'a Batch,
    articles: &'a [ArticleRef],
}

/// Layout of the data directory:
/// `{root}/zip/{YYYY-MM}/{label}.zip` with a `{label}.json` manifest next to it,
/// and `{root}/quota.json` for the daily counter.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn quota_path(&self) -> PathBuf {
        self.root.join(QUOTA_FILE)
    }

    pub fn month_dir(&self, window: MonthWindow) -> PathBuf {
        self.root.join(PAYLOAD_EXT).join(window.to_string())
    }

    pub fn batch_path(&self, window: MonthWindow, batch: &Batch) -> PathBuf {
        self.month_dir(window)
            .join(format!("{}.{PAYLOAD_EXT}", batch.label()))
    }

    pub async fn has_batch(&self, window: MonthWindow, batch: &Batch) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.batch_path(window, batch)).await?)
    }

    /// All batches already downloaded for a month.
    pub async fn existing_batches(&self, window: MonthWindow) -> Result<Vec<Batch>> {
        let dir = self.month_dir(window);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut batches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_EXT) {
                continue;
            }
            if let Some(batch) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(Batch::from_label)
            {
                batches.push(batch);
            }
        }
        batches.sort_by_key(|b| (b.direction == Direction::Backward, b.first));
        Ok(batches)
    }

    /// Whether a month can be skipped without searching it again.
    ///
    /// A batch shorter than `batch_size` can only be the last one of its pass, and a
    /// batch ending at `query_cap` means the pass hit the cap. A forward pass that
    /// hit the cap still leaves work for a backward pass. A finished backward pass
    /// implies the forward pass had nothing more to reach.
    pub async fn month_settled(
        &self,
        window: MonthWindow,
        direction: Direction,
        batch_size: usize,
        query_cap: usize,
    ) -> Result<bool> {
        let batches = self.existing_batches(window).await?;
        let short = |d: Direction| {
            batches
                .iter()
                .any(|b| b.direction == d && b.len() < batch_size && b.last < query_cap)
        };
        let capped = |d: Direction| {
            batches
                .iter()
                .any(|b| b.direction == d && b.last == query_cap)
        };
        let settled = match direction {
            Direction::Forward => {
                short(Direction::Forward)
                    || short(Direction::Backward)
                    || capped(Direction::Forward)
            }
            Direction::Backward => {
                short(Direction::Forward)
                    || short(Direction::Backward)
                    || capped(Direction::Backward)
            }
        };
        Ok(settled)
    }

    /// Writes payload and manifest. Each lands under a `.part` name first and is
    /// renamed into place, so a file that exists is always complete.
    pub async fn write_batch(&self, downloaded: &DownloadedBatch) -> Result<PathBuf> {
        let dir = self.month_dir(downloaded.window);
        tokio::fs::create_dir_all(&dir).await?;

        let payload_path = self.batch_path(downloaded.window, &downloaded.batch);
        let manifest_path = payload_path.with_extension(MANIFEST_EXT);
        let manifest = Manifest {
            window: downloaded.window.to_string(),
            batch: &downloaded.batch,
            articles: &downloaded.refs,
        };

        // Manifest first: the payload is what marks the batch as done.
        write_atomic(&manifest_path, &serde_json::to_vec_pretty(&manifest)?).await?;
        write_atomic(&payload_path, &downloaded.payload).await?;
        Ok(payload_path)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Drains the channel and writes every batch it receives.
/// Returns the number of batches written once all senders are gone.
pub async fn write_batches(store: Store, mut rx: mpsc::Receiver<DownloadedBatch>) -> Result<usize> {
    let mut written = 0;
    while let Some(downloaded) = rx.recv().await {
        let path = store.write_batch(&downloaded).await?;
        debug!(path = %path.display(), bytes = downloaded.payload.len(), "wrote batch");
        written += 1;
    }
    info!(written, "writer finished");
    Ok(written)
}
