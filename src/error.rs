use thiserror::Error;
use tokio::sync::mpsc;

use crate::store::DownloadedBatch;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The selector you are trying to scrape for is missing. Selector: {0}")]
    ParseMissingSelector(String),
    #[error("Couldn't read the result count from the listing header: {0:?}")]
    ParseResultCount(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Batch of {size} articles exceeds the per-download limit of {limit}")]
    BatchOverLimit { size: usize, limit: usize },
    #[error("The portal reports the download quota as exhausted")]
    PortalQuotaExhausted,
    #[error("Portal answered {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Url Error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
    #[error("Couldn't send a downloaded batch through a channel.")]
    RuntimeSendError,

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl From<mpsc::error::SendError<DownloadedBatch>> for Error {
    fn from(_value: mpsc::error::SendError<DownloadedBatch>) -> Self {
        Error::RuntimeSendError
    }
}
