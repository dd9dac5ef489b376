mod fetcher;
mod hub;
mod retry;

pub use fetcher::{AssetFetcher, HttpFetcher};
pub use hub::{DownloadHub, DownloadListener, HubConfig, ListenerId};
pub use retry::{RetryPolicy, retry_with_backoff};
