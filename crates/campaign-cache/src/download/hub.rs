//! Shared download subsystem.
//!
//! Every coordinator talks to one `DownloadHub`. The hub keeps at most one
//! outstanding fetch per distinct URL and fans each completion (or
//! cancellation) out to every registered listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::fetcher::AssetFetcher;
use super::retry::{RetryPolicy, retry_with_backoff};
use crate::error::CacheError;
use crate::file_cache::FileCache;

/// Receives per-URL download outcomes.
///
/// Callbacks run on the hub's worker tasks, never while the hub holds its
/// listener lock, so a listener may unregister itself from inside a callback.
pub trait DownloadListener: Send + Sync + 'static {
    fn on_download_completed(&self, url: &str);
    fn on_download_cancelled(&self, url: &str);
}

/// Handle returned by [`DownloadHub::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    pub retry: RetryPolicy,
    /// Upper bound for a single fetch attempt. Expiry counts as a retryable failure.
    pub fetch_timeout: Option<Duration>,
}

pub struct DownloadHub {
    cache: Arc<FileCache>,
    fetcher: Arc<dyn AssetFetcher>,
    config: HubConfig,
    /// Single lock around the listener list; contention is one or two campaigns.
    listeners: Mutex<Vec<(ListenerId, Arc<dyn DownloadListener>)>>,
    next_listener_id: AtomicU64,
    /// URL -> cancellation token of its one outstanding fetch.
    in_flight: DashMap<String, CancellationToken>,
    fetches_started: AtomicU64,
    token: CancellationToken,
}

impl DownloadHub {
    pub fn new(cache: Arc<FileCache>, fetcher: Arc<dyn AssetFetcher>, config: HubConfig) -> Self {
        Self {
            cache,
            fetcher,
            config,
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            in_flight: DashMap::new(),
            fetches_started: AtomicU64::new(0),
            token: CancellationToken::new(),
        }
    }

    pub fn cache(&self) -> &Arc<FileCache> {
        &self.cache
    }

    pub fn add_listener(&self, listener: Arc<dyn DownloadListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Returns whether the listener was still registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Request `url`. Joins the outstanding fetch when one exists.
    ///
    /// Must be called from within a Tokio runtime. Listeners interested in the
    /// outcome must be registered before calling this.
    pub fn add_download(self: &Arc<Self>, url: &str) {
        if self.token.is_cancelled() {
            debug!(url = %url, "hub shut down, cancelling download request");
            self.notify_cancelled(url);
            return;
        }

        let token = match self.in_flight.entry(url.to_owned()) {
            Entry::Occupied(_) => {
                debug!(url = %url, "joining in-flight download");
                return;
            }
            Entry::Vacant(vacant) => {
                let token = self.token.child_token();
                vacant.insert(token.clone());
                token
            }
        };

        self.fetches_started.fetch_add(1, Ordering::Relaxed);
        let hub = Arc::clone(self);
        let url = url.to_owned();
        let span = info_span!("asset_download", url = %url);
        tokio::spawn(async move { hub.run_download(url, token).await }.instrument(span));
    }

    /// Cancel one outstanding download; listeners receive a cancellation.
    pub fn cancel_download(&self, url: &str) -> bool {
        match self.in_flight.get(url) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything and refuse new requests.
    pub fn shutdown(&self) {
        info!(in_flight = self.in_flight.len(), "shutting down download hub");
        self.token.cancel();
    }

    pub fn is_in_flight(&self, url: &str) -> bool {
        self.in_flight.contains_key(url)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of underlying fetches started since creation.
    pub fn fetches_started(&self) -> u64 {
        self.fetches_started.load(Ordering::Relaxed)
    }

    async fn run_download(self: Arc<Self>, url: String, token: CancellationToken) {
        let result = if self.cache.is_cached(&url) && self.cache.is_fresh(&url) {
            debug!("asset already cached");
            Ok(())
        } else {
            let partial = self.cache.partial_path_for(&url);
            let dest = self.cache.path_for(&url);
            let fetch_timeout = self.config.fetch_timeout;
            let outcome = retry_with_backoff(&self.config.retry, &token, |_| {
                let fetcher = Arc::clone(&self.fetcher);
                let token = token.clone();
                let (url, partial, dest) = (url.clone(), partial.clone(), dest.clone());
                async move {
                    let fetch = fetcher.fetch(&url, &partial, &dest);
                    let bounded = async {
                        match fetch_timeout {
                            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                                Ok(res) => res,
                                Err(_) => Err(CacheError::Timeout {
                                    reason: format!("fetch exceeded {}s", limit.as_secs()),
                                }),
                            },
                            None => fetch.await,
                        }
                    };
                    tokio::select! {
                        _ = token.cancelled() => Err(CacheError::Cancelled),
                        res = bounded => res,
                    }
                }
            })
            .await;

            if outcome.is_err() {
                let _ = tokio::fs::remove_file(&partial).await;
            }
            outcome.map(|_| ())
        };

        // Leave the in-flight map before fanning out so a request made after
        // the callback starts a fresh fetch instead of joining a finished one.
        self.in_flight.remove(&url);

        match result {
            Ok(()) => {
                debug!("asset ready");
                self.notify_completed(&url);
            }
            Err(CacheError::Cancelled) => {
                debug!("asset download cancelled");
                self.notify_cancelled(&url);
            }
            Err(e) => {
                warn!(error = %e, "asset download failed permanently");
                self.notify_cancelled(&url);
            }
        }
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn DownloadListener>> {
        self.listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn notify_completed(&self, url: &str) {
        for listener in self.snapshot_listeners() {
            listener.on_download_completed(url);
        }
    }

    fn notify_cancelled(&self, url: &str) {
        for listener in self.snapshot_listeners() {
            listener.on_download_cancelled(url);
        }
    }
}

impl std::fmt::Debug for DownloadHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadHub")
            .field("cache", &self.cache)
            .field("in_flight", &self.in_flight.len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::sync::mpsc;

    /// Writes a fixed body after an optional delay.
    struct SlowFetcher {
        delay: Duration,
        calls: AtomicU64,
    }

    #[async_trait]
    impl AssetFetcher for SlowFetcher {
        async fn fetch(&self, _url: &str, partial: &Path, dest: &Path) -> Result<u64, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            std::fs::write(partial, b"video").unwrap();
            std::fs::rename(partial, dest).unwrap();
            Ok(5)
        }
    }

    struct ChannelListener(mpsc::UnboundedSender<(bool, String)>);

    impl DownloadListener for ChannelListener {
        fn on_download_completed(&self, url: &str) {
            let _ = self.0.send((true, url.to_owned()));
        }
        fn on_download_cancelled(&self, url: &str) {
            let _ = self.0.send((false, url.to_owned()));
        }
    }

    fn hub(dir: &Path, delay: Duration) -> (Arc<DownloadHub>, Arc<SlowFetcher>) {
        let cache = Arc::new(FileCache::new(dir).unwrap());
        let fetcher = Arc::new(SlowFetcher {
            delay,
            calls: AtomicU64::new(0),
        });
        let hub = Arc::new(DownloadHub::new(
            cache,
            fetcher.clone(),
            HubConfig {
                retry: RetryPolicy::none(),
                ..HubConfig::default()
            },
        ));
        (hub, fetcher)
    }

    #[tokio::test]
    async fn duplicate_requests_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, fetcher) = hub(dir.path(), Duration::from_millis(50));
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.add_listener(Arc::new(ChannelListener(tx.clone())));
        hub.add_listener(Arc::new(ChannelListener(tx)));

        let url = "https://cdn.example.com/v.mp4";
        hub.add_download(url);
        hub.add_download(url);
        assert!(hub.is_in_flight(url));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, (true, url.to_owned()));
        assert_eq!(second, (true, url.to_owned()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.fetches_started(), 1);
        assert!(!hub.is_in_flight(url));
        assert!(hub.cache().is_cached(url));
    }

    #[tokio::test]
    async fn removed_listener_is_not_notified() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _) = hub(dir.path(), Duration::ZERO);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.add_listener(Arc::new(ChannelListener(tx)));
        assert!(hub.remove_listener(id));
        assert!(!hub.remove_listener(id));

        hub.add_download("https://cdn.example.com/v.mp4");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _) = hub(dir.path(), Duration::from_secs(60));
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.add_listener(Arc::new(ChannelListener(tx)));

        let url = "https://cdn.example.com/v.mp4";
        hub.add_download(url);
        hub.shutdown();
        assert_eq!(rx.recv().await.unwrap(), (false, url.to_owned()));
        assert!(!hub.cache().is_cached(url));

        hub.add_download("https://cdn.example.com/late.mp4");
        assert_eq!(
            rx.recv().await.unwrap(),
            (false, "https://cdn.example.com/late.mp4".to_owned())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FileCache::new(dir.path()).unwrap());
        let hub = Arc::new(DownloadHub::new(
            cache,
            Arc::new(SlowFetcher {
                delay: Duration::from_secs(120),
                calls: AtomicU64::new(0),
            }),
            HubConfig {
                retry: RetryPolicy::none(),
                fetch_timeout: Some(Duration::from_secs(30)),
            },
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.add_listener(Arc::new(ChannelListener(tx)));

        let url = "https://cdn.example.com/v.mp4";
        hub.add_download(url);
        assert_eq!(rx.recv().await.unwrap(), (false, url.to_owned()));
        assert!(!hub.cache().is_cached(url));
    }

    #[tokio::test]
    async fn cached_asset_completes_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, fetcher) = hub(dir.path(), Duration::ZERO);
        let url = "https://cdn.example.com/v.mp4";
        std::fs::write(hub.cache().path_for(url), b"video").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.add_listener(Arc::new(ChannelListener(tx)));
        hub.add_download(url);
        assert_eq!(rx.recv().await.unwrap(), (true, url.to_owned()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
