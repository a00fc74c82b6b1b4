//! Session orchestration module
//!
//! Owns one torrent's lifecycle: the managed tracker set and its announce
//! scheduling loop, the peer connection fan-out, and the shared transfer
//! counters.

pub mod state;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::TorrentError;
use crate::peer::{connect_to_peers, PeerConnectOpts, PeerHandle, PeerReaderContext};
use crate::storage::PieceStore;
use crate::torrent::Torrent;
use crate::tracker::{create_tracker_client, AnnounceEvent, AnnounceParams, TrackerClient};

pub use state::{SessionStats, SessionStatus, TransferState};

/// One tracker endpoint with its session-local scheduling state
///
/// Lives for the whole session; the `announcing` flag keeps announces to
/// the same tracker strictly sequential.
pub struct ManagedTracker {
    client: Arc<dyn TrackerClient>,
    interval: Duration,
    next_announce_at: Instant,
    failures: u32,
    announcing: bool,
}

impl ManagedTracker {
    /// Wrap a tracker client, due for its first announce immediately
    pub fn new(client: Arc<dyn TrackerClient>, default_interval: Duration) -> Self {
        Self {
            client,
            interval: default_interval,
            next_announce_at: Instant::now(),
            failures: 0,
            announcing: false,
        }
    }

    /// Apply a successful announce: reset failures and reschedule by the
    /// tracker-supplied interval, clamped to the default when non-positive
    pub fn record_success(
        &mut self,
        response_interval_secs: u32,
        default_interval: Duration,
        max_interval: Duration,
    ) {
        self.failures = 0;

        let mut interval = Duration::from_secs(u64::from(response_interval_secs));
        if interval.is_zero() {
            interval = default_interval;
        }
        self.interval = interval.min(max_interval);
        self.next_announce_at = Instant::now() + self.interval;
    }

    /// Apply a failed announce: bump the failure count and push the next
    /// attempt out multiplicatively, returning the applied delay
    pub fn record_failure(&mut self, max_interval: Duration) -> Duration {
        self.failures += 1;
        let delay = self.backoff_delay(max_interval);
        self.next_announce_at = Instant::now() + delay;
        delay
    }

    /// Backoff for the current failure count: `interval × (failures + 1)`,
    /// capped at the configured maximum
    pub fn backoff_delay(&self, max_interval: Duration) -> Duration {
        (self.interval * (self.failures + 1)).min(max_interval)
    }

    /// Consecutive failures since the last success
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The tracker's announce URL
    pub fn url(&self) -> &str {
        self.client.url()
    }
}

/// Live download/upload state for one torrent
pub struct Session {
    peer_id: [u8; 20],
    torrent: Arc<Torrent>,
    config: EngineConfig,
    trackers: Arc<Mutex<Vec<ManagedTracker>>>,
    transfer: Arc<Mutex<TransferState>>,
    piece_store: Arc<PieceStore>,
    peers: Arc<Mutex<Vec<PeerHandle>>>,
    completion: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session for a parsed torrent
    ///
    /// One managed tracker is built per announce URL; URLs whose client
    /// cannot be constructed are skipped. Zero usable trackers is fatal.
    pub fn new(peer_id: [u8; 20], torrent: Torrent, config: EngineConfig) -> Result<Self> {
        let mut trackers = Vec::new();
        for url in &torrent.announce_urls {
            match create_tracker_client(url) {
                Ok(client) => trackers.push(ManagedTracker::new(
                    Arc::from(client),
                    config.default_announce_interval,
                )),
                Err(e) => warn!("Skipping tracker {}: {}", url, e),
            }
        }

        if trackers.is_empty() {
            return Err(TorrentError::session_error_with_hash(
                "Failed to initialize any trackers",
                torrent.info_hash_hex(),
            )
            .into());
        }

        let piece_store = Arc::new(PieceStore::from_torrent(&torrent));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            peer_id,
            torrent: Arc::new(torrent),
            config,
            trackers: Arc::new(Mutex::new(trackers)),
            transfer: Arc::new(Mutex::new(TransferState::new())),
            piece_store,
            peers: Arc::new(Mutex::new(Vec::new())),
            completion: Arc::new(Notify::new()),
            shutdown_tx,
            scheduler: Mutex::new(None),
        })
    }

    /// Announce the start to every tracker and launch the scheduling loop
    pub async fn start(self: &Arc<Self>) {
        info!("Starting session for {}", self.torrent.info_hash_hex());

        self.broadcast_event(AnnounceEvent::Started).await;

        let session = self.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            session.run_scheduler(shutdown_rx).await;
        });
        *self.scheduler.lock().await = Some(handle);
    }

    /// Stop the session: halt the scheduler, send a best-effort stopped
    /// announce, and tear down every peer connection
    pub async fn stop(self: &Arc<Self>) {
        {
            let mut transfer = self.transfer.lock().await;
            if transfer.status == SessionStatus::Stopped {
                return;
            }
            transfer.status = SessionStatus::Stopped;
        }

        info!("Stopping session for {}", self.torrent.info_hash_hex());
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.scheduler.lock().await.take() {
            let _ = handle.await;
        }

        // Best effort: announce errors during shutdown are absorbed by the
        // per-tracker bookkeeping and never retried.
        self.broadcast_event(AnnounceEvent::Stopped).await;

        let mut peers = self.peers.lock().await;
        for handle in peers.drain(..) {
            handle.abort();
        }
    }

    /// Suspend transfers (status only; connections stay up)
    pub async fn pause(&self) {
        let mut transfer = self.transfer.lock().await;
        if matches!(transfer.status, SessionStatus::Started | SessionStatus::InProgress) {
            transfer.status = SessionStatus::Paused;
        }
    }

    /// Resume a paused session
    pub async fn resume(&self) {
        let mut transfer = self.transfer.lock().await;
        if transfer.status == SessionStatus::Paused {
            transfer.status = SessionStatus::InProgress;
        }
    }

    /// The torrent this session transfers
    pub fn torrent(&self) -> &Torrent {
        &self.torrent
    }

    /// The torrent's info hash
    pub fn info_hash(&self) -> [u8; 20] {
        self.torrent.info_hash
    }

    /// Current lifecycle status
    pub async fn status(&self) -> SessionStatus {
        self.transfer.lock().await.status
    }

    /// Read-only progress snapshot
    pub async fn stats(&self) -> SessionStats {
        let (status, downloaded, uploaded) = {
            let transfer = self.transfer.lock().await;
            (transfer.status, transfer.downloaded, transfer.uploaded)
        };

        let connected_peers = {
            let peers = self.peers.lock().await;
            peers.iter().filter(|p| !p.is_finished()).count()
        };

        SessionStats {
            status,
            downloaded,
            uploaded,
            left: self.torrent.size.saturating_sub(downloaded),
            total_size: self.torrent.size,
            pieces_total: self.piece_store.piece_count(),
            pieces_complete: self.piece_store.completed_count().await,
            connected_peers,
        }
    }

    /// The scheduling loop: sleep until the earliest idle tracker is due,
    /// then dispatch every due tracker concurrently
    async fn run_scheduler(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        debug!("Announce scheduler running for {}", self.torrent.info_hash_hex());

        loop {
            let wake_at = {
                let trackers = self.trackers.lock().await;
                trackers
                    .iter()
                    .filter(|t| !t.announcing)
                    .map(|t| t.next_announce_at)
                    .min()
                    .unwrap_or_else(|| Instant::now() + self.config.default_announce_interval)
            };

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = self.completion.notified() => {
                    self.handle_completion().await;
                }
                _ = tokio::time::sleep_until(wake_at) => {
                    self.dispatch_due_announces().await;
                }
            }
        }

        debug!("Announce scheduler exited for {}", self.torrent.info_hash_hex());
    }

    /// Flip every idle, past-deadline tracker to announcing and fire its
    /// announce as its own task
    async fn dispatch_due_announces(self: &Arc<Self>) {
        let now = Instant::now();
        let due: Vec<usize> = {
            let mut trackers = self.trackers.lock().await;
            trackers
                .iter_mut()
                .enumerate()
                .filter(|(_, t)| !t.announcing && now >= t.next_announce_at)
                .map(|(i, t)| {
                    t.announcing = true;
                    i
                })
                .collect()
        };

        for index in due {
            let session = self.clone();
            tokio::spawn(async move {
                // Steady-state announces omit the event parameter.
                session.announce_to_tracker(index, AnnounceEvent::None).await;
            });
        }
    }

    /// One announce against one tracker, updating its scheduling state
    async fn announce_to_tracker(self: Arc<Self>, index: usize, event: AnnounceEvent) {
        let client = {
            let trackers = self.trackers.lock().await;
            trackers[index].client.clone()
        };

        let params = self.build_announce_params(event).await;
        let result = client.announce(&params).await;

        let peers = {
            let mut trackers = self.trackers.lock().await;
            let tracker = &mut trackers[index];
            tracker.announcing = false;

            match result {
                Ok(response) => {
                    tracker.record_success(
                        response.interval,
                        self.config.default_announce_interval,
                        self.config.max_announce_interval,
                    );
                    debug!(
                        "Announce ok: {} ({} peers, next in {:?})",
                        tracker.url(),
                        response.peers.len(),
                        tracker.interval
                    );
                    response.peers
                }
                Err(e) => {
                    let delay = tracker.record_failure(self.config.max_announce_interval);
                    warn!(
                        "Announce failed: {} (failure #{}, retry in {:?}): {}",
                        tracker.url(),
                        tracker.failures(),
                        delay,
                        e
                    );
                    Vec::new()
                }
            }
        };

        if !peers.is_empty() && event != AnnounceEvent::Stopped {
            self.connect_new_peers(peers).await;
        }
    }

    /// Byte accounting is read under the session lock at the moment the
    /// request is built, not at dispatch time
    async fn build_announce_params(&self, event: AnnounceEvent) -> AnnounceParams {
        let transfer = self.transfer.lock().await;
        AnnounceParams {
            info_hash: self.torrent.info_hash,
            peer_id: self.peer_id,
            port: self.config.listen_port,
            uploaded: transfer.uploaded,
            downloaded: transfer.downloaded,
            left: self.torrent.size.saturating_sub(transfer.downloaded),
            event,
        }
    }

    /// Announce a lifecycle event to every idle tracker concurrently,
    /// waiting for all attempts before returning
    async fn broadcast_event(self: &Arc<Self>, event: AnnounceEvent) {
        let indices: Vec<usize> = {
            let mut trackers = self.trackers.lock().await;
            trackers
                .iter_mut()
                .enumerate()
                .filter(|(_, t)| !t.announcing)
                .map(|(i, t)| {
                    t.announcing = true;
                    i
                })
                .collect()
        };

        let mut tasks = JoinSet::new();
        for index in indices {
            let session = self.clone();
            tasks.spawn(async move {
                session.announce_to_tracker(index, event).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Dial new peers from a tracker response, up to the configured limit
    async fn connect_new_peers(self: &Arc<Self>, peers: Vec<crate::tracker::TrackerPeer>) {
        if self.status().await == SessionStatus::Stopped {
            return;
        }

        let candidates: Vec<_> = {
            let mut handles = self.peers.lock().await;
            handles.retain(|h| !h.is_finished());

            let connected: HashSet<SocketAddr> = handles.iter().map(|h| h.addr).collect();
            let slots = self.config.max_peers.saturating_sub(handles.len());

            peers
                .into_iter()
                .filter(|p| !connected.contains(&p.socket_addr()))
                .take(slots)
                .collect()
        };

        if candidates.is_empty() {
            return;
        }

        let opts = PeerConnectOpts {
            info_hash: self.torrent.info_hash,
            peer_id: self.peer_id,
            num_pieces: self.torrent.piece_count(),
            connect_timeout: self.config.connect_timeout,
            handshake_timeout: self.config.handshake_timeout,
        };

        let connections = connect_to_peers(&candidates, &opts).await;

        let ctx = PeerReaderContext {
            piece_store: self.piece_store.clone(),
            transfer: self.transfer.clone(),
            completion: self.completion.clone(),
            idle_timeout: self.config.idle_timeout,
        };

        let mut handles = self.peers.lock().await;
        for connection in connections {
            if handles.iter().any(|h| h.addr == connection.addr) {
                continue;
            }
            handles.push(connection.spawn_reader(ctx.clone()));
        }
    }

    /// Mark the session completed and broadcast the completion event once
    async fn handle_completion(self: &Arc<Self>) {
        if !self.piece_store.is_complete().await {
            return;
        }

        {
            let mut transfer = self.transfer.lock().await;
            if transfer.status == SessionStatus::Completed {
                return;
            }
            transfer.status = SessionStatus::Completed;
        }

        info!("Torrent {} completed", self.torrent.info_hash_hex());
        self.broadcast_event(AnnounceEvent::Completed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentInfo;
    use crate::tracker::{AnnounceResponse, TrackerPeer};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn init_test_logging() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn test_torrent(urls: Vec<String>) -> Torrent {
        Torrent {
            announce_urls: urls,
            creation_date: None,
            comment: None,
            created_by: None,
            encoding: None,
            info: TorrentInfo {
                name: "t".to_string(),
                piece_length: 16384,
                pieces: vec![[1u8; 20], [2u8; 20]],
                private: false,
                length: Some(20000),
                files: None,
            },
            info_hash: [5u8; 20],
            size: 20000,
        }
    }

    /// Tracker double counting announces and optionally failing them.
    #[derive(Debug)]
    struct MockTracker {
        calls: AtomicU32,
        fail: bool,
        interval: u32,
    }

    impl MockTracker {
        fn new(fail: bool, interval: u32) -> Arc<Self> {
            Arc::new(Self { calls: AtomicU32::new(0), fail, interval })
        }
    }

    #[async_trait]
    impl TrackerClient for MockTracker {
        async fn announce(&self, _params: &AnnounceParams) -> Result<AnnounceResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TorrentError::tracker_error("mock failure").into());
            }
            Ok(AnnounceResponse {
                interval: self.interval,
                ..Default::default()
            })
        }

        fn url(&self) -> &str {
            "mock://tracker"
        }
    }

    fn session_with_mocks(mocks: Vec<Arc<MockTracker>>) -> Arc<Session> {
        let config = EngineConfig::default();
        let trackers = mocks
            .into_iter()
            .map(|m| ManagedTracker::new(m, config.default_announce_interval))
            .collect();

        let torrent = test_torrent(vec!["http://unused.example.com/ann".to_string()]);
        let piece_store = Arc::new(PieceStore::from_torrent(&torrent));
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Session {
            peer_id: [3u8; 20],
            torrent: Arc::new(torrent),
            config,
            trackers: Arc::new(Mutex::new(trackers)),
            transfer: Arc::new(Mutex::new(TransferState::new())),
            piece_store,
            peers: Arc::new(Mutex::new(Vec::new())),
            completion: Arc::new(Notify::new()),
            shutdown_tx,
            scheduler: Mutex::new(None),
        })
    }

    #[test]
    fn test_session_new_requires_usable_tracker() {
        let torrent = test_torrent(vec!["udp://tracker.example.com:6969".to_string()]);
        let result = Session::new([0u8; 20], torrent, EngineConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_session_new_skips_bad_urls_keeps_good() {
        let torrent = test_torrent(vec![
            "udp://tracker.example.com:6969".to_string(),
            "http://tracker.example.com/ann".to_string(),
        ]);
        assert!(Session::new([0u8; 20], torrent, EngineConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_initial_stats() {
        let torrent = test_torrent(vec!["http://tracker.example.com/ann".to_string()]);
        let session =
            Arc::new(Session::new([0u8; 20], torrent, EngineConfig::default()).unwrap());

        let stats = session.stats().await;
        assert_eq!(stats.status, SessionStatus::Started);
        assert_eq!(stats.downloaded, 0);
        assert_eq!(stats.left, 20000);
        assert_eq!(stats.pieces_total, 2);
        assert_eq!(stats.pieces_complete, 0);
        assert_eq!(stats.connected_peers, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_tracker() {
        init_test_logging();
        let first = MockTracker::new(false, 1800);
        let second = MockTracker::new(false, 1800);
        let session = session_with_mocks(vec![first.clone(), second.clone()]);

        session.broadcast_event(AnnounceEvent::Started).await;
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_announce_backs_off_tracker() {
        let mock = MockTracker::new(true, 0);
        let session = session_with_mocks(vec![mock.clone()]);

        session.broadcast_event(AnnounceEvent::Started).await;
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);

        let trackers = session.trackers.lock().await;
        assert_eq!(trackers[0].failures(), 1);
        assert!(!trackers[0].announcing);
    }

    #[tokio::test]
    async fn test_successful_announce_adopts_interval() {
        let mock = MockTracker::new(false, 900);
        let session = session_with_mocks(vec![mock.clone()]);

        session.broadcast_event(AnnounceEvent::None).await;

        let trackers = session.trackers.lock().await;
        assert_eq!(trackers[0].failures(), 0);
        assert_eq!(trackers[0].interval, Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_best_effort() {
        init_test_logging();
        let mock = MockTracker::new(true, 0);
        let session = session_with_mocks(vec![mock.clone()]);

        session.stop().await;
        assert_eq!(session.status().await, SessionStatus::Stopped);
        // The stopped broadcast went out even though the tracker failed.
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);

        session.stop().await;
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let session = session_with_mocks(vec![MockTracker::new(false, 1800)]);

        session.pause().await;
        assert_eq!(session.status().await, SessionStatus::Paused);

        session.resume().await;
        assert_eq!(session.status().await, SessionStatus::InProgress);
    }

    #[tokio::test]
    async fn test_build_announce_params_reads_counters_under_lock() {
        let session = session_with_mocks(vec![MockTracker::new(false, 1800)]);
        {
            let mut transfer = session.transfer.lock().await;
            transfer.downloaded = 1500;
            transfer.uploaded = 300;
        }

        let params = session.build_announce_params(AnnounceEvent::None).await;
        assert_eq!(params.downloaded, 1500);
        assert_eq!(params.uploaded, 300);
        assert_eq!(params.left, 20000 - 1500);
        assert_eq!(params.info_hash, [5u8; 20]);
    }

    #[test]
    fn test_backoff_delays_match_failure_count() {
        let base = Duration::from_secs(30 * 60);
        let max = Duration::from_secs(4 * 60 * 60);
        let mut tracker =
            ManagedTracker::new(MockTracker::new(true, 0), base);

        assert_eq!(tracker.record_failure(max), base * 2);
        assert_eq!(tracker.record_failure(max), base * 3);
        assert_eq!(tracker.record_failure(max), base * 4);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let base = Duration::from_secs(30 * 60);
        let max = Duration::from_secs(4 * 60 * 60);
        let mut tracker =
            ManagedTracker::new(MockTracker::new(true, 0), base);

        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let delay = tracker.record_failure(max);
            assert!(delay >= last);
            assert!(delay <= max);
            last = delay;
        }
        assert_eq!(last, max);
    }

    #[test]
    fn test_success_resets_failures_and_clamps_zero_interval() {
        let default = Duration::from_secs(30 * 60);
        let max = Duration::from_secs(4 * 60 * 60);
        let mut tracker =
            ManagedTracker::new(MockTracker::new(false, 0), default);

        tracker.record_failure(max);
        tracker.record_failure(max);
        assert_eq!(tracker.failures(), 2);

        // Zero interval from the tracker falls back to the default.
        tracker.record_success(0, default, max);
        assert_eq!(tracker.failures(), 0);
        assert_eq!(tracker.interval, default);

        tracker.record_success(1800, default, max);
        assert_eq!(tracker.interval, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_connect_new_peers_skips_when_stopped() {
        let session = session_with_mocks(vec![MockTracker::new(false, 1800)]);
        session.transfer.lock().await.status = SessionStatus::Stopped;

        let peers = vec![TrackerPeer {
            ip: "127.0.0.1".parse().unwrap(),
            port: 1,
            id: None,
        }];
        session.connect_new_peers(peers).await;
        assert_eq!(session.peers.lock().await.len(), 0);
    }
}
