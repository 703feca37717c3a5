use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// How often the background reaper scans for expired entries.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Share of the table dropped when an insert finds it at capacity.
const EVICT_DIVISOR: usize = 10;

#[derive(Clone, Debug)]
struct Entry {
    project: String,
    expires_at: Instant,
}

struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    max_size: usize,
    ttl: Duration,
    reaper_shutdown: mpsc::Sender<()>,
}

impl Inner {
    fn reap(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let reaped = before - entries.len();
        if reaped > 0 {
            tracing::debug!(reaped, remaining = entries.len(), "reaped expired route entries");
        }
    }
}

/// Per-instance first tier of the resolution cache: route key → project
/// id, bounded in both size and entry lifetime.
///
/// Expiry is checked on read, so an expired entry is already absent
/// before the background reaper removes it; the reaper only bounds
/// memory held by keys nobody reads anymore. When an insert finds the
/// table at capacity, an arbitrary tenth of the entries is dropped to
/// make room. That is a size release valve, not recency tracking.
///
/// Reads take a shared lock and proceed concurrently; writes and the
/// reaper take the exclusive lock. Nothing here touches I/O.
#[derive(Clone)]
pub struct LocalCache {
    inner: Arc<Inner>,
}

impl LocalCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self::with_reap_interval(max_size, ttl, REAP_INTERVAL)
    }

    /// Like [`new`](Self::new) with an injectable reaper interval, so
    /// tests can drive the reaper without waiting out the default.
    pub fn with_reap_interval(max_size: usize, ttl: Duration, reap_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let inner = Arc::new(Inner {
            entries: RwLock::new(HashMap::new()),
            max_size,
            ttl,
            reaper_shutdown: shutdown_tx,
        });

        tokio::spawn(run_reaper(
            Arc::downgrade(&inner),
            reap_interval,
            shutdown_rx,
        ));

        LocalCache { inner }
    }

    /// Look up a key. Absent and expired entries read the same; an
    /// expired entry is left in place for the reaper.
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.inner.entries.read();
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.project.clone())
    }

    /// Insert or replace the entry for `key` with a fresh lifetime.
    pub fn set(&self, key: &str, project: &str) {
        let mut entries = self.inner.entries.write();
        if entries.len() >= self.inner.max_size {
            let target = (self.inner.max_size / EVICT_DIVISOR).max(1);
            let victims: Vec<String> = entries.keys().take(target).cloned().collect();
            for victim in &victims {
                entries.remove(victim);
            }
            tracing::debug!(evicted = victims.len(), "local cache at capacity, purged entries");
        }
        entries.insert(
            key.to_string(),
            Entry {
                project: project.to_string(),
                expires_at: Instant::now() + self.inner.ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.inner.entries.write().remove(key);
    }

    /// Entry count, including entries that have expired but not yet been
    /// reaped.
    pub fn size(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn clear(&self) {
        *self.inner.entries.write() = HashMap::new();
    }

    /// Stop the background reaper. Entries already in the table stay
    /// readable until they expire; only the background cleanup ends.
    pub fn close(&self) {
        let _ = self.inner.reaper_shutdown.try_send(());
    }
}

/// Scans the table on a fixed interval, deleting expired entries. Holds
/// only a weak reference so a dropped cache ends its reaper too.
async fn run_reaper(inner: Weak<Inner>, interval: Duration, mut shutdown: mpsc::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; there is nothing to reap yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.reap();
            }
            _ = shutdown.recv() => break,
        }
    }
}
