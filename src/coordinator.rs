//! Shared polling of the temps document.
//!
//! One [`Coordinator`] per config entry fetches the floor/room tree on a fixed
//! interval and publishes it as an immutable [`Snapshot`]. Entities read the
//! published snapshot instead of issuing their own requests.
//!
//! - At most one fetch is in flight; concurrent [`Coordinator::refresh`] calls
//!   join it and observe the same snapshot or the same error.
//! - Publication is ordered by fetch tick; a result older than the published
//!   snapshot is discarded.
//! - A failed fetch leaves the published snapshot untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::client::{ContromeClient, DEFAULT_REQUEST_TIMEOUT};
use crate::config::DEFAULT_UPDATE_INTERVAL_SECS;
use crate::types::Snapshot;
use crate::{Error, Result};

type SnapshotCallback = Box<dyn Fn(&Snapshot) + Send + Sync>;
type RefreshOutcome = std::result::Result<Arc<Snapshot>, Arc<Error>>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

pub struct CoordinatorBuilder {
    client: ContromeClient,
    house_id: String,
    update_interval: Duration,
    refresh_timeout: Duration,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl CoordinatorBuilder {
    pub fn new(client: ContromeClient, house_id: impl Into<String>) -> Self {
        Self {
            client,
            house_id: house_id.into(),
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
            refresh_timeout: DEFAULT_REQUEST_TIMEOUT,
            snapshot_callbacks: Vec::new(),
        }
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Deadline for one fetch, after which it is abandoned and reported as
    /// [`Error::Timeout`].
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Called with every newly published snapshot.
    pub fn on_snapshot(mut self, f: impl Fn(&Snapshot) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> Coordinator {
        let update_interval = if self.update_interval.is_zero() {
            warn!("update interval of zero requested, using default");
            Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS)
        } else {
            self.update_interval
        };
        let (published, _) = watch::channel(None);

        Coordinator {
            inner: Arc::new(Inner {
                client: self.client,
                house_id: self.house_id,
                update_interval,
                refresh_timeout: self.refresh_timeout,
                issued_ticks: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                published,
                last_error: Mutex::new(None),
                snapshot_callbacks: self.snapshot_callbacks,
                scheduler: Mutex::new(None),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    client: ContromeClient,
    house_id: String,
    update_interval: Duration,
    refresh_timeout: Duration,
    issued_ticks: AtomicU64,
    in_flight: Mutex<Option<(u64, SharedRefresh)>>,
    published: watch::Sender<Option<Arc<Snapshot>>>,
    last_error: Mutex<Option<Arc<Error>>>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn builder(client: ContromeClient, house_id: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(client, house_id)
    }

    pub fn client(&self) -> &ContromeClient {
        &self.inner.client
    }

    pub fn house_id(&self) -> &str {
        &self.inner.house_id
    }

    pub fn update_interval(&self) -> Duration {
        self.inner.update_interval
    }

    /// The most recently published snapshot, if any fetch has succeeded yet.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.published.borrow().clone()
    }

    /// Receiver that is marked changed whenever a newer snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.inner.published.subscribe()
    }

    /// Error of the last refresh, cleared by the next successful one.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        lock(&self.inner.last_error).clone()
    }

    /// Tick of the most recently started fetch. Any snapshot with a greater
    /// tick was requested after this call.
    pub fn issued_tick(&self) -> u64 {
        self.inner.issued_ticks.load(Ordering::SeqCst)
    }

    /// Fetch now, or join the fetch already in flight.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
        let flight = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some((tick, flight)) => {
                    trace!(tick, "joining in-flight refresh");
                    flight.clone()
                }
                None => {
                    let tick = self.inner.issued_ticks.fetch_add(1, Ordering::SeqCst) + 1;
                    let flight = Inner::run(self.inner.clone(), tick).boxed().shared();
                    *slot = Some((tick, flight.clone()));
                    flight
                }
            }
        };
        flight.await.map_err(Error::Fetch)
    }

    /// Fire-and-forget refresh. Joins an in-flight fetch and leaves the
    /// schedule untouched.
    pub fn request_refresh(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.refresh().await {
                debug!(error = %e, "requested refresh failed");
            }
        });
    }

    /// Start the periodic refresh task. The first scheduled refresh happens one
    /// interval from now; missed ticks are skipped rather than bunched up.
    pub fn start(&self) {
        let mut scheduler = lock(&self.inner.scheduler);
        if scheduler.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.update_interval;
        info!(house_id = %self.inner.house_id, ?period, "starting refresh schedule");
        *scheduler = Some(tokio::spawn(run_schedule(weak, period)));
    }

    pub fn stop(&self) {
        if let Some(handle) = lock(&self.inner.scheduler).take() {
            handle.abort();
            debug!(house_id = %self.inner.house_id, "refresh schedule stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.scheduler)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

async fn run_schedule(inner: Weak<Inner>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let coordinator = Coordinator { inner };
        if let Err(e) = coordinator.refresh().await {
            debug!(error = %e, "scheduled refresh failed, keeping previous snapshot");
        }
    }
}

impl Inner {
    async fn run(inner: Arc<Inner>, tick: u64) -> RefreshOutcome {
        let fetched = tokio::time::timeout(
            inner.refresh_timeout,
            inner.client.fetch_temps(&inner.house_id),
        )
        .await;

        {
            let mut slot = lock(&inner.in_flight);
            if matches!(slot.as_ref(), Some((t, _)) if *t == tick) {
                *slot = None;
            }
        }

        let result = match fetched {
            Ok(Ok(floors)) => Ok(Snapshot::new(tick, floors)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout),
        };

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                inner.publish(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                warn!(house_id = %inner.house_id, tick, error = %e, "refresh failed");
                let e = Arc::new(e);
                *lock(&inner.last_error) = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Replace the published snapshot unless a newer one is already out.
    fn publish(&self, snapshot: Arc<Snapshot>) -> bool {
        let accepted = self.published.send_if_modified(|current| {
            let newer = current.as_ref().is_none_or(|c| snapshot.tick > c.tick);
            if newer {
                *current = Some(snapshot.clone());
            }
            newer
        });

        if !accepted {
            debug!(tick = snapshot.tick, "discarding snapshot older than the published one");
            return false;
        }

        *lock(&self.last_error) = None;
        trace!(tick = snapshot.tick, floors = snapshot.floors.len(), "published snapshot");
        for cb in &self.snapshot_callbacks {
            cb(&snapshot);
        }
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.scheduler).take() {
            handle.abort();
        }
    }
}

/// A poisoned lock only means a snapshot callback panicked; the guarded data
/// is still consistent.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
