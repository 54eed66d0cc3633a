//! Debounced, tokenized view-extent notifications

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::projection;
use crate::protocol::Event;
use crate::render::Viewport;

/// Geographic snapshot of a viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewExtent {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
    pub zoom: f64,
    pub resolution: f64,
}

impl ViewExtent {
    pub fn from_viewport(viewport: &Viewport) -> Self {
        let e = &viewport.extent;
        let (lon_min, lat_min) = projection::xy_to_lonlat(e.min_x, e.min_y);
        let (lon_max, lat_max) = projection::xy_to_lonlat(e.max_x, e.max_y);
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
            zoom: projection::zoom_for_resolution(viewport.resolution),
            resolution: viewport.resolution,
        }
    }

    fn into_event(self, token: u64, seq: u64) -> Event {
        Event::ViewExtentChanged {
            lon_min: self.lon_min,
            lat_min: self.lat_min,
            lon_max: self.lon_max,
            lat_max: self.lat_max,
            zoom: self.zoom,
            resolution: self.resolution,
            token,
            seq,
        }
    }
}

/// State shared with the pending timer task
#[derive(Debug, Default)]
struct Shared {
    seq: AtomicU64,
    /// Bumped on every enable, disable and reschedule; a timer only fires if
    /// the epoch it captured is still current
    epoch: AtomicU64,
}

/// Emits a view snapshot once the view has been still for the debounce period.
///
/// Holds at most one pending timer; new motion replaces it. Without a Tokio
/// runtime the watcher emits synchronously instead of debouncing.
#[derive(Debug)]
pub struct ExtentWatcher {
    events: UnboundedSender<Event>,
    debounce: Duration,
    enabled: bool,
    token: u64,
    latest: Option<Viewport>,
    pending: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl ExtentWatcher {
    pub fn new(events: UnboundedSender<Event>, debounce: Duration) -> Self {
        Self {
            events,
            debounce,
            enabled: false,
            token: 0,
            latest: None,
            pending: None,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Number of snapshots emitted so far
    pub fn seq(&self) -> u64 {
        self.shared.seq.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start watching under `token`, emitting the current view right away
    pub fn enable(&mut self, token: u64, debounce: Option<Duration>) {
        self.cancel();
        self.enabled = true;
        self.token = token;
        if let Some(debounce) = debounce {
            self.debounce = debounce;
        }
        debug!("Extent watch enabled with token {}", token);
        if let Some(viewport) = self.latest {
            emit(&self.events, &self.shared, token, ViewExtent::from_viewport(&viewport));
        }
    }

    pub fn disable(&mut self) {
        self.cancel();
        self.enabled = false;
        debug!("Extent watch disabled");
    }

    /// Record a view change and restart the debounce timer
    pub fn view_changed(&mut self, viewport: Viewport) {
        self.latest = Some(viewport);
        if !self.enabled {
            return;
        }
        self.cancel();
        let extent = ViewExtent::from_viewport(&viewport);
        let token = self.token;

        let Ok(handle) = Handle::try_current() else {
            emit(&self.events, &self.shared, token, extent);
            return;
        };
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let debounce = self.debounce;
        self.pending = Some(handle.spawn(async move {
            tokio::time::sleep(debounce).await;
            if shared.epoch.load(Ordering::SeqCst) == epoch {
                emit(&events, &shared, token, extent);
            }
        }));
    }

    /// Drop the pending timer, if any
    pub fn cancel(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for ExtentWatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn emit(events: &UnboundedSender<Event>, shared: &Shared, token: u64, extent: ViewExtent) {
    let seq = shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
    counter!("fastpoints_extent_events_total").increment(1);
    debug!("Emitting view extent token={} seq={}", token, seq);
    if events.send(extent.into_event(token, seq)).is_err() {
        warn!("Event receiver dropped, view extent not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Extent;
    use tokio::sync::mpsc;

    fn viewport(offset: f64) -> Viewport {
        Viewport::new(
            Extent::new(offset, 0.0, offset + 1000.0, 1000.0),
            [100, 100],
        )
    }

    fn seq_of(event: &Event) -> u64 {
        match event {
            Event::ViewExtentChanged { seq, .. } => *seq,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_collapse_into_one_emission() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = ExtentWatcher::new(tx, Duration::from_millis(150));
        watcher.enable(1, None);
        assert!(rx.try_recv().is_err(), "no viewport known yet");

        for i in 0..5 {
            watcher.view_changed(viewport(i as f64 * 10.0));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let event = rx.try_recv().expect("debounced emission");
        assert_eq!(seq_of(&event), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_emits_immediately_with_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = ExtentWatcher::new(tx, Duration::from_millis(150));
        watcher.view_changed(viewport(0.0));
        watcher.enable(42, None);
        match rx.try_recv().expect("immediate emission") {
            Event::ViewExtentChanged { token, seq, .. } => {
                assert_eq!(token, 42);
                assert_eq!(seq, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_drops_pending_emission() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = ExtentWatcher::new(tx, Duration::from_millis(100));
        watcher.enable(1, None);
        watcher.view_changed(viewport(0.0));
        watcher.disable();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(watcher.seq(), 0);
    }

    #[test]
    fn test_without_runtime_emits_synchronously() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = ExtentWatcher::new(tx, Duration::from_millis(100));
        watcher.enable(3, None);
        watcher.view_changed(viewport(0.0));
        watcher.view_changed(viewport(5.0));
        assert_eq!(seq_of(&rx.try_recv().unwrap()), 1);
        assert_eq!(seq_of(&rx.try_recv().unwrap()), 2);
    }

    #[test]
    fn test_view_extent_reports_zoom() {
        let extent = ViewExtent::from_viewport(&Viewport::new(
            Extent::new(-1000.0, -1000.0, 1000.0, 1000.0),
            [200, 200],
        ));
        assert_eq!(extent.resolution, 10.0);
        assert!(extent.lon_min < 0.0 && extent.lon_max > 0.0);
        assert!((extent.zoom - projection::zoom_for_resolution(10.0)).abs() < 1e-12);
    }
}
