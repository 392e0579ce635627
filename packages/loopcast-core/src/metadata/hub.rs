use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{TitleSource, TrackInfo};
use crate::events::{EventEmitter, MetadataEvent};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::utils::now_millis;

/// Holder of the current track info.
///
/// Cheap to clone; all clones share state. Titles arrive either from the
/// configured [`TitleSource`] (polled only while subscriptions exist) or via
/// [`publish`](Self::publish).
#[derive(Clone)]
pub struct TrackInfoHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    tx: watch::Sender<TrackInfo>,
    source: Option<Arc<dyn TitleSource>>,
    poll_interval: Duration,
    spawner: TokioSpawner,
    emitter: Arc<dyn EventEmitter>,
    poller: Mutex<PollerState>,
}

#[derive(Default)]
struct PollerState {
    subscribers: usize,
    token: Option<CancellationToken>,
}

impl TrackInfoHub {
    /// Creates a hub. With `source == None` titles only change through
    /// [`publish`](Self::publish).
    pub fn new(
        source: Option<Arc<dyn TitleSource>>,
        poll_interval: Duration,
        spawner: TokioSpawner,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let (tx, _) = watch::channel(TrackInfo::default());
        Self {
            inner: Arc::new(HubInner {
                tx,
                source,
                poll_interval,
                spawner,
                emitter,
                poller: Mutex::new(PollerState::default()),
            }),
        }
    }

    /// Snapshot of the current track info.
    #[must_use]
    pub fn current(&self) -> TrackInfo {
        self.inner.tx.borrow().clone()
    }

    /// Replaces the current track info. Returns whether it changed.
    pub fn publish(&self, info: TrackInfo) -> bool {
        self.inner.publish(info)
    }

    /// Parses `title` and publishes it.
    pub fn set_title(&self, title: &str) -> TrackInfo {
        let info = TrackInfo::from_title(title);
        self.inner.publish(info.clone());
        info
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.poller.lock().subscribers
    }

    /// Whether the title source is currently being polled.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.poller.lock().token.is_some()
    }

    /// Registers interest in track changes.
    ///
    /// The first subscription starts polling the title source; dropping or
    /// cancelling the last one stops it.
    pub fn subscribe(&self) -> TrackSubscription {
        let rx = self.inner.tx.subscribe();
        {
            let mut poller = self.inner.poller.lock();
            poller.subscribers += 1;
            if poller.subscribers == 1 {
                poller.token = self.inner.start_polling();
            }
        }

        TrackSubscription {
            rx,
            token: CancellationToken::new(),
            hub: Arc::clone(&self.inner),
            released: false,
        }
    }

    /// Stops polling regardless of subscribers. Existing subscriptions keep
    /// the last value.
    pub fn shutdown(&self) {
        if let Some(token) = self.inner.poller.lock().token.take() {
            token.cancel();
        }
    }
}

impl HubInner {
    fn publish(&self, info: TrackInfo) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == info {
                false
            } else {
                *current = info.clone();
                true
            }
        });

        if changed {
            log::info!("[Metadata] Now playing: {}", info.full_title);
            self.emitter.emit_metadata(MetadataEvent::TrackChanged {
                full_title: info.full_title,
                artist: info.artist,
                track: info.track,
                timestamp: now_millis(),
            });
        }
        changed
    }

    /// Spawns the poll task if there's a source. Called with the poller lock held.
    fn start_polling(self: &Arc<Self>) -> Option<CancellationToken> {
        let source = self.source.clone()?;
        let token = CancellationToken::new();
        let hub = Arc::clone(self);
        let task_token = token.clone();

        log::debug!(
            "[Metadata] Polling title source every {:?}",
            self.poll_interval
        );
        self.spawner
            .spawn(async move { poll_loop(hub, source, task_token).await });
        Some(token)
    }

    fn release(&self) {
        let mut poller = self.poller.lock();
        poller.subscribers = poller.subscribers.saturating_sub(1);
        if poller.subscribers == 0 {
            if let Some(token) = poller.token.take() {
                log::debug!("[Metadata] Last subscriber gone, stopping poll");
                token.cancel();
            }
        }
    }
}

async fn poll_loop(hub: Arc<HubInner>, source: Arc<dyn TitleSource>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(hub.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let title = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            title = source.poll_title() => title,
        };

        let info = match title {
            Some(title) => TrackInfo::from_title(&title),
            None => TrackInfo::unavailable(),
        };
        hub.publish(info);
    }
}

/// A live interest in track changes.
///
/// Carries its own [`CancellationToken`]; cancelling it (or dropping the
/// subscription) releases the hub's poller once no other subscriptions
/// remain.
pub struct TrackSubscription {
    rx: watch::Receiver<TrackInfo>,
    token: CancellationToken,
    hub: Arc<HubInner>,
    released: bool,
}

impl TrackSubscription {
    /// The latest value, without marking it seen.
    #[must_use]
    pub fn current(&self) -> TrackInfo {
        self.rx.borrow().clone()
    }

    /// Returns the new value if it changed since the last call.
    pub fn take_update(&mut self) -> Option<TrackInfo> {
        if self.token.is_cancelled() {
            return None;
        }
        match self.rx.has_changed() {
            Ok(true) => Some(self.rx.borrow_and_update().clone()),
            _ => None,
        }
    }

    /// Waits for the next change. `None` once the subscription is cancelled.
    pub async fn changed(&mut self) -> Option<TrackInfo> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            res = self.rx.changed() => match res {
                Ok(()) => Some(self.rx.borrow_and_update().clone()),
                Err(_) => None,
            },
        }
    }

    /// Token that fires when this subscription is cancelled.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Ends the subscription. Idempotent.
    pub fn cancel(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.token.cancel();
        self.hub.release();
    }
}

impl Drop for TrackSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
