//! In-process image store and change feed.
//!
//! Mutations publish change events the way a hosted backend would, which makes
//! this the store of choice for driving the player in tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::select;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChangeFeed, ImageStore, Subscription};
use crate::events::{ChangeEvent, ChangeKind};
use crate::model::{Image, ImageCollection, ImageId, OrgScope};

const FEED_CAPACITY: usize = 64;

#[derive(Default)]
struct State {
    images: Vec<Image>,
    fetch_failure: Option<String>,
    subscribe_failure: Option<String>,
    latency: Duration,
    fetches: usize,
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
        }
    }

    pub fn with_images(images: impl IntoIterator<Item = Image>) -> Self {
        let store = Self::new();
        store.lock().images.extend(images);
        store
    }

    pub fn feed(&self) -> MemoryFeed {
        MemoryFeed {
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }

    pub fn insert(&self, image: Image) {
        let id = image.id.clone();
        {
            let mut state = self.lock();
            state.images.retain(|img| img.id != id);
            state.images.push(image);
        }
        self.publish(ChangeKind::Insert, Some(id));
    }

    /// Returns `false` when no image has the given id.
    pub fn update_duration(&self, id: &ImageId, duration: Duration) -> bool {
        let updated = {
            let mut state = self.lock();
            match state.images.iter_mut().find(|img| &img.id == id) {
                Some(img) => {
                    img.display_duration = duration;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.publish(ChangeKind::Update, Some(id.clone()));
        }
        updated
    }

    /// Returns `false` when no image has the given id.
    pub fn remove(&self, id: &ImageId) -> bool {
        let removed = {
            let mut state = self.lock();
            let before = state.images.len();
            state.images.retain(|img| &img.id != id);
            state.images.len() != before
        };
        if removed {
            self.publish(ChangeKind::Delete, Some(id.clone()));
        }
        removed
    }

    /// Publishes an event without touching the data, like a duplicated or
    /// reordered delivery from a real feed.
    pub fn publish(&self, kind: ChangeKind, image: Option<ImageId>) {
        // No subscribers is fine; nothing needs reconciling.
        let _ = self.events.send(ChangeEvent::new(kind, image));
    }

    /// Makes every following fetch fail with `message` until cleared.
    pub fn fail_fetches(&self, message: impl Into<String>) {
        self.lock().fetch_failure = Some(message.into());
    }

    pub fn clear_fetch_failure(&self) {
        self.lock().fetch_failure = None;
    }

    pub fn fail_subscriptions(&self, message: impl Into<String>) {
        self.lock().subscribe_failure = Some(message.into());
    }

    pub fn clear_subscription_failure(&self) {
        self.lock().subscribe_failure = None;
    }

    /// Delay applied to every fetch before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of `list_images` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn list_images(&self, scope: &OrgScope) -> Result<Vec<Image>> {
        let latency = {
            let mut state = self.lock();
            state.fetches += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let state = self.lock();
        if let Some(message) = &state.fetch_failure {
            bail!("{message}");
        }
        debug!(org = %scope, count = state.images.len(), "memory store listed images");
        let collection = ImageCollection::newest_first(state.images.clone());
        Ok(collection.iter().cloned().collect())
    }
}

#[derive(Clone)]
pub struct MemoryFeed {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed for MemoryFeed {
    fn subscribe(&self, scope: &OrgScope) -> Result<Subscription> {
        let failure = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe_failure
            .clone();
        if let Some(message) = failure {
            bail!("{message}");
        }

        let mut source = self.events.subscribe();
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let stop = CancellationToken::new();
        let guard = stop.clone().drop_guard();
        let org = scope.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = stop.cancelled() => break,
                    res = source.recv() => {
                        let event = match res {
                            Ok(event) => event,
                            // Something changed even if we missed the details.
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(org = %org, skipped, "memory feed lagged");
                                ChangeEvent::new(ChangeKind::Update, None)
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Subscription::new(rx, guard))
    }
}
