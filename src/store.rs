//! Collaborators the player reads from: an image store and a change feed.

pub mod library;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::ChangeEvent;
use crate::model::{Image, OrgScope};

/// Source of the image records shown by the player.
#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Lists every image of the organization, newest first.
    async fn list_images(&self, scope: &OrgScope) -> Result<Vec<Image>>;
}

/// Push notifications about changes to an organization's images.
pub trait ChangeFeed: Send + Sync + 'static {
    fn subscribe(&self, scope: &OrgScope) -> Result<Subscription>;
}

/// Live change-feed registration. Dropping it unsubscribes.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    _registration: Box<dyn Send>,
}

impl Subscription {
    /// Wraps a receiver together with whatever keeps the source alive
    /// (a filesystem watcher, a forwarding task guard, ...).
    pub fn new(events: mpsc::Receiver<ChangeEvent>, registration: impl Send + 'static) -> Self {
        Self {
            events,
            _registration: Box::new(registration),
        }
    }

    /// Next change, or `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
