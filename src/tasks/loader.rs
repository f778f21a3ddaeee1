use tracing::{debug, info, instrument, warn};

use crate::error::LoadError;
use crate::model::{ImageCollection, OrgScope};
use crate::store::{ChangeFeed, ImageStore, Subscription};

/// Fetches an organization's image collection and joins its change feed.
///
/// Both collaborators are injected so the loader can run against any backend,
/// including the in-memory store used by tests.
pub struct CollectionLoader<S, F> {
    store: S,
    feed: F,
    scope: OrgScope,
}

impl<S, F> CollectionLoader<S, F>
where
    S: ImageStore,
    F: ChangeFeed,
{
    pub fn new(store: S, feed: F, scope: OrgScope) -> Self {
        Self { store, feed, scope }
    }

    pub fn scope(&self) -> &OrgScope {
        &self.scope
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Lists the full collection, newest first. No retries.
    #[instrument(skip(self), fields(org = %self.scope))]
    pub async fn load(&self) -> Result<ImageCollection, LoadError> {
        match self.store.list_images(&self.scope).await {
            Ok(images) => {
                let collection = ImageCollection::newest_first(images);
                debug!(count = collection.len(), "collection loaded");
                Ok(collection)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "collection fetch failed");
                Err(LoadError::FetchFailed(format!("{err:#}")))
            }
        }
    }

    #[instrument(skip(self), fields(org = %self.scope))]
    pub fn subscribe(&self) -> Result<Subscription, LoadError> {
        match self.feed.subscribe(&self.scope) {
            Ok(subscription) => {
                info!("subscribed to change feed");
                Ok(subscription)
            }
            Err(err) => Err(LoadError::Subscription(format!("{err:#}"))),
        }
    }
}
