use thiserror::Error;

/// Failures surfaced by the collection loader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Listing images failed. Displayed verbatim on the player.
    #[error("{0}")]
    FetchFailed(String),

    /// The change feed could not be joined. Not fatal: the player keeps its
    /// last collection.
    #[error("change feed subscription failed: {0}")]
    Subscription(String),
}
