pub mod clock;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::{mpsc::Receiver, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlayerOptions;
use crate::error::LoadError;
use crate::events::{ChangeEvent, ControlInput};
use crate::model::ImageCollection;
use crate::store::{ChangeFeed, ImageStore, Subscription};
use crate::tasks::loader::CollectionLoader;
use state::{Phase, Presentation, RenderView};

type FetchResult = Result<ImageCollection, LoadError>;

/// Drives the slideshow until cancelled.
///
/// Rules:
/// - Load once on start, before any slideshow timer is armed.
/// - Every change-feed event is only a signal: the collection is re-fetched
///   and replaced wholesale, never patched from the payload.
/// - At most one fetch is in flight; events arriving meanwhile (and within the
///   debounce window) collapse into a single follow-up fetch.
/// - The advance timer and progress ticker run only while showing and not paused.
/// - The current view is published on `view_tx` after every step.
pub async fn run<S, F>(
    loader: Arc<CollectionLoader<S, F>>,
    mut control_rx: Receiver<ControlInput>,
    view_tx: watch::Sender<RenderView>,
    options: PlayerOptions,
    cancel: CancellationToken,
) -> Result<()>
where
    S: ImageStore,
    F: ChangeFeed,
{
    let mut presentation = Presentation::new(options.resume, Instant::now());
    view_tx.send_replace(presentation.view());

    let mut subscription = subscribe(&*loader);
    let mut fetches: JoinSet<FetchResult> = JoinSet::new();
    let mut refresh = RefreshGate::new(options.refresh_debounce);
    spawn_fetch(&mut fetches, &loader);

    let mut progress = interval(options.progress_interval);
    progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let generation = presentation.clock().generation();
        let advance = presentation.advance_timer();
        let refresh_at = if fetches.is_empty() {
            refresh.due()
        } else {
            None
        };

        select! {
            _ = cancel.cancelled() => break,

            Some(input) = control_rx.recv() => {
                debug!(?input, "control input");
                if input == ControlInput::Reload {
                    if subscription.is_none() {
                        subscription = subscribe(&*loader);
                    }
                    refresh.request_now(Instant::now());
                } else {
                    presentation.on_input(input, Instant::now());
                }
            }

            Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                let result = joined.unwrap_or_else(|err| {
                    Err(LoadError::FetchFailed(format!("fetch task failed: {err}")))
                });
                if let Some(change) = presentation.on_collection(result, Instant::now()) {
                    info!(
                        from = ?change.from,
                        to = ?change.to,
                        images = presentation.images().len(),
                        "presentation state changed"
                    );
                    if change.to == Phase::Error {
                        warn!(
                            error = presentation.last_error().unwrap_or_default(),
                            "showing fetch error"
                        );
                    }
                }
            }

            change = next_change(&mut subscription) => match change {
                Some(ChangeEvent { kind, image }) => {
                    debug!(?kind, ?image, "change feed event");
                    refresh.request(Instant::now());
                }
                None => {
                    warn!("change feed closed; keeping current collection");
                    subscription = None;
                }
            },

            _ = wait_until(refresh_at) => {
                refresh.clear();
                spawn_fetch(&mut fetches, &loader);
            }

            _ = wait_until(advance.map(|timer| timer.deadline)) => {
                if let Some(timer) = advance {
                    presentation.on_advance_due(timer.generation, Instant::now());
                }
            }

            _ = progress.tick(), if presentation.is_running() => {
                presentation.on_progress_tick(Instant::now());
            }
        }

        // Keep progress ticks aligned with the slide that just (re)started.
        if presentation.clock().generation() != generation {
            progress.reset();
        }
        publish(&view_tx, presentation.view());
    }

    fetches.abort_all();
    drop(subscription);
    info!("player stopped");
    Ok(())
}

fn subscribe<S, F>(loader: &CollectionLoader<S, F>) -> Option<Subscription>
where
    S: ImageStore,
    F: ChangeFeed,
{
    match loader.subscribe() {
        Ok(subscription) => Some(subscription),
        Err(err) => {
            warn!(error = %err, "continuing without live updates");
            None
        }
    }
}

fn spawn_fetch<S, F>(fetches: &mut JoinSet<FetchResult>, loader: &Arc<CollectionLoader<S, F>>)
where
    S: ImageStore,
    F: ChangeFeed,
{
    let loader = Arc::clone(loader);
    fetches.spawn(async move { loader.load().await });
}

async fn next_change(subscription: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn publish(view_tx: &watch::Sender<RenderView>, next: RenderView) {
    view_tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Coalesces refresh requests into a single deadline.
#[derive(Debug)]
struct RefreshGate {
    debounce: Duration,
    due: Option<Instant>,
}

impl RefreshGate {
    fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            due: None,
        }
    }

    fn request(&mut self, now: Instant) {
        if self.due.is_none() {
            self.due = Some(now + self.debounce);
        }
    }

    fn request_now(&mut self, now: Instant) {
        self.due = Some(now);
    }

    fn due(&self) -> Option<Instant> {
        self.due
    }

    fn clear(&mut self) {
        self.due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_requests_coalesce_into_first_deadline() {
        let t0 = Instant::now();
        let mut gate = RefreshGate::new(Duration::from_millis(100));
        gate.request(t0);
        gate.request(t0 + Duration::from_millis(60));
        assert_eq!(gate.due(), Some(t0 + Duration::from_millis(100)));

        gate.request_now(t0 + Duration::from_millis(70));
        assert_eq!(gate.due(), Some(t0 + Duration::from_millis(70)));

        gate.clear();
        assert_eq!(gate.due(), None);
    }
}
