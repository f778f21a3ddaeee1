use tokio::time::Instant;
use tracing::debug;

use super::clock::{AdvanceTimer, SlideshowClock};
use crate::config::ResumePolicy;
use crate::error::LoadError;
use crate::events::ControlInput;
use crate::model::{Image, ImageCollection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Error,
    Empty,
    Showing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: Phase,
    pub to: Phase,
}

/// What the UI shell should draw.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderView {
    Loading,
    Error { message: String },
    Empty,
    Showing(SlideView),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlideView {
    pub image: Image,
    /// 1-based position for the counter.
    pub position: usize,
    pub total: usize,
    pub paused: bool,
    pub progress_pct: f32,
}

impl RenderView {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Loading => Phase::Loading,
            Self::Error { .. } => Phase::Error,
            Self::Empty => Phase::Empty,
            Self::Showing(_) => Phase::Showing,
        }
    }
}

/// Reconciles the loaded collection with the running clock.
///
/// The collection is replaced wholesale on every load; the clock's index is
/// rebased in the same step so a view never points past the end.
pub struct Presentation {
    phase: Phase,
    images: ImageCollection,
    clock: SlideshowClock,
    last_error: Option<String>,
}

impl Presentation {
    pub fn new(resume: ResumePolicy, now: Instant) -> Self {
        Self {
            phase: Phase::Loading,
            images: ImageCollection::default(),
            clock: SlideshowClock::new(resume, now),
            last_error: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn images(&self) -> &ImageCollection {
        &self.images
    }

    pub fn clock(&self) -> &SlideshowClock {
        &self.clock
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn advance_timer(&self) -> Option<AdvanceTimer> {
        self.clock.advance_timer()
    }

    /// Whether the progress ticker should run.
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Showing && self.clock.is_running()
    }

    /// Applies the outcome of a fetch.
    pub fn on_collection(
        &mut self,
        result: Result<ImageCollection, LoadError>,
        now: Instant,
    ) -> Option<PhaseChange> {
        let images = match result {
            Ok(images) => images,
            Err(err) => {
                self.images = ImageCollection::default();
                self.clock.stop();
                self.last_error = Some(err.to_string());
                return self.goto(Phase::Error);
            }
        };

        if images.is_empty() {
            self.images = images;
            self.clock.stop();
            return self.goto(Phase::Empty);
        }

        if self.phase == Phase::Showing {
            self.rebase(images, now);
            return None;
        }

        self.images = images;
        self.clock.seek(0, &self.images, now);
        self.goto(Phase::Showing)
    }

    /// Applies a control input. Returns whether the view may have changed.
    /// `Reload` is handled by the runtime, not here.
    pub fn on_input(&mut self, input: ControlInput, now: Instant) -> bool {
        match input {
            ControlInput::TogglePause => {
                self.clock.toggle_pause(&self.images, now);
                true
            }
            ControlInput::Advance if self.phase == Phase::Showing => {
                self.clock.advance(&self.images, now)
            }
            ControlInput::Retreat if self.phase == Phase::Showing => {
                self.clock.retreat(&self.images, now)
            }
            _ => false,
        }
    }

    pub fn on_advance_due(&mut self, generation: u64, now: Instant) -> bool {
        if self.phase != Phase::Showing {
            return false;
        }
        let advanced = self.clock.fire(generation, &self.images, now);
        if advanced {
            debug!(
                index = self.clock.index(),
                total = self.images.len(),
                "slide advanced"
            );
        }
        advanced
    }

    pub fn on_progress_tick(&mut self, now: Instant) -> bool {
        self.phase == Phase::Showing && self.clock.tick_progress(&self.images, now)
    }

    pub fn view(&self) -> RenderView {
        match self.phase {
            Phase::Loading => RenderView::Loading,
            Phase::Error => RenderView::Error {
                message: self.last_error.clone().unwrap_or_default(),
            },
            Phase::Empty => RenderView::Empty,
            Phase::Showing => match self.images.get(self.clock.index()) {
                Some(image) => RenderView::Showing(SlideView {
                    image: image.clone(),
                    position: self.clock.index() + 1,
                    total: self.images.len(),
                    paused: self.clock.is_paused(),
                    progress_pct: self.clock.progress_pct(),
                }),
                None => RenderView::Empty,
            },
        }
    }

    /// Replaces the collection while showing. The index is kept unless it
    /// falls off the end; timing restarts only when the visible slide or its
    /// duration actually changed.
    fn rebase(&mut self, images: ImageCollection, now: Instant) {
        let previous_index = self.clock.index();
        let previous = self
            .images
            .get(previous_index)
            .map(|img| (img.id.clone(), img.display_duration));
        self.images = images;

        let index = previous_index.min(self.images.len() - 1);
        let unchanged = index == previous_index
            && match (&previous, self.images.get(index)) {
                (Some((id, duration)), Some(current)) => {
                    *id == current.id && *duration == current.display_duration
                }
                _ => false,
            };
        if unchanged {
            debug!(index, total = self.images.len(), "collection rebased; slide kept");
        } else {
            debug!(
                from = previous_index,
                to = index,
                total = self.images.len(),
                "collection rebased; slide restarted"
            );
            self.clock.seek(index, &self.images, now);
        }
    }

    fn goto(&mut self, to: Phase) -> Option<PhaseChange> {
        if to != Phase::Error {
            self.last_error = None;
        }
        if self.phase == to {
            return None;
        }
        let ch = PhaseChange {
            from: self.phase,
            to,
        };
        self.phase = to;
        Some(ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageId;
    use chrono::{TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::Duration;

    fn image(id: &str, duration_ms: u64, created: i64) -> Image {
        Image::new(
            id,
            format!("file:///{id}.jpg"),
            Duration::from_millis(duration_ms),
            Utc.timestamp_opt(created, 0).unwrap(),
        )
    }

    fn ok(images: Vec<Image>) -> Result<ImageCollection, LoadError> {
        Ok(ImageCollection::newest_first(images))
    }

    fn showing(view: &RenderView) -> &SlideView {
        match view {
            RenderView::Showing(slide) => slide,
            other => panic!("expected showing, got {other:?}"),
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn loading_to_error_keeps_message_verbatim() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        assert_eq!(p.view(), RenderView::Loading);
        let ch = p
            .on_collection(Err(LoadError::FetchFailed("backend down".into())), t0)
            .unwrap();
        assert_eq!((ch.from, ch.to), (Phase::Loading, Phase::Error));
        assert_eq!(
            p.view(),
            RenderView::Error {
                message: "backend down".into()
            }
        );
        assert!(!p.is_running());
    }

    #[test]
    fn empty_load_starts_no_timers() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        let ch = p.on_collection(ok(vec![]), t0).unwrap();
        assert_eq!(ch.to, Phase::Empty);
        assert!(p.advance_timer().is_none());
        assert!(!p.on_advance_due(0, t0 + ms(60_000)));
        assert_eq!(p.view(), RenderView::Empty);
    }

    #[test]
    fn first_load_shows_newest_image() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        let ch = p
            .on_collection(ok(vec![image("old", 1000, 1), image("new", 2000, 2)]), t0)
            .unwrap();
        assert_eq!(ch.to, Phase::Showing);
        let view = p.view();
        let slide = showing(&view);
        assert_eq!(slide.image.id, ImageId::new("new"));
        assert_eq!((slide.position, slide.total), (1, 2));
        assert_eq!(p.advance_timer().unwrap().deadline, t0 + ms(2000));
    }

    #[test]
    fn deleting_current_slide_keeps_display_alive() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![image("a", 1000, 2), image("b", 4000, 1)]), t0);
        assert_eq!(p.clock().index(), 0);

        let t1 = t0 + ms(500);
        assert!(p.on_collection(ok(vec![image("b", 4000, 1)]), t1).is_none());
        let view = p.view();
        let slide = showing(&view);
        assert_eq!(slide.image.id, ImageId::new("b"));
        assert_eq!((slide.position, slide.total), (1, 1));
        assert_eq!(slide.progress_pct, 0.0);
        assert_eq!(p.advance_timer().unwrap().deadline, t1 + ms(4000));
    }

    #[test]
    fn shrinking_below_index_clamps_to_last() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(
            ok(vec![image("a", 1000, 3), image("b", 1000, 2), image("c", 1000, 1)]),
            t0,
        );
        p.on_input(ControlInput::Retreat, t0);
        assert_eq!(p.clock().index(), 2);

        p.on_collection(ok(vec![image("a", 1000, 3), image("b", 1000, 2)]), t0);
        assert_eq!(p.clock().index(), 1);
        let view = p.view();
        assert_eq!(showing(&view).total, 2);
    }

    #[test]
    fn deleting_only_image_empties_and_stops_timers() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![image("solo", 1000, 1)]), t0);
        let timer = p.advance_timer().unwrap();

        let ch = p.on_collection(ok(vec![]), t0 + ms(300)).unwrap();
        assert_eq!((ch.from, ch.to), (Phase::Showing, Phase::Empty));
        assert!(!p.is_running());
        assert!(!p.on_advance_due(timer.generation, t0 + ms(1000)));
        assert_eq!(p.view(), RenderView::Empty);
    }

    #[test]
    fn empty_to_showing_starts_at_first_slide() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![]), t0);
        let ch = p
            .on_collection(ok(vec![image("a", 1000, 2), image("b", 1000, 1)]), t0)
            .unwrap();
        assert_eq!((ch.from, ch.to), (Phase::Empty, Phase::Showing));
        assert_eq!(p.clock().index(), 0);
        assert!(p.is_running());
    }

    #[test]
    fn unrelated_insert_does_not_restart_current_slide() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![image("a", 1000, 3), image("b", 2000, 2)]), t0);
        p.on_input(ControlInput::Advance, t0);
        let before = p.advance_timer().unwrap();

        // An older image lands after the current slot; "b" stays at index 1.
        p.on_collection(
            ok(vec![image("a", 1000, 3), image("b", 2000, 2), image("z", 1000, 1)]),
            t0 + ms(700),
        );
        assert_eq!(p.advance_timer(), Some(before));
        let view = p.view();
        assert_eq!(showing(&view).total, 3);
    }

    #[test]
    fn editing_current_duration_takes_effect_immediately() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![image("a", 10_000, 1)]), t0);

        let t1 = t0 + ms(1000);
        p.on_collection(ok(vec![image("a", 2000, 1)]), t1);
        assert_eq!(p.advance_timer().unwrap().deadline, t1 + ms(2000));
    }

    #[test]
    fn reload_failure_from_showing_goes_to_error_then_recovers() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![image("a", 1000, 2), image("b", 1000, 1)]), t0);
        p.on_input(ControlInput::Advance, t0);

        let ch = p
            .on_collection(Err(LoadError::FetchFailed("timeout".into())), t0)
            .unwrap();
        assert_eq!((ch.from, ch.to), (Phase::Showing, Phase::Error));
        assert_eq!(p.last_error(), Some("timeout"));
        assert!(p.advance_timer().is_none());

        p.on_collection(ok(vec![image("a", 1000, 2), image("b", 1000, 1)]), t0);
        assert_eq!(p.phase(), Phase::Showing);
        assert_eq!(p.clock().index(), 0);
        assert!(p.last_error().is_none());
    }

    #[test]
    fn pause_is_reported_in_view() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![image("a", 1000, 1)]), t0);
        p.on_input(ControlInput::TogglePause, t0 + ms(100));
        let view = p.view();
        assert!(showing(&view).paused);
        assert!(!p.is_running());
    }

    #[test]
    fn pause_set_before_showing_carries_into_first_slide() {
        let t0 = Instant::now();
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![]), t0);
        assert_eq!(p.view().phase(), Phase::Empty);
        assert!(p.on_input(ControlInput::TogglePause, t0));

        let ch = p
            .on_collection(ok(vec![image("a", 1000, 1)]), t0 + ms(200))
            .unwrap();
        assert_eq!((ch.from, ch.to), (Phase::Empty, Phase::Showing));
        let view = p.view();
        assert!(showing(&view).paused);
        assert_eq!(showing(&view).progress_pct, 0.0);
        assert!(p.advance_timer().is_none());
        assert!(!p.is_running());

        let resumed_at = t0 + ms(5000);
        p.on_input(ControlInput::TogglePause, resumed_at);
        assert_eq!(p.advance_timer().unwrap().deadline, resumed_at + ms(1000));
        assert!(p.is_running());
    }

    #[test]
    fn random_mutations_never_render_out_of_bounds() {
        let mut rng = StdRng::seed_from_u64(0x5EED_CAFE);
        let t0 = Instant::now();
        let mut now = t0;
        let mut p = Presentation::new(ResumePolicy::Restart, t0);
        p.on_collection(ok(vec![]), t0);
        let mut images: Vec<Image> = Vec::new();
        let mut next_id = 0i64;

        for _ in 0..2_000 {
            match rng.random_range(0..6) {
                0 | 1 => {
                    next_id += 1;
                    let created = rng.random_range(0..1_000);
                    images.push(image(
                        &format!("img-{next_id}"),
                        rng.random_range(1..5_000),
                        created,
                    ));
                    p.on_collection(ok(images.clone()), now);
                }
                2 if !images.is_empty() => {
                    let victim = rng.random_range(0..images.len());
                    images.remove(victim);
                    p.on_collection(ok(images.clone()), now);
                }
                3 => {
                    now += ms(rng.random_range(0..3_000));
                    if let Some(timer) = p.advance_timer() {
                        if now >= timer.deadline {
                            p.on_advance_due(timer.generation, now);
                        }
                    }
                    p.on_progress_tick(now);
                }
                4 => {
                    let input = match rng.random_range(0..3) {
                        0 => ControlInput::Advance,
                        1 => ControlInput::Retreat,
                        _ => ControlInput::TogglePause,
                    };
                    p.on_input(input, now);
                }
                _ => {}
            }

            match p.view() {
                RenderView::Showing(slide) => {
                    assert!(slide.position >= 1 && slide.position <= slide.total);
                    assert_eq!(slide.total, images.len());
                    assert!((0.0..=100.0).contains(&slide.progress_pct));
                }
                RenderView::Empty => assert!(images.is_empty()),
                other => panic!("unexpected view {other:?}"),
            }
            assert!(p.clock().index() < images.len().max(1));
        }
    }
}
