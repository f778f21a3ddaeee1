use std::time::Duration;

use tokio::time::Instant;

use crate::config::ResumePolicy;
use crate::model::ImageCollection;

/// Guards against a zero duration turning the advance timer into a spin.
const MIN_SLIDE_DURATION: Duration = Duration::from_millis(1);

/// The armed auto-advance. Firing is only honoured while `generation`
/// still matches the clock's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceTimer {
    pub deadline: Instant,
    pub generation: u64,
}

/// Slide index, pause state and per-slide timing.
///
/// The clock reads the collection (length and the current slide's duration)
/// but never owns or mutates it. Every index change rearms the advance timer
/// in the same call, so no timer is ever armed for a stale slide.
#[derive(Debug)]
pub struct SlideshowClock {
    index: usize,
    paused: bool,
    resume: ResumePolicy,
    slide_started: Instant,
    paused_elapsed: Duration,
    progress_pct: f32,
    advance: Option<AdvanceTimer>,
    generation: u64,
}

impl SlideshowClock {
    pub fn new(resume: ResumePolicy, now: Instant) -> Self {
        Self {
            index: 0,
            paused: false,
            resume,
            slide_started: now,
            paused_elapsed: Duration::ZERO,
            progress_pct: 0.0,
            advance: None,
            generation: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn progress_pct(&self) -> f32 {
        self.progress_pct
    }

    pub fn advance_timer(&self) -> Option<AdvanceTimer> {
        self.advance
    }

    /// True while both the advance timer and the progress ticker should run.
    pub fn is_running(&self) -> bool {
        self.advance.is_some()
    }

    /// Bumped whenever timing restarts or stops.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Moves to the next slide, wrapping. No-op on an empty collection.
    pub fn advance(&mut self, images: &ImageCollection, now: Instant) -> bool {
        let len = images.len();
        if len == 0 {
            return false;
        }
        self.index = (self.index.min(len - 1) + 1) % len;
        self.restart(images, now);
        true
    }

    /// Moves to the previous slide, wrapping. No-op on an empty collection.
    pub fn retreat(&mut self, images: &ImageCollection, now: Instant) -> bool {
        let len = images.len();
        if len == 0 {
            return false;
        }
        self.index = (self.index.min(len - 1) + len - 1) % len;
        self.restart(images, now);
        true
    }

    /// Flips pause. Pausing freezes both timers; resuming rearms according
    /// to the resume policy. Returns the new pause state.
    pub fn toggle_pause(&mut self, images: &ImageCollection, now: Instant) -> bool {
        if self.paused {
            self.paused = false;
            match self.resume {
                ResumePolicy::Restart => self.restart(images, now),
                ResumePolicy::Continue => {
                    let elapsed = self.paused_elapsed;
                    self.restart(images, now);
                    self.slide_started = now.checked_sub(elapsed).unwrap_or(now);
                    if let (Some(timer), Some(duration)) =
                        (self.advance.as_mut(), slide_duration(images, self.index))
                    {
                        timer.deadline = now + duration.saturating_sub(elapsed);
                    }
                    self.tick_progress(images, now);
                }
            }
        } else {
            self.paused = true;
            self.paused_elapsed = now.saturating_duration_since(self.slide_started);
            self.advance = None;
            self.generation += 1;
        }
        self.paused
    }

    /// Jumps to `index` (clamped into range) and restarts timing.
    pub fn seek(&mut self, index: usize, images: &ImageCollection, now: Instant) {
        self.index = index.min(images.len().saturating_sub(1));
        self.restart(images, now);
    }

    /// Stops both timers and parks the index at zero. Pause state is kept.
    pub fn stop(&mut self) {
        self.index = 0;
        self.progress_pct = 0.0;
        self.paused_elapsed = Duration::ZERO;
        self.advance = None;
        self.generation += 1;
    }

    /// Handles the advance timer firing. Stale or early firings are ignored.
    pub fn fire(&mut self, generation: u64, images: &ImageCollection, now: Instant) -> bool {
        match self.advance {
            Some(timer) if timer.generation == generation && now >= timer.deadline => {
                self.advance(images, now)
            }
            _ => false,
        }
    }

    /// Recomputes progress for the current slide. Returns whether it changed.
    pub fn tick_progress(&mut self, images: &ImageCollection, now: Instant) -> bool {
        if self.paused {
            return false;
        }
        let Some(duration) = slide_duration(images, self.index) else {
            return false;
        };
        let elapsed = now.saturating_duration_since(self.slide_started);
        let pct = (elapsed.as_secs_f64() / duration.as_secs_f64() * 100.0).min(100.0) as f32;
        let changed = pct != self.progress_pct;
        self.progress_pct = pct;
        changed
    }

    fn restart(&mut self, images: &ImageCollection, now: Instant) {
        self.slide_started = now;
        self.paused_elapsed = Duration::ZERO;
        self.progress_pct = 0.0;
        self.generation += 1;
        self.advance = match slide_duration(images, self.index) {
            Some(duration) if !self.paused => Some(AdvanceTimer {
                deadline: now + duration,
                generation: self.generation,
            }),
            _ => None,
        };
    }
}

fn slide_duration(images: &ImageCollection, index: usize) -> Option<Duration> {
    images
        .get(index)
        .map(|img| img.display_duration.max(MIN_SLIDE_DURATION))
}
