//! Terminal shell around the player: draws the render view and turns key
//! presses into control inputs.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode};
use crossterm::{cursor, execute};
use tokio::select;
use tokio::sync::{mpsc::Sender, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::ControlInput;
use crate::tasks::player::state::{RenderView, SlideView};

const BAR_WIDTH: usize = 20;
const KEY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerMode {
    /// Redraw a status line in place.
    Interactive,
    /// Log every change of state or slide.
    Headless,
}

impl ViewerMode {
    /// Log level used when `RUST_LOG` is unset. The interactive status line
    /// shares the terminal with the log output, so only warnings get through.
    pub fn default_log_level(self) -> &'static str {
        match self {
            Self::Interactive => "warn",
            Self::Headless => "info",
        }
    }
}

pub async fn run(
    mut view_rx: watch::Receiver<RenderView>,
    mode: ViewerMode,
    cancel: CancellationToken,
) -> Result<()> {
    let mut last_logged: Option<String> = None;
    loop {
        let view = view_rx.borrow_and_update().clone();
        match mode {
            ViewerMode::Interactive => draw_status(&view)?,
            ViewerMode::Headless => {
                let key = log_key(&view);
                if last_logged.as_ref() != Some(&key) {
                    info!(view = %describe(&view), "display");
                    last_logged = Some(key);
                }
            }
        }

        select! {
            _ = cancel.cancelled() => break,
            changed = view_rx.changed() => {
                if changed.is_err() {
                    debug!("player closed the render surface");
                    break;
                }
            }
        }
    }
    if mode == ViewerMode::Interactive {
        let mut out = io::stdout();
        writeln!(out, "\r")?;
        out.flush()?;
    }
    Ok(())
}

/// Reads key presses on a blocking thread until cancelled. Raw mode is held
/// for the lifetime of the reader.
pub fn spawn_key_reader(
    to_player: Sender<ControlInput>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || {
        let _raw = RawModeGuard::enable()?;
        while !cancel.is_cancelled() {
            if !event::poll(KEY_POLL)? {
                continue;
            }
            if let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL));
                if quit {
                    info!("quit requested from keyboard");
                    cancel.cancel();
                    break;
                }
                let input = match key.code {
                    KeyCode::Char('r') => Some(ControlInput::Reload),
                    code => key_name(code).and_then(ControlInput::from_key),
                };
                if let Some(input) = input
                    && to_player.blocking_send(input).is_err()
                {
                    warn!("player input channel closed");
                    break;
                }
            }
        }
        Ok(())
    })
}

fn key_name(code: KeyCode) -> Option<&'static str> {
    match code {
        KeyCode::Char(' ') => Some("Space"),
        KeyCode::Right => Some("ArrowRight"),
        KeyCode::Left => Some("ArrowLeft"),
        _ => None,
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            warn!("failed to restore terminal mode: {err}");
        }
    }
}

fn draw_status(view: &RenderView) -> Result<()> {
    let mut out = io::stdout();
    execute!(out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    write!(out, "{}", describe(view))?;
    out.flush()?;
    Ok(())
}

/// Changes only when something other than progress changes.
fn log_key(view: &RenderView) -> String {
    match view {
        RenderView::Showing(slide) => format!(
            "{:?}:{}/{}:{}:{}",
            view.phase(),
            slide.position,
            slide.total,
            slide.image.id,
            slide.paused
        ),
        RenderView::Error { message } => format!("{:?}:{message}", view.phase()),
        other => format!("{:?}", other.phase()),
    }
}

/// One-line rendering of a view.
pub fn describe(view: &RenderView) -> String {
    match view {
        RenderView::Loading => "loading...".to_string(),
        RenderView::Error { message } => format!("error: {message}"),
        RenderView::Empty => "no content to display".to_string(),
        RenderView::Showing(slide) => describe_slide(slide),
    }
}

fn describe_slide(slide: &SlideView) -> String {
    let status = if slide.paused {
        "paused".to_string()
    } else {
        format!("{:>3.0}%", slide.progress_pct)
    };
    format!(
        "[{}/{}] {}  {}  {}",
        slide.position,
        slide.total,
        slide.image.id,
        progress_bar(slide.progress_pct, BAR_WIDTH),
        status
    )
}

pub fn progress_bar(pct: f32, width: usize) -> String {
    let filled = ((pct.clamp(0.0, 100.0) / 100.0) * width as f32).round() as usize;
    let mut bar = "#".repeat(filled.min(width));
    bar.push_str(&"-".repeat(width - filled.min(width)));
    bar
}
