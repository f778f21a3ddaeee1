use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use signage_player::config::Configuration;
use signage_player::events::ControlInput;
use signage_player::model::ImageId;
use signage_player::store::ImageStore;
use signage_player::store::library::{LibraryFeed, LibraryStore};
use signage_player::tasks::loader::CollectionLoader;
use signage_player::tasks::player::{self, state::RenderView};
use signage_player::tasks::viewer::{self, ViewerMode};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

#[derive(Debug, Parser)]
#[command(
    name = "signage-player",
    version,
    about = "Fullscreen slideshow player for digital signage"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Log state changes instead of drawing a status line; no keyboard input
    #[arg(long)]
    headless: bool,
    /// Print the organization's images in display order and exit
    #[arg(long)]
    list: bool,
    /// Set an image's display duration (e.g. `menu.png 8s`) and exit
    #[arg(long = "set-duration", num_args = 2, value_names = ["IMAGE", "DURATION"])]
    set_duration: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        headless,
        list,
        set_duration,
    } = Args::parse();

    let one_shot = list || set_duration.is_some();
    let mode = if headless || one_shot || !io::stdin().is_terminal() || !io::stdout().is_terminal()
    {
        ViewerMode::Headless
    } else {
        ViewerMode::Interactive
    };

    // init tracing (RUST_LOG controls level, default depends on the viewer mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(mode.default_log_level())),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();

    let cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    if let Some(args) = set_duration {
        return run_set_duration(&cfg, &args);
    }
    if list {
        return run_list(&cfg).await;
    }

    let (control_tx, control_rx) = mpsc::channel::<ControlInput>(16); // Keys/signals -> Player
    let (view_tx, view_rx) = watch::channel(RenderView::Loading); // Player -> Viewer
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    spawn_signal_controls(control_tx.clone(), cancel.clone());

    let loader = Arc::new(CollectionLoader::new(
        LibraryStore::from_config(&cfg),
        LibraryFeed::from_config(&cfg),
        cfg.scope(),
    ));

    let mut tasks = JoinSet::new();

    tasks.spawn({
        let cancel = cancel.clone();
        let options = cfg.player.clone();
        async move {
            player::run(loader, control_rx, view_tx, options, cancel)
                .await
                .context("player task failed")
        }
    });

    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            viewer::run(view_rx, mode, cancel)
                .await
                .context("viewer task failed")
        }
    });

    let keys = match mode {
        ViewerMode::Interactive => Some(viewer::spawn_key_reader(control_tx, cancel.clone())),
        ViewerMode::Headless => {
            tracing::debug!("keyboard input disabled");
            if io::stdin().is_terminal() {
                spawn_stdin_watcher(cancel.clone());
            }
            None
        }
    };

    cancel.cancelled().await;

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }
    if let Some(keys) = keys {
        match keys.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("key reader error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}

/// Ctrl-D cancels the player when running headless on a terminal.
fn spawn_stdin_watcher(cancel: CancellationToken) {
    tokio::task::spawn_blocking(move || {
        let mut sink = Vec::new();
        match io::stdin().read_to_end(&mut sink) {
            Ok(_) => tracing::info!("stdin closed; initiating shutdown"),
            Err(err) => tracing::warn!("stdin watcher failed: {err}"),
        }
        cancel.cancel();
    });
}

/// SIGUSR1 toggles pause, SIGHUP reloads the collection.
#[cfg(unix)]
fn spawn_signal_controls(control: mpsc::Sender<ControlInput>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let (mut sigusr1, mut sighup) =
            match (signal(SignalKind::user_defined1()), signal(SignalKind::hangup())) {
                (Ok(usr1), Ok(hup)) => (usr1, hup),
                (Err(err), _) | (_, Err(err)) => {
                    tracing::warn!("failed to register control signal handlers: {err}");
                    return;
                }
            };
        loop {
            let input = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(()) = sigusr1.recv() => {
                    tracing::info!("SIGUSR1 received; toggling pause");
                    ControlInput::TogglePause
                }
                Some(()) = sighup.recv() => {
                    tracing::info!("SIGHUP received; reloading images");
                    ControlInput::Reload
                }
                else => break,
            };
            if let Err(err) = control.send(input).await {
                tracing::warn!("failed to forward control signal: {err}");
                break;
            }
        }
    });
}

async fn run_list(cfg: &Configuration) -> Result<()> {
    let store = LibraryStore::from_config(cfg);
    let scope = cfg.scope();
    let images = store.list_images(&scope).await?;

    println!(
        "# organization: {}\n# library: {}\n# images: {}\n",
        scope,
        cfg.organization_dir().display(),
        images.len()
    );
    if images.is_empty() {
        println!("(no images)");
        return Ok(());
    }
    for (idx, image) in images.iter().enumerate() {
        println!(
            "  {:>4}: {:<40} {:>8}  {}",
            idx + 1,
            image.id.as_str(),
            humantime::format_duration(image.display_duration).to_string(),
            image.created_at.to_rfc3339()
        );
    }
    Ok(())
}

fn run_set_duration(cfg: &Configuration, args: &[String]) -> Result<()> {
    let [image, duration] = args else {
        bail!("--set-duration expects IMAGE and DURATION");
    };
    let duration = humantime::parse_duration(duration)
        .with_context(|| format!("invalid duration '{duration}'"))?;
    LibraryStore::from_config(cfg).set_display_duration(
        &cfg.scope(),
        &ImageId::new(image.clone()),
        duration,
    )
}
