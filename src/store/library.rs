//! Directory-backed image store.
//!
//! Layout: `<library>/<organization>/**/<image>` plus a YAML manifest in the
//! organization directory mapping image ids to display durations:
//!
//! ```yaml
//! lobby/sunrise.jpg: 8s
//! menu.png: 1m
//! ```
//!
//! The change feed is a recursive filesystem watcher over the same directory.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::{ChangeFeed, ImageStore, Subscription};
use crate::config::Configuration;
use crate::events::{ChangeEvent, ChangeKind};
use crate::model::{Image, ImageCollection, ImageId, OrgScope};

const FEED_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct LibraryStore {
    root: PathBuf,
    manifest_file: String,
    default_duration: Duration,
}

impl LibraryStore {
    pub fn new(
        root: impl Into<PathBuf>,
        manifest_file: impl Into<String>,
        default_duration: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            manifest_file: manifest_file.into(),
            default_duration,
        }
    }

    pub fn from_config(cfg: &Configuration) -> Self {
        Self::new(
            &cfg.library_path,
            cfg.manifest_file.clone(),
            cfg.default_display_duration,
        )
    }

    fn org_dir(&self, scope: &OrgScope) -> PathBuf {
        self.root.join(scope.as_str())
    }

    fn manifest_path(&self, scope: &OrgScope) -> PathBuf {
        self.org_dir(scope).join(&self.manifest_file)
    }

    /// Walks the organization directory and builds its collection.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn scan(&self, scope: &OrgScope) -> Result<ImageCollection> {
        let dir = self.org_dir(scope);
        if !dir.is_dir() {
            bail!("image library {} is not a directory", dir.display());
        }
        let durations = read_manifest(&self.manifest_path(scope))?;

        let mut images = Vec::new();
        for entry in WalkDir::new(&dir)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if !is_image(path) {
                continue;
            }
            let Some(id) = image_id(&dir, path) else {
                continue;
            };
            let display_duration = match durations.get(id.as_str()) {
                Some(d) if !d.is_zero() => *d,
                Some(_) => {
                    warn!(id = %id, "zero display duration in manifest; using default");
                    self.default_duration
                }
                None => self.default_duration,
            };
            images.push(Image {
                url: file_url(path),
                id,
                display_duration,
                created_at: DateTime::<Utc>::from(image_created_at(path)),
            });
        }
        debug!(org = %scope, count = images.len(), "library scan complete");
        Ok(ImageCollection::newest_first(images))
    }

    /// Records a display duration in the manifest. The watcher turns the
    /// write into an update event.
    pub fn set_display_duration(
        &self,
        scope: &OrgScope,
        id: &ImageId,
        duration: Duration,
    ) -> Result<()> {
        if duration.is_zero() {
            bail!("display duration must be positive");
        }
        let dir = self.org_dir(scope);
        let image_path = dir.join(id.as_str());
        if !image_path.is_file() {
            bail!("no image {} in {}", id, dir.display());
        }
        let manifest = self.manifest_path(scope);
        let mut durations = read_manifest(&manifest)?;
        durations.insert(id.as_str().to_string(), duration);
        write_manifest(&manifest, &durations)?;
        info!(id = %id, duration = %humantime::format_duration(duration), "display duration updated");
        Ok(())
    }
}

#[async_trait]
impl ImageStore for LibraryStore {
    async fn list_images(&self, scope: &OrgScope) -> Result<Vec<Image>> {
        let store = self.clone();
        let scope = scope.clone();
        let collection = tokio::task::spawn_blocking(move || store.scan(&scope))
            .await
            .context("library scan task failed")??;
        Ok(collection.iter().cloned().collect())
    }
}

#[derive(Debug, Clone)]
pub struct LibraryFeed {
    root: PathBuf,
    manifest_file: String,
}

impl LibraryFeed {
    pub fn new(root: impl Into<PathBuf>, manifest_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            manifest_file: manifest_file.into(),
        }
    }

    pub fn from_config(cfg: &Configuration) -> Self {
        Self::new(&cfg.library_path, cfg.manifest_file.clone())
    }
}

impl ChangeFeed for LibraryFeed {
    fn subscribe(&self, scope: &OrgScope) -> Result<Subscription> {
        let dir = self.root.join(scope.as_str());
        let watched = WatchedDir {
            dir: dir.clone(),
            canonical: dir.canonicalize().ok(),
            manifest: self.manifest_file.clone(),
        };
        let (tx, rx) = mpsc::channel::<ChangeEvent>(FEED_CAPACITY);

        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in classify(&event, &watched) {
                    // A full buffer already guarantees a pending re-fetch.
                    let _ = tx.try_send(change);
                }
            }
            Err(err) => warn!("watch error: {err}"),
        })?;
        watcher
            .watch(&dir, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;

        match dir.canonicalize() {
            Ok(abs) => info!(watching = %abs.display(), "library watcher initialized (recursive)"),
            Err(_) => info!(watching = %dir.display(), "library watcher initialized (recursive)"),
        }
        Ok(Subscription::new(rx, watcher))
    }
}

/// Organization directory as the watcher may report it: as configured or
/// canonicalized.
#[derive(Debug, Clone)]
struct WatchedDir {
    dir: PathBuf,
    canonical: Option<PathBuf>,
    manifest: String,
}

impl WatchedDir {
    /// The prefix `path` lives under, if it is strictly inside the directory.
    fn base_of(&self, path: &Path) -> Option<&Path> {
        [Some(self.dir.as_path()), self.canonical.as_deref()]
            .into_iter()
            .flatten()
            .find(|base| {
                path.strip_prefix(base)
                    .is_ok_and(|rel| !rel.as_os_str().is_empty())
            })
    }
}

fn classify(event: &Event, watched: &WatchedDir) -> Vec<ChangeEvent> {
    let mut changes = Vec::new();
    for path in &event.paths {
        let Some(base) = watched.base_of(path) else {
            debug!(path = %path.display(), "fs: outside organization directory");
            continue;
        };
        let change = if is_image(path) {
            file_change(&event.kind, path).map(|kind| ChangeEvent::new(kind, image_id(base, path)))
        } else if path
            .strip_prefix(base)
            .is_ok_and(|rel| rel == Path::new(&watched.manifest))
        {
            file_change(&event.kind, path).map(|kind| ChangeEvent::new(kind, None))
        } else {
            folder_change(&event.kind, path).map(|kind| ChangeEvent::new(kind, None))
        };
        match change {
            Some(change) => {
                debug!(kind = ?change.kind, path = %path.display(), "fs: change");
                changes.push(change);
            }
            None => debug!(kind = ?event.kind, path = %path.display(), "fs: ignored"),
        }
    }
    changes
}

fn file_change(kind: &EventKind, path: &Path) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => Some(ChangeKind::Insert),
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => Some(ChangeKind::Delete),
        // Moves are often reported without a direction; decide by existence.
        EventKind::Modify(ModifyKind::Name(_)) => Some(if path.exists() {
            ChangeKind::Insert
        } else {
            ChangeKind::Delete
        }),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Some(ChangeKind::Update),
        _ => None,
    }
}

/// Folders carry every image below them; a moved folder reports only its own path.
fn folder_change(kind: &EventKind, path: &Path) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(CreateKind::Folder) => Some(ChangeKind::Insert),
        EventKind::Remove(RemoveKind::Folder) => Some(ChangeKind::Delete),
        EventKind::Modify(ModifyKind::Name(_)) if path.is_dir() => Some(ChangeKind::Insert),
        EventKind::Modify(ModifyKind::Name(_)) if !path.exists() => Some(ChangeKind::Delete),
        _ => None,
    }
}

#[inline]
fn is_image(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if ["jpg", "jpeg", "png", "webp", "gif"].contains(&e.as_str())
    )
}

fn image_id(dir: &Path, path: &Path) -> Option<ImageId> {
    let rel = path.strip_prefix(dir).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(ImageId::new(parts.join("/")))
}

fn file_url(path: &Path) -> String {
    let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", abs.display())
}

fn image_created_at(path: &Path) -> SystemTime {
    match fs::metadata(path) {
        Ok(meta) => meta
            .modified()
            .or_else(|_| meta.created())
            .unwrap_or_else(|_| SystemTime::now()),
        Err(_) => SystemTime::now(),
    }
}

fn read_manifest(path: &Path) -> Result<BTreeMap<String, Duration>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: BTreeMap<String, humantime_serde::Serde<Duration>> = serde_yaml::from_str(&raw)
        .with_context(|| format!("invalid duration manifest {}", path.display()))?;
    Ok(parsed
        .into_iter()
        .map(|(id, d)| (id, d.into_inner()))
        .collect())
}

fn write_manifest(path: &Path, durations: &BTreeMap<String, Duration>) -> Result<()> {
    let rendered: BTreeMap<&str, String> = durations
        .iter()
        .map(|(id, d)| (id.as_str(), humantime::format_duration(*d).to_string()))
        .collect();
    let yaml = serde_yaml::to_string(&rendered)?;
    fs::write(path, yaml).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, RenameMode};
    use tempfile::tempdir;

    #[test]
    fn recognises_image_extensions() {
        assert!(is_image(Path::new("a/b.JPG")));
        assert!(is_image(Path::new("poster.webp")));
        assert!(!is_image(Path::new("durations.yaml")));
        assert!(!is_image(Path::new("noext")));
    }

    #[test]
    fn manifest_durations_override_default() {
        let tmp = tempdir().unwrap();
        let org = tmp.path().join("lobby");
        fs::create_dir_all(org.join("menus")).unwrap();
        fs::write(org.join("welcome.jpg"), b"x").unwrap();
        fs::write(org.join("menus").join("lunch.png"), b"x").unwrap();
        fs::write(org.join("notes.txt"), b"x").unwrap();
        fs::write(
            org.join("durations.yaml"),
            "menus/lunch.png: 12s\nwelcome.jpg: 0s\n",
        )
        .unwrap();

        let store = LibraryStore::new(tmp.path(), "durations.yaml", Duration::from_secs(5));
        let collection = store.scan(&OrgScope::new("lobby")).unwrap();
        assert_eq!(collection.len(), 2);

        let lunch = collection
            .get(collection.position(&ImageId::new("menus/lunch.png")).unwrap())
            .unwrap();
        assert_eq!(lunch.display_duration, Duration::from_secs(12));
        assert!(lunch.url.starts_with("file://"));

        let welcome = collection
            .get(collection.position(&ImageId::new("welcome.jpg")).unwrap())
            .unwrap();
        assert_eq!(welcome.display_duration, Duration::from_secs(5));
    }

    #[test]
    fn malformed_manifest_fails_the_scan() {
        let tmp = tempdir().unwrap();
        let org = tmp.path().join("lobby");
        fs::create_dir_all(&org).unwrap();
        fs::write(org.join("a.jpg"), b"x").unwrap();
        fs::write(org.join("durations.yaml"), "a.jpg: soon\n").unwrap();

        let store = LibraryStore::new(tmp.path(), "durations.yaml", Duration::from_secs(5));
        let err = store.scan(&OrgScope::new("lobby")).unwrap_err();
        assert!(format!("{err:#}").contains("invalid duration manifest"));
    }

    #[test]
    fn set_display_duration_round_trips_through_manifest() {
        let tmp = tempdir().unwrap();
        let org = tmp.path().join("lobby");
        fs::create_dir_all(&org).unwrap();
        fs::write(org.join("a.jpg"), b"x").unwrap();

        let store = LibraryStore::new(tmp.path(), "durations.yaml", Duration::from_secs(5));
        let scope = OrgScope::new("lobby");
        store
            .set_display_duration(&scope, &ImageId::new("a.jpg"), Duration::from_secs(90))
            .unwrap();
        let collection = store.scan(&scope).unwrap();
        assert_eq!(
            collection.get(0).unwrap().display_duration,
            Duration::from_secs(90)
        );

        assert!(
            store
                .set_display_duration(&scope, &ImageId::new("missing.jpg"), Duration::from_secs(1))
                .is_err()
        );
    }

    fn watched(dir: &Path) -> WatchedDir {
        WatchedDir {
            dir: dir.to_path_buf(),
            canonical: dir.canonicalize().ok(),
            manifest: "durations.yaml".to_string(),
        }
    }

    fn event(kind: EventKind, path: PathBuf) -> Event {
        Event::new(kind).add_path(path)
    }

    #[test]
    fn events_name_images_by_their_collection_id() {
        let tmp = tempdir().unwrap();
        let org = tmp.path().join("lobby");
        fs::create_dir_all(org.join("menus")).unwrap();
        let lunch = org.join("menus").join("lunch.png");
        fs::write(&lunch, b"x").unwrap();

        let changes = classify(
            &event(EventKind::Create(CreateKind::File), lunch),
            &watched(&org),
        );
        assert_eq!(
            changes,
            [ChangeEvent::new(
                ChangeKind::Insert,
                Some(ImageId::new("menus/lunch.png"))
            )]
        );

        let manifest = classify(
            &event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                org.join("durations.yaml"),
            ),
            &watched(&org),
        );
        assert_eq!(manifest, [ChangeEvent::new(ChangeKind::Update, None)]);
    }

    #[test]
    fn folder_moves_signal_a_change() {
        let tmp = tempdir().unwrap();
        let org = tmp.path().join("lobby");
        fs::create_dir_all(org.join("arrived")).unwrap();
        let w = watched(&org);

        let gone = classify(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                org.join("promo"),
            ),
            &w,
        );
        assert_eq!(gone, [ChangeEvent::new(ChangeKind::Delete, None)]);

        let arrived = classify(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                org.join("arrived"),
            ),
            &w,
        );
        assert_eq!(arrived, [ChangeEvent::new(ChangeKind::Insert, None)]);

        let created = classify(
            &event(EventKind::Create(CreateKind::Folder), org.join("arrived")),
            &w,
        );
        assert_eq!(created, [ChangeEvent::new(ChangeKind::Insert, None)]);

        let removed = classify(
            &event(EventKind::Remove(RemoveKind::Folder), org.join("promo")),
            &w,
        );
        assert_eq!(removed, [ChangeEvent::new(ChangeKind::Delete, None)]);
    }

    #[test]
    fn unrelated_paths_are_ignored() {
        let tmp = tempdir().unwrap();
        let org = tmp.path().join("lobby");
        fs::create_dir_all(&org).unwrap();
        fs::write(org.join("notes.txt"), b"x").unwrap();
        let w = watched(&org);

        let create_text = event(EventKind::Create(CreateKind::File), org.join("notes.txt"));
        assert!(classify(&create_text, &w).is_empty());

        let elsewhere = event(
            EventKind::Create(CreateKind::File),
            tmp.path().join("other").join("a.jpg"),
        );
        assert!(classify(&elsewhere, &w).is_empty());

        let org_itself = event(EventKind::Modify(ModifyKind::Name(RenameMode::Any)), org.clone());
        assert!(classify(&org_itself, &w).is_empty());
    }

    #[test]
    fn missing_library_is_a_fetch_error() {
        let tmp = tempdir().unwrap();
        let store = LibraryStore::new(tmp.path(), "durations.yaml", Duration::from_secs(5));
        assert!(store.scan(&OrgScope::new("nobody")).is_err());
    }
}
