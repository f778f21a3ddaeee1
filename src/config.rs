use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::model::OrgScope;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Root directory holding one sub-directory of uploaded images per organization.
    pub library_path: PathBuf,
    /// Organization whose images are shown.
    pub organization: String,
    /// File name of the per-image duration manifest inside the organization directory.
    pub manifest_file: String,
    /// Display duration for images without a manifest entry.
    #[serde(with = "humantime_serde")]
    pub default_display_duration: Duration,
    /// Slideshow timing options.
    pub player: PlayerOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.library_path.as_os_str().is_empty(),
            "library-path must be set"
        );
        ensure!(
            !self.organization.trim().is_empty(),
            "organization must not be empty"
        );
        ensure!(
            !self.manifest_file.is_empty()
                && !self.manifest_file.contains(['/', '\\']),
            "manifest-file must be a plain file name"
        );
        ensure!(
            self.default_display_duration > Duration::ZERO,
            "default-display-duration must be positive"
        );
        self.player.validate()?;
        Ok(self)
    }

    pub fn scope(&self) -> OrgScope {
        OrgScope::new(self.organization.clone())
    }

    /// Directory holding the configured organization's images.
    pub fn organization_dir(&self) -> PathBuf {
        self.library_path.join(&self.organization)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            library_path: PathBuf::new(),
            organization: "default".to_string(),
            manifest_file: "durations.yaml".to_string(),
            default_display_duration: Duration::from_secs(5),
            player: PlayerOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PlayerOptions {
    /// Cadence of the progress-bar ticker.
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,
    /// Window in which change-feed events are coalesced into one re-fetch.
    #[serde(with = "humantime_serde")]
    pub refresh_debounce: Duration,
    /// What resuming from pause does to the current slide's timer.
    pub resume: ResumePolicy,
}

impl PlayerOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.progress_interval > Duration::ZERO,
            "player.progress-interval must be positive"
        );
        Ok(())
    }
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(50),
            refresh_debounce: Duration::from_millis(100),
            resume: ResumePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumePolicy {
    /// Restart the full duration and reset progress to zero.
    #[default]
    Restart,
    /// Continue from the elapsed time at which the slideshow was paused.
    Continue,
}
