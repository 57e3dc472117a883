use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::RenderScale;
use crate::store::write_atomic;
use crate::tool::PenSettings;

pub const MAX_RECENT_FILES: usize = 10;

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "inkpdf", "inkpdf")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub render_scale: RenderScale,
    /// Seconds between autosaves; 0 turns autosave off.
    pub autosave_secs: u64,
    pub pen: PenSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            render_scale: RenderScale::DEFAULT,
            autosave_secs: 60,
            pen: PenSettings::default(),
        }
    }
}

impl Settings {
    pub fn config_path(dirs: &ProjectDirs) -> PathBuf {
        dirs.config_dir().join("settings.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(?path, "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read settings {:?}", path))
            }
        };
        toml::from_str(&raw).with_context(|| format!("failed to parse settings {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {:?}", parent))?;
        }
        let payload = toml::to_string_pretty(self)?;
        write_atomic(path, payload.as_bytes())
            .with_context(|| format!("failed to write settings {:?}", path))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentFiles {
    path: PathBuf,
    entries: Vec<PathBuf>,
}

impl RecentFiles {
    pub fn default_path(dirs: &ProjectDirs) -> PathBuf {
        dirs.data_dir().join("recent.json")
    }

    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
        }
    }

    pub fn load(path: PathBuf) -> Result<Self> {
        let entries: Vec<PathBuf> = match fs::read(&path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(?path, %err, "recent files list unreadable, starting fresh");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read recent files {:?}", path))
            }
        };
        let mut recent = Self::empty(path);
        for entry in entries.into_iter().rev() {
            recent.push_front(entry);
        }
        Ok(recent)
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn touch(&mut self, document: &Path) {
        let resolved = document
            .canonicalize()
            .unwrap_or_else(|_| document.to_path_buf());
        self.push_front(resolved);
    }

    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.exists());
        before - self.entries.len()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data directory {:?}", parent))?;
        }
        let payload = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(&self.path, payload.as_bytes())
            .with_context(|| format!("failed to write recent files {:?}", self.path))
    }

    fn push_front(&mut self, entry: PathBuf) {
        self.entries.retain(|existing| *existing != entry);
        self.entries.insert(0, entry);
        self.entries.truncate(MAX_RECENT_FILES);
    }
}
