//! Durable settings and the bounded, most-recent-first list of saved handoffs.
//!
//! Every read-modify-write happens under one async mutex, so concurrent
//! captures can never overwrite each other's insert.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AppError, Result};

pub const MAX_SAVES: usize = 20;
pub const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "gemini")]
    Gemini,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_provider: ApiProvider,
    pub api_key: String,
}

/// A stored handoff. Never edited after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub summary: String,
    pub platform: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub preview: String,
}

impl Summary {
    pub fn new(summary: String, platform: &str, url: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(Utc::now()),
            preview: preview_of(&summary),
            summary,
            platform: platform.to_string(),
            url: url.to_string(),
            timestamp,
        }
    }
}

/// Millisecond timestamp plus a random base-36 suffix.
pub fn generate_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", now.timestamp_millis(), suffix)
}

pub fn preview_of(summary: &str) -> String {
    summary.chars().take(PREVIEW_CHARS).collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreState {
    settings: Settings,
    saves: Vec<Summary>,
}

pub struct Store {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl Store {
    /// Memory-only store.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Opens the store file, writing empty defaults on first use.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<StoreState>(&raw).map_err(|e| {
                AppError::Storage(format!("failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "creating store with default settings");
                let state = StoreState::default();
                write_state(&path, &state).await?;
                state
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub async fn settings(&self) -> Settings {
        self.state.lock().await.settings.clone()
    }

    /// Replaces the settings record wholesale.
    pub async fn save_settings(&self, settings: Settings) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.settings = settings;
        self.commit(&mut state, next).await
    }

    pub async fn saves(&self) -> Vec<Summary> {
        self.state.lock().await.saves.clone()
    }

    pub async fn last(&self) -> Option<Summary> {
        self.state.lock().await.saves.first().cloned()
    }

    /// Prepends `summary` and keeps the newest [`MAX_SAVES`] entries.
    pub async fn insert(&self, summary: Summary) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.saves.insert(0, summary);
        next.saves.truncate(MAX_SAVES);
        self.commit(&mut state, next).await
    }

    /// Removes the entry with `id`; a missing id is not an error.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.saves.iter().any(|s| s.id == id) {
            debug!(id, "delete of unknown save ignored");
            return Ok(false);
        }
        let mut next = state.clone();
        next.saves.retain(|s| s.id != id);
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    // Memory only changes once the write has landed.
    async fn commit(&self, state: &mut StoreState, next: StoreState) -> Result<()> {
        if let Some(path) = &self.path {
            write_state(path, &next).await?;
        }
        *state = next;
        Ok(())
    }
}

async fn write_state(path: &Path, state: &StoreState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_string_pretty(state)
        .map_err(|e| AppError::Storage(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, format!("{data}\n")).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
