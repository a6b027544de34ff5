// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexCrypt.
//
// PlexCrypt is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexCrypt is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexCrypt. If not, see <https://www.gnu.org/licenses/>.

//! # Config Store & Watcher
//!
//! ## Purpose
//! Owns the authoritative `(CryptoConfig, tag)` pair. The tag is the SHA-256
//! of the raw config file bytes and doubles as a cheap change detector: all
//! consumers cache the tag they last saw and ask the store only "did it
//! change", which is a hash compare, not a re-parse.
//!
//! ## Concurrency
//! The pair lives under a `tokio::sync::RwLock`. Writers only swap pointers
//! under the write lock; parsing and hashing happen outside of it. A config
//! that fails parse or verify leaves the store *cleared* - consumers see "no
//! configuration" rather than a stale one, exactly like the initial state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{CryptoConfig, CryptoConfigSet};

/// Default location of the operator configuration.
pub const CONFIG_FILE: &str = "/config/cex_resources.json";

#[derive(Default)]
struct ConfigState {
    config: Option<Arc<CryptoConfig>>,
    tag: Option<Vec<u8>>,
}

/// Outcome of a tag-guarded set lookup, see [`ConfigStore::set_if_changed`].
#[derive(Debug, Clone, PartialEq)]
pub enum SetLookup {
    /// The caller's cached tag still matches; keep using the cached set.
    Unchanged,
    /// The configuration moved on; here are the fresh set and tag.
    Updated {
        ccset: Option<CryptoConfigSet>,
        tag: Option<Vec<u8>>,
    },
}

/// Long-lived owner of the current crypto configuration.
pub struct ConfigStore {
    path: PathBuf,
    state: RwLock<ConfigState>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            state: RwLock::new(ConfigState::default()),
        })
    }

    /// First load at process start. Unlike later reloads a failure here is
    /// returned to the caller, which treats it as fatal.
    pub async fn load_initial(&self) -> ConfigResult<Arc<CryptoConfig>> {
        self.update_config().await?;
        let state = self.state.read().await;
        state
            .config
            .clone()
            .ok_or_else(|| ConfigError::Invalid("no configuration present".to_string()))
    }

    /// Re-check the file; swap in a new `(config, tag)` pair when the hash
    /// changed and the new content verifies.
    pub async fn update_config(&self) -> ConfigResult<()> {
        let newtag = self.compute_tag()?;

        let mut state = self.state.write().await;
        if state.tag.as_deref() == Some(newtag.as_slice()) {
            return Ok(());
        }
        info!(
            "Configuration changes detected (tag {})",
            hex::encode(&newtag)
        );
        // In case of an error, do not provide any configuration.
        // If reading and verification succeeds, we will overwrite this below.
        state.config = None;
        state.tag = None;

        let newcc = self.read_config_file()?;
        if let Err(msg) = newcc.verify() {
            return Err(ConfigError::Invalid(msg));
        }
        state.config = Some(Arc::new(newcc));
        state.tag = Some(newtag);
        info!("Configuration successfully updated");
        Ok(())
    }

    /// Snapshot of the current configuration, if any.
    pub async fn current(&self) -> Option<Arc<CryptoConfig>> {
        self.state.read().await.config.clone()
    }

    /// Current list of configured set names (unsorted).
    pub async fn set_names(&self) -> Vec<String> {
        match self.current().await {
            Some(cc) => cc.set_names(),
            None => Vec::new(),
        }
    }

    /// Tag-guarded per-set lookup.
    ///
    /// Consumers pass the tag they cached with their set; when it still
    /// matches the store's tag this is O(compare) and the caller keeps its
    /// cached copy.
    pub async fn set_if_changed(&self, resource: &str, cached_tag: Option<&[u8]>) -> SetLookup {
        let state = self.state.read().await;
        if state.tag.as_deref() == cached_tag {
            return SetLookup::Unchanged;
        }
        let ccset = state
            .config
            .as_ref()
            .and_then(|cc| cc.get_set(resource).cloned());
        SetLookup::Updated {
            ccset,
            tag: state.tag.clone(),
        }
    }

    /// Which configured set owns the given APQN on this machine.
    pub async fn set_for_apqn(
        &self,
        adapter: i32,
        domain: i32,
        machineid: &str,
    ) -> Option<CryptoConfigSet> {
        let state = self.state.read().await;
        state
            .config
            .as_ref()
            .and_then(|cc| cc.set_for_apqn(adapter, domain, machineid).cloned())
    }

    /// Spawn the periodic re-check task. The returned handle stops it.
    pub fn spawn_watcher(self: &Arc<Self>, check_interval: Duration) -> ConfigWatcherHandle {
        let store = Arc::clone(self);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(check_interval);
            // the immediate first tick: the initial load already happened
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = tick.tick() => {
                        if let Err(e) = store.update_config().await {
                            warn!("Failed to update config: {}", e);
                        }
                    }
                }
            }
        });
        ConfigWatcherHandle {
            stop: stop_tx,
            handle,
        }
    }

    fn compute_tag(&self) -> ConfigResult<Vec<u8>> {
        let rawdata = std::fs::read(&self.path).map_err(|e| ConfigError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&rawdata);
        Ok(hasher.finalize().to_vec())
    }

    fn read_config_file(&self) -> ConfigResult<CryptoConfig> {
        let rawdata = std::fs::read(&self.path).map_err(|e| ConfigError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        serde_json::from_slice(&rawdata).map_err(|e| {
            error!(
                "Error parsing config file '{}': {}",
                self.path.display(),
                e
            );
            ConfigError::Parse {
                path: self.path.display().to_string(),
                source: e,
            }
        })
    }

    /// Path the store watches; exposed for log lines.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Stop handle of the config watcher task.
pub struct ConfigWatcherHandle {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcherHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
