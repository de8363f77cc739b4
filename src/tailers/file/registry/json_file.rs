// SPDX-License-Identifier: Apache-2.0

//! JSON file registry with atomic writes.
//!
//! Offsets are kept in memory and written out on [`Registry::flush`] using a
//! write-to-temp-then-rename strategy, so a crash mid-write never leaves a
//! torn file behind.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Registry;
use crate::tailers::file::error::{Error, Result};

pub const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub offset: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryState {
    version: u32,
    entries: HashMap<String, RegistryEntry>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            entries: HashMap::new(),
        }
    }
}

pub struct JsonFileRegistry {
    path: PathBuf,
    state: RwLock<RegistryState>,
    dirty: AtomicBool,
}

impl JsonFileRegistry {
    /// Open or create a registry at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let file = File::open(&path)
                .map_err(|e| Error::Registry(format!("failed to open registry: {}", e)))?;
            let state: RegistryState = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| {
                    Error::Registry(format!(
                        "registry is corrupted and cannot be loaded: {}. \
                         To start fresh, delete the offsets file and restart.",
                        e
                    ))
                })?;
            if state.version > REGISTRY_VERSION {
                return Err(Error::Registry(format!(
                    "registry version {} is newer than supported version {}",
                    state.version, REGISTRY_VERSION
                )));
            }
            debug!(path = ?path, entries = state.entries.len(), "Loaded registry");
            state
        } else {
            RegistryState::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
            dirty: AtomicBool::new(false),
        })
    }

    /// Registry that never touches disk
    pub fn open_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: RwLock::new(RegistryState::default()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self, identifier: &str) -> Option<RegistryEntry> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(identifier)
            .cloned()
    }
}

impl Registry for JsonFileRegistry {
    fn get_offset(&self, identifier: &str) -> Option<String> {
        self.entry(identifier).map(|e| e.offset)
    }

    fn set_offset(&self, identifier: &str, offset: String) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let unchanged = state
            .entries
            .get(identifier)
            .is_some_and(|e| e.offset == offset);
        if unchanged {
            return;
        }
        state.entries.insert(
            identifier.to_string(),
            RegistryEntry {
                offset,
                last_updated: Utc::now(),
            },
        );
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn flush(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() || !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        atomic_write(&self.path, &state).inspect_err(|_| {
            // Retry on the next flush.
            self.dirty.store(true, Ordering::SeqCst);
        })
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, state: &RegistryState) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Registry(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Registry(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Registry(format!("failed to write registry: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Registry(format!("failed to flush registry: {}", e)))?;
    drop(writer);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Registry(format!("failed to rename registry file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("offsets.json");

        let registry = JsonFileRegistry::open(&path).unwrap();
        registry.set_offset("file:/var/log/app.log", "128".to_string());
        registry.flush().unwrap();
        assert!(path.exists());

        let reloaded = JsonFileRegistry::open(&path).unwrap();
        assert_eq!(
            reloaded.get_offset("file:/var/log/app.log").as_deref(),
            Some("128")
        );
    }

    #[test]
    fn test_flush_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");

        let registry = JsonFileRegistry::open(&path).unwrap();
        registry.set_offset("file:a", "1".to_string());
        registry.flush().unwrap();
        registry.set_offset("file:a", "2".to_string());
        registry.flush().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["offsets.json".to_string()]);
    }

    #[test]
    fn test_unchanged_offset_skips_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");

        let registry = JsonFileRegistry::open(&path).unwrap();
        registry.flush().unwrap();
        assert!(!path.exists());

        registry.set_offset("file:a", "5".to_string());
        let first = registry.entry("file:a").unwrap();
        registry.set_offset("file:a", "5".to_string());
        assert_eq!(registry.entry("file:a").unwrap(), first);
    }

    #[test]
    fn test_corrupted_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        fs::write(&path, "{not json").unwrap();

        let err = JsonFileRegistry::open(&path).err().unwrap();
        assert!(err.to_string().contains("corrupted"));
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        fs::write(&path, r#"{"version": 99, "entries": {}}"#).unwrap();

        assert!(JsonFileRegistry::open(&path).is_err());
    }

    #[test]
    fn test_memory_registry_never_writes() {
        let registry = JsonFileRegistry::open_memory();
        registry.set_offset("file:a", "3".to_string());
        registry.flush().unwrap();
        assert_eq!(registry.get_offset("file:a").as_deref(), Some("3"));
    }
}
