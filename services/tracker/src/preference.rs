//! Persisted per-device source preferences

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::model::SourcePreference;

/// Store of the sticky per-device source choice
pub trait PreferenceStore: Send + Sync + std::fmt::Debug {
    fn get(&self, device: &str) -> Option<SourcePreference>;

    /// Record a preference. Persisting stores write through on every change.
    fn set(&self, device: &str, source: SourcePreference) -> crate::Result<()>;

    fn remove(&self, device: &str) -> crate::Result<()>;

    fn snapshot(&self) -> BTreeMap<String, SourcePreference>;
}

/// Preferences held only for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    entries: RwLock<BTreeMap<String, SourcePreference>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, device: &str) -> Option<SourcePreference> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .copied()
    }

    fn set(&self, device: &str, source: SourcePreference) -> crate::Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.to_string(), source);
        Ok(())
    }

    fn remove(&self, device: &str) -> crate::Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device);
        Ok(())
    }

    fn snapshot(&self) -> BTreeMap<String, SourcePreference> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Preferences kept in a JSON object file, `{"device": "realtime" | "polling"}`
#[derive(Debug)]
pub struct JsonFilePreferenceStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, SourcePreference>>,
}

impl JsonFilePreferenceStore {
    /// Load the store. A missing file starts empty; an unreadable one is
    /// logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable preference file {:?}: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            "Loaded {} source preference(s) from {:?}",
            entries.len(),
            path
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, SourcePreference>) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl PreferenceStore for JsonFilePreferenceStore {
    fn get(&self, device: &str) -> Option<SourcePreference> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .copied()
    }

    fn set(&self, device: &str, source: SourcePreference) -> crate::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(device) == Some(&source) {
            return Ok(());
        }
        let mut updated = entries.clone();
        updated.insert(device.to_string(), source);
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn remove(&self, device: &str) -> crate::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(device) {
            return Ok(());
        }
        let mut updated = entries.clone();
        updated.remove(device);
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn snapshot(&self) -> BTreeMap<String, SourcePreference> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
