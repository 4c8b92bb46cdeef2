//! Field id to signal name registry
//!
//! Field devices announce their signal names once per session with type-0x00
//! TLV fields. The registry keeps that mapping for the lifetime of the process
//! and can optionally persist it, so a restarted ground station can resolve
//! telemetry before the device re-announces.

use crate::types::Result;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

/// Thread-safe `id -> name` registry
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: RwLock<HashMap<u8, String>>,
}

impl NameRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name announcement, returning the name it replaced
    pub fn announce(&self, id: u8, name: impl Into<String>) -> Option<String> {
        let name = name.into();
        let mut names = self.names.write().unwrap_or_else(|e| e.into_inner());
        let previous = names.insert(id, name.clone());
        match &previous {
            Some(old) if *old != name => {
                log::info!("Signal id {} renamed: \"{}\" -> \"{}\"", id, old, name)
            }
            None => log::debug!("Signal id {} registered as \"{}\"", id, name),
            _ => {}
        }
        previous
    }

    /// Name registered for `id`, if any
    pub fn name_of(&self, id: u8) -> Option<String> {
        self.names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Display name for `id`, falling back to `ID<n>` for unannounced ids
    pub fn display_name(&self, id: u8) -> String {
        self.name_of(id).unwrap_or_else(|| format!("ID{}", id))
    }

    pub fn len(&self) -> usize {
        self.names.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the whole mapping
    pub fn snapshot(&self) -> BTreeMap<u8, String> {
        self.names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }

    /// Write the mapping to a JSON file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, json)?;
        log::debug!("Saved {} signal names to {:?}", self.len(), path);
        Ok(())
    }

    /// Merge a previously saved mapping into the registry
    ///
    /// Returns the number of names loaded. A missing file is not an error.
    pub fn load_from(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            log::debug!("No name cache at {:?}", path);
            return Ok(0);
        }

        let content = fs::read_to_string(path)?;
        let loaded: BTreeMap<u8, String> = serde_json::from_str(&content)?;
        let count = loaded.len();

        let mut names = self.names.write().unwrap_or_else(|e| e.into_inner());
        names.extend(loaded);

        log::info!("Loaded {} signal names from {:?}", count, path);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry() {
        let names = NameRegistry::new();
        assert!(names.is_empty());
        assert_eq!(names.name_of(5), None);
        assert_eq!(names.display_name(5), "ID5");
    }

    #[test]
    fn test_reannounce_overwrites() {
        let names = NameRegistry::new();
        assert_eq!(names.announce(5, "RPM"), None);
        assert_eq!(names.announce(5, "EngineRPM"), Some("RPM".to_string()));
        assert_eq!(names.name_of(5).as_deref(), Some("EngineRPM"));
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");

        let names = NameRegistry::new();
        names.announce(5, "RPM");
        names.announce(12, "OilTemp");
        names.save_to(&path).unwrap();

        let restored = NameRegistry::new();
        assert_eq!(restored.load_from(&path).unwrap(), 2);
        assert_eq!(restored.snapshot(), names.snapshot());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let names = NameRegistry::new();
        assert_eq!(names.load_from(&dir.path().join("absent.json")).unwrap(), 0);
    }
}
