//! File-based contact store: the address book as a JSON array.
//! Read once into a `MemoryDirectory`; the scheduler never writes back.

use std::path::{Path, PathBuf};

use ringflow_core::MemoryDirectory;
use ringflow_core::error::Result;
use ringflow_core::types::Contact;

/// JSON file holding contacts.
pub struct ContactStore {
    path: PathBuf,
}

impl ContactStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Default store path (~/.ringflow/contacts.json).
    pub fn default_path() -> PathBuf {
        ringflow_core::RingflowConfig::home_dir().join("contacts.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save all contacts to disk.
    pub fn save(&self, contacts: &[Contact]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(contacts)?;
        std::fs::write(&self.path, json)?;
        tracing::debug!("💾 Saved {} contacts to {}", contacts.len(), self.path.display());
        Ok(())
    }

    /// Load contacts. A missing or unreadable file yields an empty list.
    pub fn load(&self) -> Vec<Contact> {
        if !self.path.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(&self.path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse {}: {e}", self.path.display());
                Vec::new()
            }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to read {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }

    /// Load into an immutable directory for a dispatch run.
    pub fn directory(&self) -> MemoryDirectory {
        MemoryDirectory::new(self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringflow_core::ContactDirectory;

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join("ringflow-test-contacts");
        let store = ContactStore::new(&dir.join("contacts.json"));
        store
            .save(&[Contact::new("c1", "Meera", "+919811111111")])
            .unwrap();

        let directory = store.directory();
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get_contact("c1").unwrap().display_name, "Meera");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_or_bad_file_is_empty() {
        let dir = std::env::temp_dir().join("ringflow-test-contacts-bad");
        let store = ContactStore::new(&dir.join("contacts.json"));
        assert!(store.load().is_empty());

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
