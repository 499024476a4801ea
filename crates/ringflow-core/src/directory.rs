//! In-memory contact directory.

use std::collections::HashMap;

use crate::error::{Result, RingflowError};
use crate::traits::ContactDirectory;
use crate::types::Contact;

/// Immutable snapshot of contacts, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    contacts: HashMap<String, Contact>,
}

impl MemoryDirectory {
    pub fn new(contacts: impl IntoIterator<Item = Contact>) -> Self {
        Self {
            contacts: contacts.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// All contacts, sorted by display name.
    pub fn list(&self) -> Vec<&Contact> {
        let mut all: Vec<_> = self.contacts.values().collect();
        all.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        all
    }
}

impl ContactDirectory for MemoryDirectory {
    fn get_contact(&self, id: &str) -> Result<Contact> {
        self.contacts
            .get(id)
            .cloned()
            .ok_or_else(|| RingflowError::NotFound(format!("contact '{id}'")))
    }
}
