use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use ember_db::Persister;
use ember_types::models::{Contact, ContactKind, DirectoryEntry};

use crate::Result;
use crate::error::EmberError;

/// Contacts, groups and the cached directory.
#[derive(Clone)]
pub struct Contacts {
    persister: Arc<Persister>,
}

impl Contacts {
    pub fn new(persister: Arc<Persister>) -> Self {
        Self { persister }
    }

    pub fn get(&self, id: &str) -> Result<Option<Contact>> {
        Ok(self.persister.db().get_contact(id)?)
    }

    /// Visible contacts, most recently active first.
    pub fn list(&self) -> Result<Vec<Contact>> {
        Ok(self.persister.db().list_contacts(false)?)
    }

    pub fn list_all(&self) -> Result<Vec<Contact>> {
        Ok(self.persister.db().list_contacts(true)?)
    }

    /// Add a direct contact. Name, avatar and status come from the directory
    /// when the peer is cached there. Adding an existing contact unhides it.
    pub fn add(&self, id: &str, name: &str) -> Result<Contact> {
        let db = self.persister.db();

        if let Some(existing) = db.get_contact(id)? {
            if existing.hidden {
                db.set_contact_hidden(id, false)?;
                self.persister.schedule();
            }
            return Ok(Contact {
                hidden: false,
                ..existing
            });
        }

        let mut contact = Contact::direct(id, name);
        if let Some(entry) = db.get_directory_entry(id)? {
            if name.trim().is_empty() {
                contact.name = entry.name;
            }
            contact.avatar = entry.avatar;
            contact.status = entry.status;
        }

        db.upsert_contact(&contact)?;
        self.persister.schedule();
        info!("Added contact {}", id);
        Ok(contact)
    }

    /// Create a group owned by `owner_id`. The owner is always a member.
    pub fn create_group(&self, owner_id: &str, name: &str, members: Vec<String>) -> Result<Contact> {
        let mut members = members;
        if !members.iter().any(|m| m == owner_id) {
            members.insert(0, owner_id.to_string());
        }
        let mut seen = HashSet::new();
        members.retain(|m| seen.insert(m.clone()));

        let contact = Contact {
            members,
            owner_id: Some(owner_id.to_string()),
            kind: ContactKind::Group,
            ..Contact::direct(Uuid::new_v4().to_string(), name)
        };

        self.persister.db().upsert_contact(&contact)?;
        self.persister.schedule();
        info!("Created group {} with {} members", contact.id, contact.members.len());
        Ok(contact)
    }

    pub fn set_blocked(&self, id: &str, blocked: bool) -> Result<()> {
        if !self.persister.db().set_contact_blocked(id, blocked)? {
            return Err(EmberError::UnknownConversation(id.to_string()));
        }
        self.persister.schedule();
        Ok(())
    }

    pub fn set_hidden(&self, id: &str, hidden: bool) -> Result<()> {
        if !self.persister.db().set_contact_hidden(id, hidden)? {
            return Err(EmberError::UnknownConversation(id.to_string()));
        }
        self.persister.schedule();
        Ok(())
    }

    // -- Directory --

    pub fn directory(&self) -> Result<Vec<DirectoryEntry>> {
        Ok(self.persister.db().list_directory()?)
    }

    pub fn directory_entry(&self, id: &str) -> Result<Option<DirectoryEntry>> {
        Ok(self.persister.db().get_directory_entry(id)?)
    }
}
