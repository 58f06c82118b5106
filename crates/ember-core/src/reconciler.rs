use futures_util::{Stream, StreamExt};
use tracing::{debug, trace, warn};

use ember_types::events::{TransportEvent, WireMessage};
use ember_types::models::{Contact, ContactKind, DirectoryEntry, Message};

use crate::Result;
use crate::lifecycle::MessageLifecycle;

/// Local conversation that receives broadcasts and system notices.
pub const SYSTEM_CONTACT_ID: &str = "system";

/// What applying one event did.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// A new inbound message was stored and indexed.
    Inserted(Message),
    /// The message id was already stored.
    Duplicate,
    /// The sender is blocked.
    Dropped,
    Presence { updated: bool },
    Directory,
    Receipt { advanced: bool },
    Reaction { changed: bool },
    Moment { inserted: bool },
}

/// Merges transport events into the store and the conversation index.
#[derive(Clone)]
pub struct SyncReconciler {
    lifecycle: MessageLifecycle,
}

impl SyncReconciler {
    pub fn new(lifecycle: MessageLifecycle) -> Self {
        Self { lifecycle }
    }

    /// Consume events until the stream ends. A failing event is logged and
    /// skipped. Returns how many events applied cleanly.
    pub async fn run<S>(&self, mut events: S) -> usize
    where
        S: Stream<Item = TransportEvent> + Unpin,
    {
        let mut applied = 0;
        while let Some(event) = events.next().await {
            match self.apply(event) {
                Ok(outcome) => {
                    trace!("Applied {:?}", outcome);
                    applied += 1;
                }
                Err(e) => warn!("Failed to apply transport event: {}", e),
            }
        }
        debug!("Transport stream ended after {} events", applied);
        applied
    }

    pub fn apply(&self, event: TransportEvent) -> Result<Applied> {
        match event {
            TransportEvent::Direct(wire) => self.apply_message(wire),
            TransportEvent::Broadcast(mut wire) => {
                ensure_system_contact(&self.lifecycle)?;
                wire.contact_id = SYSTEM_CONTACT_ID.to_string();
                self.apply_message(wire)
            }
            TransportEvent::Presence { user_id, status } => self.apply_presence(&user_id, &status),
            TransportEvent::DirectoryUpsert(entry) => self.apply_directory(entry),
            TransportEvent::Receipt { message_id, state } => {
                let advanced = self.lifecycle.apply_receipt(&message_id, state)?;
                Ok(Applied::Receipt { advanced })
            }
            TransportEvent::Reaction {
                message_id,
                emoji,
                reactor,
                added,
            } => {
                let changed = self.lifecycle.set_reaction(&message_id, &emoji, &reactor, added)?;
                Ok(Applied::Reaction { changed })
            }
            TransportEvent::MomentPosted(moment) => {
                let inserted = self.lifecycle.db().insert_moment(&moment)?;
                if inserted {
                    self.lifecycle.persister().schedule();
                }
                Ok(Applied::Moment { inserted })
            }
        }
    }

    fn apply_message(&self, wire: WireMessage) -> Result<Applied> {
        let db = self.lifecycle.db();

        let contact = match db.get_contact(&wire.contact_id)? {
            Some(contact) => contact,
            None => {
                let contact = contact_from_directory(db.get_directory_entry(&wire.contact_id)?, &wire.contact_id);
                db.upsert_contact(&contact)?;
                debug!("Created contact {} for inbound message", contact.id);
                contact
            }
        };
        if contact.blocked {
            debug!("Dropping message {} from blocked {}", wire.id, contact.id);
            return Ok(Applied::Dropped);
        }

        let Some(message) = self.lifecycle.receive(&wire)? else {
            return Ok(Applied::Duplicate);
        };

        db.touch_contact(&message.contact_id, &message.content, message.timestamp, 1)?;

        // Hydrate first so the cached list includes history, then publish the new row.
        self.lifecycle.conversation(&message.contact_id)?;
        self.lifecycle.index().upsert(message.clone());
        self.lifecycle.persister().schedule();

        Ok(Applied::Inserted(message))
    }

    fn apply_presence(&self, user_id: &str, status: &str) -> Result<Applied> {
        let db = self.lifecycle.db();
        let contact = db.set_contact_status(user_id, status)?;
        let directory = db.set_directory_status(user_id, status)?;

        let updated = contact || directory;
        if updated {
            self.lifecycle.persister().schedule();
        }
        Ok(Applied::Presence { updated })
    }

    fn apply_directory(&self, entry: DirectoryEntry) -> Result<Applied> {
        self.lifecycle.db().upsert_directory_entry(&entry)?;
        self.lifecycle.persister().schedule();
        Ok(Applied::Directory)
    }
}

fn contact_from_directory(entry: Option<DirectoryEntry>, id: &str) -> Contact {
    match entry {
        Some(entry) => Contact {
            avatar: entry.avatar,
            status: entry.status,
            ..Contact::direct(id, entry.name)
        },
        None => Contact::direct(id, id),
    }
}

/// Create the local system conversation if it does not exist yet.
pub fn ensure_system_contact(lifecycle: &MessageLifecycle) -> Result<Contact> {
    let db = lifecycle.db();
    if let Some(contact) = db.get_contact(SYSTEM_CONTACT_ID)? {
        return Ok(contact);
    }

    let contact = Contact {
        kind: ContactKind::System,
        status: "online".to_string(),
        ..Contact::direct(SYSTEM_CONTACT_ID, "System")
    };
    db.upsert_contact(&contact)?;
    lifecycle.persister().schedule();
    Ok(contact)
}
