use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, info, warn};

use ember_crypto::{Content, CryptoSession};
use ember_db::{Database, Persister};
use ember_types::api::Draft;
use ember_types::events::WireMessage;
use ember_types::models::{DeliveryState, Direction, Message, PayloadKind, Reactions};

use crate::error::EmberError;
use crate::index::ConversationIndex;
use crate::transport::Transport;
use crate::{Result, now_millis};

/// Drives a message through `sending -> sent -> delivered -> read`.
#[derive(Clone)]
pub struct MessageLifecycle {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    persister: Arc<Persister>,
    crypto: Arc<CryptoSession>,
    index: ConversationIndex,
    transport: Arc<dyn Transport>,
    max_attachment_bytes: u64,
    last_timestamp: AtomicI64,
}

/// An outbound message that is visible in the index as `sending` but not yet
/// encrypted or stored. Finish it with `commit`.
#[must_use = "the message stays in `sending` until committed"]
pub struct PendingSend {
    lifecycle: MessageLifecycle,
    message: Message,
    local_only: bool,
}

impl std::fmt::Debug for PendingSend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSend")
            .field("message", &self.message)
            .field("local_only", &self.local_only)
            .finish_non_exhaustive()
    }
}

impl PendingSend {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }

    /// Encrypt, store as `sent`, then hand the payload to the transport.
    ///
    /// A failure before the row is stored leaves it visible as `failed`.
    /// A transport failure after that is only logged; the row stays `sent`.
    pub async fn commit(self) -> Result<Message> {
        let PendingSend {
            lifecycle,
            message,
            local_only,
        } = self;

        let stored = match lifecycle.store_outbound(&message).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Send of {} to {} failed: {}", message.id, message.contact_id, e);
                lifecycle.mark_failed(&message);
                return Err(e);
            }
        };

        if !local_only {
            lifecycle.push(&stored);
        }
        Ok(stored)
    }
}

impl MessageLifecycle {
    pub fn new(
        persister: Arc<Persister>,
        crypto: Arc<CryptoSession>,
        index: ConversationIndex,
        transport: Arc<dyn Transport>,
        max_attachment_bytes: u64,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                persister,
                crypto,
                index,
                transport,
                max_attachment_bytes,
                last_timestamp: AtomicI64::new(0),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        self.inner.persister.db()
    }

    pub fn persister(&self) -> &Arc<Persister> {
        &self.inner.persister
    }

    pub fn crypto(&self) -> &Arc<CryptoSession> {
        &self.inner.crypto
    }

    pub fn index(&self) -> &ConversationIndex {
        &self.inner.index
    }

    /// The cached conversation, loaded from the store on first access.
    pub fn conversation(&self, contact_id: &str) -> Result<Arc<Vec<Message>>> {
        let db = self.db();
        self.inner
            .index
            .hydrate(contact_id, || db.messages_for_contact(contact_id))
            .map_err(EmberError::from)
    }

    /// Millisecond timestamp that is strictly greater than the last one handed out.
    pub fn next_timestamp(&self) -> i64 {
        let now = now_millis();
        let previous = self
            .inner
            .last_timestamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(previous + 1)
    }

    // -- Outbound --

    /// Validate and show the message as `sending`. Nothing is stored yet.
    pub fn begin_send(&self, contact_id: &str, draft: Draft) -> Result<PendingSend> {
        let db = self.db();

        let contact = db
            .get_contact(contact_id)?
            .ok_or_else(|| EmberError::UnknownConversation(contact_id.to_string()))?;
        if contact.blocked {
            return Err(EmberError::ContactBlocked(contact.name));
        }
        if let Some(profile) = db.get_profile()? {
            if !profile.status.can_send() {
                return Err(EmberError::SenderBlocked(profile.status));
            }
        }
        if draft.is_empty() {
            return Err(EmberError::EmptyMessage);
        }
        if let Some(attachment) = &draft.attachment {
            if attachment.size > self.inner.max_attachment_bytes {
                return Err(EmberError::AttachmentTooLarge {
                    name: attachment.name.clone(),
                    size: attachment.size,
                    limit: self.inner.max_attachment_bytes,
                });
            }
        }

        // Make sure the cached list includes history before the optimistic row lands.
        self.conversation(contact_id)?;

        let timestamp = self.next_timestamp();
        let message = Message {
            id: new_message_id(timestamp),
            contact_id: contact_id.to_string(),
            role: Direction::User,
            content: draft.text,
            timestamp,
            kind: draft.attachment.as_ref().map(|a| a.kind).unwrap_or(PayloadKind::Text),
            media: draft.attachment.map(|a| a.reference),
            reply_to: draft.reply_to,
            state: DeliveryState::Sending,
            reactions: Reactions::new(),
        };

        self.inner.index.upsert(message.clone());
        debug!("Optimistic insert of {} into {}", message.id, contact_id);

        Ok(PendingSend {
            lifecycle: self.clone(),
            message,
            local_only: contact.is_local(),
        })
    }

    /// `begin_send` followed by `commit`.
    pub async fn send(&self, contact_id: &str, draft: Draft) -> Result<Message> {
        self.begin_send(contact_id, draft)?.commit().await
    }

    /// Re-run the store step for a message left in `failed`.
    pub async fn retry(&self, contact_id: &str, id: &str) -> Result<Message> {
        let message = self
            .conversation(contact_id)?
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| EmberError::MessageNotFound(id.to_string()))?;

        if message.state != DeliveryState::Failed {
            return Err(EmberError::InvalidTransition {
                id: id.to_string(),
                from: message.state,
                to: DeliveryState::Sent,
            });
        }

        let contact = self
            .db()
            .get_contact(contact_id)?
            .ok_or_else(|| EmberError::UnknownConversation(contact_id.to_string()))?;

        info!("Retrying {} to {}", id, contact_id);
        PendingSend {
            lifecycle: self.clone(),
            message,
            local_only: contact.is_local(),
        }
        .commit()
        .await
    }

    async fn store_outbound(&self, optimistic: &Message) -> Result<Message> {
        let crypto = self.crypto();
        let content = crypto.seal(&optimistic.content)?;
        let snippet = if optimistic.content.trim().is_empty() {
            crypto.seal(&format!("[{}]", optimistic.kind))?
        } else {
            content.clone()
        };

        let stored = Message {
            content,
            state: DeliveryState::Sent,
            ..optimistic.clone()
        };

        // Run blocking store writes off the async runtime
        let db = Arc::clone(self.db());
        let row = stored.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            db.save_message(&row)?;
            db.touch_contact(&row.contact_id, &snippet, row.timestamp, 0)?;
            Ok(())
        })
        .await??;

        self.inner.index.upsert(stored.clone());
        self.inner.persister.schedule();
        Ok(stored)
    }

    fn mark_failed(&self, message: &Message) {
        self.inner.index.update(&message.contact_id, &message.id, |m| {
            if m.state.can_advance_to(DeliveryState::Failed) {
                m.state = DeliveryState::Failed;
            }
        });
    }

    fn push(&self, stored: &Message) {
        let payload = WireMessage {
            id: stored.id.clone(),
            contact_id: stored.contact_id.clone(),
            content: stored.content.clone(),
            timestamp: stored.timestamp,
            kind: stored.kind,
            media: stored.media.clone(),
            reply_to: stored.reply_to.clone(),
        };
        if let Err(e) = self.inner.transport.send(payload) {
            // Local copy is already durable; delivery is best-effort.
            warn!("Transport did not accept {}: {}", stored.id, e);
        }
    }

    // -- Inbound --

    /// Store an inbound message as `delivered`. Returns `None` when the id is
    /// already known; the transport may redeliver.
    pub fn receive(&self, wire: &WireMessage) -> Result<Option<Message>> {
        let message = Message {
            id: wire.id.clone(),
            contact_id: wire.contact_id.clone(),
            role: Direction::Assistant,
            content: Content::from_peer(&wire.content).to_wire(),
            timestamp: wire.timestamp,
            kind: wire.kind,
            media: wire.media.clone(),
            reply_to: wire.reply_to.clone(),
            state: DeliveryState::Delivered,
            reactions: Reactions::new(),
        };

        if !self.db().insert_message_if_absent(&message)? {
            debug!("Ignoring redelivered message {}", message.id);
            return Ok(None);
        }
        Ok(Some(message))
    }

    /// Mark an inbound message read. Already-read messages are left alone
    /// and reported as `false`.
    pub fn mark_read(&self, id: &str) -> Result<bool> {
        let db = self.db();
        let message = db
            .get_message(id)?
            .ok_or_else(|| EmberError::MessageNotFound(id.to_string()))?;

        if message.state == DeliveryState::Read {
            return Ok(false);
        }
        if !message.is_inbound() {
            return Err(EmberError::InvalidTransition {
                id: id.to_string(),
                from: message.state,
                to: DeliveryState::Read,
            });
        }

        db.update_message_state(id, DeliveryState::Read)?;
        db.refresh_unread(&message.contact_id)?;
        self.inner.index.set_state(&message.contact_id, id, DeliveryState::Read);
        self.inner.persister.schedule();
        Ok(true)
    }

    /// Mark every unread inbound message in a conversation read.
    pub fn mark_conversation_read(&self, contact_id: &str) -> Result<usize> {
        let db = self.db();
        let unread = db.unread_inbound(contact_id)?;
        for message in &unread {
            db.update_message_state(&message.id, DeliveryState::Read)?;
            self.inner.index.set_state(contact_id, &message.id, DeliveryState::Read);
        }
        db.refresh_unread(contact_id)?;

        if !unread.is_empty() {
            self.inner.persister.schedule();
        }
        Ok(unread.len())
    }

    /// Advance an outbound message from a peer's receipt. Receipts that would
    /// move the state backwards, or that name unknown or inbound messages,
    /// are ignored.
    pub fn apply_receipt(&self, id: &str, state: DeliveryState) -> Result<bool> {
        let db = self.db();
        let Some(message) = db.get_message(id)? else {
            debug!("Receipt for unknown message {}", id);
            return Ok(false);
        };
        if message.is_inbound() || !message.state.can_advance_to(state) {
            return Ok(false);
        }

        db.update_message_state(id, state)?;
        self.inner.index.set_state(&message.contact_id, id, state);
        self.inner.persister.schedule();
        Ok(true)
    }

    // -- Reactions --

    /// Add the reactor if absent, remove it if present. Returns true when added.
    pub fn toggle_reaction(&self, id: &str, emoji: &str, reactor: &str) -> Result<bool> {
        let message = self
            .db()
            .get_message(id)?
            .ok_or_else(|| EmberError::MessageNotFound(id.to_string()))?;
        let present = message
            .reactions
            .get(emoji)
            .is_some_and(|names| names.contains(reactor));

        self.set_reaction(id, emoji, reactor, !present)?;
        Ok(!present)
    }

    /// Make `reactor`'s `emoji` present or absent. Returns whether anything changed.
    pub fn set_reaction(&self, id: &str, emoji: &str, reactor: &str, present: bool) -> Result<bool> {
        let db = self.db();
        let mut message = db
            .get_message(id)?
            .ok_or_else(|| EmberError::MessageNotFound(id.to_string()))?;

        let changed = if present {
            message
                .reactions
                .entry(emoji.to_string())
                .or_default()
                .insert(reactor.to_string())
        } else {
            let removed = message
                .reactions
                .get_mut(emoji)
                .is_some_and(|names| names.remove(reactor));
            if message.reactions.get(emoji).is_some_and(|names| names.is_empty()) {
                message.reactions.remove(emoji);
            }
            removed
        };
        if !changed {
            return Ok(false);
        }

        db.set_reactions(id, &message.reactions)?;
        let reactions = message.reactions.clone();
        self.inner
            .index
            .update(&message.contact_id, id, move |m| m.reactions = reactions);
        self.inner.persister.schedule();
        Ok(true)
    }
}

/// `<millis>-<8 hex>`: sortable by time, unique within a conversation.
pub fn new_message_id(timestamp: i64) -> String {
    format!("{}-{}", timestamp, hex::encode(rand::random::<[u8; 4]>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_carry_their_timestamp() {
        let id = new_message_id(1_700_000_000_000);
        let (ts, suffix) = id.split_once('-').unwrap();
        assert_eq!(ts, "1700000000000");
        assert_eq!(suffix.len(), 8);
        assert_ne!(new_message_id(1), new_message_id(1));
    }
}
