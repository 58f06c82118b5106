use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tokio::sync::broadcast;

use ember_types::models::{DeliveryState, Message};

/// Announced after a conversation's list reference is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationChanged {
    pub contact_id: String,
}

/// In-memory view of each conversation: contact id -> messages in
/// `(timestamp, id)` order.
///
/// This is a cache of the store plus optimistic rows that have not been
/// written yet. Lists are never mutated in place while shared: every change
/// builds a sorted list and swaps the `Arc`, so a reader holding a list never
/// sees it half-updated or unsorted.
#[derive(Clone)]
pub struct ConversationIndex {
    inner: Arc<IndexInner>,
}

struct IndexInner {
    conversations: RwLock<HashMap<String, Arc<Vec<Message>>>>,
    changes: broadcast::Sender<ConversationChanged>,
}

impl Default for ConversationIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationIndex {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(IndexInner {
                conversations: RwLock::new(HashMap::new()),
                changes,
            }),
        }
    }

    /// Receive a notification whenever a conversation changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationChanged> {
        self.inner.changes.subscribe()
    }

    pub fn get(&self, contact_id: &str) -> Option<Arc<Vec<Message>>> {
        let conversations = self.inner.conversations.read().unwrap_or_else(|e| e.into_inner());
        conversations.get(contact_id).cloned()
    }

    /// Return the cached conversation, or build it from `load` the first time.
    /// A list that appeared while `load` ran wins over the loaded one.
    pub fn hydrate<F, E>(&self, contact_id: &str, load: F) -> Result<Arc<Vec<Message>>, E>
    where
        F: FnOnce() -> Result<Vec<Message>, E>,
    {
        if let Some(existing) = self.get(contact_id) {
            return Ok(existing);
        }

        let mut messages = load()?;
        sort_conversation(&mut messages);

        let mut conversations = self.write();
        let list = conversations
            .entry(contact_id.to_string())
            .or_insert_with(|| Arc::new(messages))
            .clone();
        Ok(list)
    }

    /// Insert a message, or replace the row with the same id.
    pub fn upsert(&self, message: Message) {
        let contact_id = message.contact_id.clone();
        {
            let mut conversations = self.write();
            let current = conversations.entry(contact_id.clone()).or_default();

            let mut next: Vec<Message> = current.iter().filter(|m| m.id != message.id).cloned().collect();
            next.push(message);
            sort_conversation(&mut next);
            *current = Arc::new(next);
        }
        self.notify(contact_id);
    }

    /// Edit one message in a loaded conversation. Returns false when the
    /// conversation is not cached or the id is not in it.
    pub fn update<F>(&self, contact_id: &str, id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let updated = {
            let mut conversations = self.write();
            let Some(current) = conversations.get_mut(contact_id) else {
                return false;
            };
            let Some(pos) = current.iter().position(|m| m.id == id) else {
                return false;
            };

            let mut next: Vec<Message> = current.as_ref().clone();
            edit(&mut next[pos]);
            sort_conversation(&mut next);
            *current = Arc::new(next);
            true
        };

        if updated {
            self.notify(contact_id.to_string());
        }
        updated
    }

    pub fn set_state(&self, contact_id: &str, id: &str, state: DeliveryState) -> bool {
        self.update(contact_id, id, |m| m.state = state)
    }

    pub fn find(&self, contact_id: &str, id: &str) -> Option<Message> {
        self.get(contact_id)?.iter().find(|m| m.id == id).cloned()
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Vec<Message>>>> {
        self.inner.conversations.write().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, contact_id: String) {
        // No subscribers is fine.
        let _ = self.inner.changes.send(ConversationChanged { contact_id });
    }
}

/// Stable sort by timestamp, id as tiebreak.
pub fn sort_conversation(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::models::{Direction, PayloadKind, Reactions};

    fn msg(id: &str, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            contact_id: "bob".to_string(),
            role: Direction::Assistant,
            content: id.to_string(),
            timestamp: ts,
            kind: PayloadKind::Text,
            media: None,
            reply_to: None,
            state: DeliveryState::Delivered,
            reactions: Reactions::new(),
        }
    }

    fn ids(index: &ConversationIndex) -> Vec<String> {
        index.get("bob").unwrap().iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn upsert_keeps_order() {
        let index = ConversationIndex::new();
        index.upsert(msg("c", 30));
        index.upsert(msg("a", 10));
        index.upsert(msg("b2", 20));
        index.upsert(msg("b1", 20));
        assert_eq!(ids(&index), ["a", "b1", "b2", "c"]);
    }

    #[test]
    fn upsert_replaces_same_id() {
        let index = ConversationIndex::new();
        index.upsert(msg("a", 10));
        let mut replacement = msg("a", 10);
        replacement.state = DeliveryState::Read;
        index.upsert(replacement);

        let list = index.get("bob").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].state, DeliveryState::Read);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let index = ConversationIndex::new();
        index.upsert(msg("a", 10));
        let before = index.get("bob").unwrap();
        index.upsert(msg("b", 5));

        assert_eq!(before.len(), 1);
        assert_eq!(ids(&index), ["b", "a"]);
    }

    #[test]
    fn hydrate_loads_once() {
        let index = ConversationIndex::new();
        let first = index
            .hydrate("bob", || Ok::<_, ()>(vec![msg("z", 2), msg("y", 1)]))
            .unwrap();
        assert_eq!(first[0].id, "y");

        let second = index
            .hydrate("bob", || -> Result<Vec<Message>, ()> { panic!("must not reload") })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn update_on_unknown_conversation_is_noop() {
        let index = ConversationIndex::new();
        assert!(!index.set_state("nobody", "x", DeliveryState::Read));
    }

    #[tokio::test]
    async fn subscribers_hear_changes() {
        let index = ConversationIndex::new();
        let mut rx = index.subscribe();
        index.upsert(msg("a", 1));
        assert_eq!(rx.recv().await.unwrap().contact_id, "bob");
    }
}
