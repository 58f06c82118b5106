#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

use ember_core::{ChannelTransport, Config, Ember};
use ember_crypto::SessionKey;
use ember_crypto::keys::MIN_ITERATIONS;
use ember_db::MemoryStorage;
use ember_types::events::{TransportEvent, WireMessage};
use ember_types::models::Message;

pub fn config() -> Config {
    Config {
        kdf_iterations: MIN_ITERATIONS,
        ..Config::default()
    }
}

/// A client over in-memory storage. The receiver sees everything pushed to the transport.
pub fn open() -> (Ember, MemoryStorage, mpsc::UnboundedReceiver<WireMessage>) {
    let storage = MemoryStorage::new();
    let (ember, outbox) = reopen(&storage);
    (ember, storage, outbox)
}

/// Open a second client over the same storage, as after an app restart.
pub fn reopen(storage: &MemoryStorage) -> (Ember, mpsc::UnboundedReceiver<WireMessage>) {
    let (transport, outbox) = ChannelTransport::new();
    let ember = Ember::open(config(), Arc::new(storage.clone()), Arc::new(transport)).unwrap();
    (ember, outbox)
}

pub fn test_key() -> SessionKey {
    SessionKey::from_bytes([7u8; 32])
}

pub fn wire(id: &str, from: &str, content: &str, timestamp: i64) -> WireMessage {
    WireMessage {
        id: id.to_string(),
        contact_id: from.to_string(),
        content: content.to_string(),
        timestamp,
        kind: Default::default(),
        media: None,
        reply_to: None,
    }
}

pub fn direct(id: &str, from: &str, content: &str, timestamp: i64) -> TransportEvent {
    TransportEvent::Direct(wire(id, from, content, timestamp))
}

/// Rows as the store holds them, without decryption.
pub fn stored(ember: &Ember, contact_id: &str) -> Vec<Message> {
    ember.persister().db().messages_for_contact(contact_id).unwrap()
}

pub fn cached_len(ember: &Ember, contact_id: &str) -> usize {
    ember
        .lifecycle()
        .index()
        .get(contact_id)
        .map_or(0, |list| list.len())
}
