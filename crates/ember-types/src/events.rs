use serde::{Deserialize, Serialize};

use crate::models::{DeliveryState, DirectoryEntry, Moment, PayloadKind, ReplyRef};

/// A message as it travels over the transport, in either direction.
///
/// Inbound: `contact_id` is the sender. Outbound: `contact_id` is the recipient.
/// `content` is already in envelope-or-plaintext form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub contact_id: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub kind: PayloadKind,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
}

/// Events pushed from the real-time transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransportEvent {
    /// A peer sent us a message
    Direct(WireMessage),

    /// A broadcast/system notice. Lands in the local system conversation.
    Broadcast(WireMessage),

    /// A peer's live status changed
    Presence { user_id: String, status: String },

    /// A directory row was created or replaced
    DirectoryUpsert(DirectoryEntry),

    /// A peer acknowledged one of our outbound messages
    Receipt {
        message_id: String,
        state: DeliveryState,
    },

    /// A peer added or removed a reaction
    Reaction {
        message_id: String,
        emoji: String,
        reactor: String,
        added: bool,
    },

    /// A peer posted a moment
    MomentPosted(Moment),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_event_uses_tagged_layout() {
        let json = r#"{
            "type": "Direct",
            "data": {"id": "1-aa", "contact_id": "bob", "content": "hi", "timestamp": 5}
        }"#;
        let event: TransportEvent = serde_json::from_str(json).unwrap();
        match event {
            TransportEvent::Direct(msg) => {
                assert_eq!(msg.contact_id, "bob");
                assert_eq!(msg.kind, PayloadKind::Text);
                assert!(msg.reply_to.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn receipt_state_is_lowercase() {
        let event = TransportEvent::Receipt {
            message_id: "m".into(),
            state: DeliveryState::Delivered,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["state"], "delivered");
    }
}
