use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Generates `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// variants map one-to-one onto lowercase column values.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// -- Profile --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

text_enum!(Role, "role", { User => "user", Admin => "admin" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Personal,
    Business,
}

text_enum!(AccountType, "account type", { Personal => "personal", Business => "business" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Warned,
    Suspended,
    Banned,
}

text_enum!(AccountStatus, "account status", {
    Active => "active",
    Warned => "warned",
    Suspended => "suspended",
    Banned => "banned",
});

impl AccountStatus {
    /// Suspended and banned accounts may not send. Warned accounts still can.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Active | Self::Warned)
    }
}

/// The local identity. There is at most one per store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Argon2 PHC string. The plaintext secret is never stored.
    pub password_hash: String,
    pub bio: String,
    pub avatar: Option<String>,
    pub role: Role,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub settings: serde_json::Value,
    /// Base64 salt fed to key derivation at login.
    pub key_salt: String,
    pub created_at: i64,
}

// -- Contacts --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    #[default]
    Direct,
    Group,
    /// Local-only conversation (broadcasts, system notices). Never pushed to the transport.
    System,
}

text_enum!(ContactKind, "contact kind", {
    Direct => "direct",
    Group => "group",
    System => "system",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub status: String,
    /// Snippet in the same envelope-or-plaintext form as message content.
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    pub members: Vec<String>,
    pub owner_id: Option<String>,
    pub kind: ContactKind,
    pub blocked: bool,
    pub hidden: bool,
    pub unread: u32,
}

impl Contact {
    pub fn direct(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
            status: "offline".to_string(),
            last_message: None,
            last_message_at: None,
            members: Vec::new(),
            owner_id: None,
            kind: ContactKind::Direct,
            blocked: false,
            hidden: false,
            unread: 0,
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind == ContactKind::System
    }
}

// -- Messages --

/// Who authored a message, from the local user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Outbound, written by the local user.
    User,
    /// Inbound, received from a peer or the system.
    Assistant,
}

text_enum!(Direction, "direction", { User => "user", Assistant => "assistant" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    File,
}

text_enum!(PayloadKind, "payload kind", {
    Text => "text",
    Image => "image",
    Audio => "audio",
    Video => "video",
    File => "file",
});

/// Delivery state machine:
///
/// ```text
/// sending -> sent -> delivered -> read
///    \
///     -> failed -> sent (retry only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

text_enum!(DeliveryState, "delivery state", {
    Sending => "sending",
    Sent => "sent",
    Delivered => "delivered",
    Read => "read",
    Failed => "failed",
});

impl DeliveryState {
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Sending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    /// Whether `self -> next` is a legal forward move.
    pub fn can_advance_to(&self, next: DeliveryState) -> bool {
        match (self, next) {
            (Self::Sending, Self::Failed) => true,
            (Self::Failed, Self::Sent) => true,
            (Self::Failed, _) | (_, Self::Failed) => false,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub id: String,
    pub snippet: String,
}

/// emoji -> reactor names
pub type Reactions = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub contact_id: String,
    pub role: Direction,
    /// Envelope (`v1:...`) or plaintext.
    pub content: String,
    pub timestamp: i64,
    pub kind: PayloadKind,
    pub media: Option<String>,
    pub reply_to: Option<ReplyRef>,
    pub state: DeliveryState,
    #[serde(default)]
    pub reactions: Reactions,
}

impl Message {
    pub fn is_inbound(&self) -> bool {
        self.role == Direction::Assistant
    }

    /// Conversation order: timestamp, then id.
    pub fn order_key(&self) -> (i64, &str) {
        (self.timestamp, self.id.as_str())
    }
}

// -- Moments --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moment {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub content: String,
    pub media: Option<String>,
    pub timestamp: i64,
}

// -- Directory --

/// Cached public profile of a remote peer. Never authoritative for the local identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_status() -> String {
    "offline".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_state_moves_forward_only() {
        use DeliveryState::*;

        assert!(Sending.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Delivered));
        assert!(Sent.can_advance_to(Read));
        assert!(Delivered.can_advance_to(Read));

        assert!(!Read.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(!Read.can_advance_to(Read));
    }

    #[test]
    fn failed_only_from_sending_and_only_back_to_sent() {
        use DeliveryState::*;

        assert!(Sending.can_advance_to(Failed));
        assert!(!Sent.can_advance_to(Failed));
        assert!(!Read.can_advance_to(Failed));

        assert!(Failed.can_advance_to(Sent));
        assert!(!Failed.can_advance_to(Sending));
        assert!(!Failed.can_advance_to(Read));
    }

    #[test]
    fn enums_roundtrip_through_text() {
        assert_eq!("warned".parse::<AccountStatus>().unwrap(), AccountStatus::Warned);
        assert_eq!(Direction::Assistant.as_str(), "assistant");
        assert!("sideways".parse::<DeliveryState>().is_err());
    }

    #[test]
    fn warned_accounts_can_still_send() {
        assert!(AccountStatus::Warned.can_send());
        assert!(!AccountStatus::Suspended.can_send());
        assert!(!AccountStatus::Banned.can_send());
    }
}
