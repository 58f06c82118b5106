use serde::{Deserialize, Serialize};

use crate::models::{PayloadKind, ReplyRef};

/// Hard ceiling on a single attachment.
pub const MAX_ATTACHMENT_BYTES: u64 = 50 * 1024 * 1024;

// -- Sending --

/// Reference to media the app shell already stored somewhere.
/// Binary content never passes through the cipher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: PayloadKind,
    pub name: String,
    pub size: u64,
    pub reference: String,
}

/// What the UI hands to `send`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<ReplyRef>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn replying_to(mut self, reply: ReplyRef) -> Self {
        self.reply_to = Some(reply);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }
}

// -- Registration --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub display_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub secret: String,
}

/// Partial profile edit. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub settings: Option<serde_json::Value>,
}
