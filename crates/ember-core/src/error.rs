use ember_crypto::CryptoError;
use ember_types::models::{AccountStatus, DeliveryState};

#[derive(Debug, thiserror::Error)]
pub enum EmberError {
    // -- Validation: rejected before any state changes --
    #[error("conversation {0} does not exist")]
    UnknownConversation(String),

    #[error("your account is {0} and cannot send messages")]
    SenderBlocked(AccountStatus),

    #[error("{0} is blocked")]
    ContactBlocked(String),

    #[error("attachment {name} is {size} bytes, the limit is {limit}")]
    AttachmentTooLarge { name: String, size: u64, limit: u64 },

    #[error("message is empty")]
    EmptyMessage,

    #[error("display name must not be empty")]
    InvalidProfile,

    // -- Lookups and transitions --
    #[error("message {0} not found")]
    MessageNotFound(String),

    #[error("message {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: DeliveryState,
        to: DeliveryState,
    },

    #[error("no profile registered")]
    NoProfile,

    #[error("a profile is already registered")]
    AlreadyRegistered,

    #[error("invalid credentials")]
    InvalidCredentials,

    // -- Local failures --
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EmberError {
    /// Errors the UI should show as a message next to the input rather than
    /// as a failed row.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownConversation(_)
                | Self::SenderBlocked(_)
                | Self::ContactBlocked(_)
                | Self::AttachmentTooLarge { .. }
                | Self::EmptyMessage
                | Self::InvalidProfile
        )
    }
}
