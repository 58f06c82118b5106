//! Local-first conversational data layer.
//!
//! `Ember` ties together the embedded store, the snapshot persister, the
//! cipher session, the message lifecycle and the sync reconciler. The app
//! shell talks to `Ember`; the transport feeds `SyncReconciler`.

pub mod accounts;
pub mod client;
pub mod config;
pub mod contacts;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod moments;
pub mod reconciler;
pub mod transport;

pub use client::Ember;
pub use config::Config;
pub use error::EmberError;
pub use index::{ConversationChanged, ConversationIndex};
pub use lifecycle::{MessageLifecycle, PendingSend};
pub use reconciler::{Applied, SyncReconciler};
pub use transport::{ChannelTransport, NullTransport, Transport, TransportError};

pub type Result<T, E = EmberError> = std::result::Result<T, E>;

/// Wall clock in milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
