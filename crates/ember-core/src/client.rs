use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use ember_crypto::CryptoSession;
use ember_db::{FileStorage, Persister, SnapshotStorage};
use ember_types::api::Draft;
use ember_types::models::{Contact, Message, Profile};

use crate::accounts::Accounts;
use crate::config::Config;
use crate::contacts::Contacts;
use crate::error::EmberError;
use crate::index::{ConversationChanged, ConversationIndex};
use crate::lifecycle::{MessageLifecycle, PendingSend};
use crate::moments::Moments;
use crate::reconciler::{SyncReconciler, ensure_system_contact};
use crate::transport::Transport;
use crate::Result;

/// Entry point for the app shell.
pub struct Ember {
    config: Config,
    persister: Arc<Persister>,
    crypto: Arc<CryptoSession>,
    lifecycle: MessageLifecycle,
    reconciler: SyncReconciler,
    accounts: Accounts,
    contacts: Contacts,
    moments: Moments,
}

impl Ember {
    /// Bring the store up from `storage` and wire every component to it.
    pub fn open(config: Config, storage: Arc<dyn SnapshotStorage>, transport: Arc<dyn Transport>) -> Result<Self> {
        let persister = Persister::load(storage, &config.snapshot_key)?;
        let crypto = Arc::new(CryptoSession::new(config.kdf_iterations));
        let index = ConversationIndex::new();

        let lifecycle = MessageLifecycle::new(
            Arc::clone(&persister),
            Arc::clone(&crypto),
            index,
            transport,
            config.max_attachment_bytes,
        );
        ensure_system_contact(&lifecycle)?;

        info!("Ember opened ({:?})", persister.outcome());
        Ok(Self {
            reconciler: SyncReconciler::new(lifecycle.clone()),
            accounts: Accounts::new(Arc::clone(&persister), Arc::clone(&crypto)),
            contacts: Contacts::new(Arc::clone(&persister)),
            moments: Moments::new(Arc::clone(&persister)),
            config,
            persister,
            crypto,
            lifecycle,
        })
    }

    /// Open with file-backed storage in `config.data_dir`.
    pub fn open_in_dir(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let storage = FileStorage::open(&config.data_dir)?;
        Self::open(config, Arc::new(storage), transport)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn persister(&self) -> &Arc<Persister> {
        &self.persister
    }

    pub fn crypto(&self) -> &Arc<CryptoSession> {
        &self.crypto
    }

    pub fn lifecycle(&self) -> &MessageLifecycle {
        &self.lifecycle
    }

    pub fn reconciler(&self) -> &SyncReconciler {
        &self.reconciler
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn contacts(&self) -> &Contacts {
        &self.contacts
    }

    pub fn moments(&self) -> &Moments {
        &self.moments
    }

    // -- Session --

    pub async fn login(&self, secret: &str) -> Result<Profile> {
        self.accounts.login(secret).await
    }

    pub fn logout(&self) {
        self.accounts.logout();
    }

    // -- Conversations --

    /// A conversation in display order with content decrypted. Rows that
    /// cannot be opened read as `ember_crypto::UNAVAILABLE`.
    pub fn get_conversation(&self, contact_id: &str) -> Result<Vec<Message>> {
        if self.contacts.get(contact_id)?.is_none() {
            return Err(EmberError::UnknownConversation(contact_id.to_string()));
        }

        let list = self.lifecycle.conversation(contact_id)?;
        Ok(list
            .iter()
            .map(|message| Message {
                content: self.crypto.decrypt(&message.content),
                ..message.clone()
            })
            .collect())
    }

    /// Contacts with their last-message snippet decrypted.
    pub fn contact_list(&self) -> Result<Vec<Contact>> {
        Ok(self
            .contacts
            .list()?
            .into_iter()
            .map(|contact| Contact {
                last_message: contact.last_message.as_deref().map(|s| self.crypto.decrypt(s)),
                ..contact
            })
            .collect())
    }

    /// Notified whenever a conversation's cached list changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationChanged> {
        self.lifecycle.index().subscribe()
    }

    pub fn begin_send(&self, contact_id: &str, draft: Draft) -> Result<PendingSend> {
        self.lifecycle.begin_send(contact_id, draft)
    }

    pub async fn send(&self, contact_id: &str, draft: Draft) -> Result<Message> {
        self.lifecycle.send(contact_id, draft).await
    }

    pub async fn retry(&self, contact_id: &str, id: &str) -> Result<Message> {
        self.lifecycle.retry(contact_id, id).await
    }

    pub fn mark_read(&self, id: &str) -> Result<bool> {
        self.lifecycle.mark_read(id)
    }

    pub fn mark_conversation_read(&self, contact_id: &str) -> Result<usize> {
        self.lifecycle.mark_conversation_read(contact_id)
    }

    /// React as the local profile.
    pub fn toggle_reaction(&self, id: &str, emoji: &str) -> Result<bool> {
        let profile = self.accounts.profile()?.ok_or(EmberError::NoProfile)?;
        self.lifecycle.toggle_reaction(id, emoji, &profile.display_name)
    }

    /// Create a group owned by the local profile.
    pub fn create_group(&self, name: &str, members: Vec<String>) -> Result<Contact> {
        let profile = self.accounts.profile()?.ok_or(EmberError::NoProfile)?;
        self.contacts.create_group(&profile.id, name, members)
    }

    /// Write any pending snapshot now. Call before the process exits.
    pub fn flush(&self) -> Result<()> {
        Ok(self.persister.flush()?)
    }
}
