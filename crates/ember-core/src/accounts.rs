use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::info;
use uuid::Uuid;

use ember_crypto::{CryptoError, CryptoSession, keys};
use ember_db::Persister;
use ember_types::api::{ProfileUpdate, RegisterRequest};
use ember_types::models::{AccountStatus, AccountType, Profile, Role};

use crate::error::EmberError;
use crate::{Result, now_millis};

/// The local identity and the session key derived from its secret.
#[derive(Clone)]
pub struct Accounts {
    persister: Arc<Persister>,
    crypto: Arc<CryptoSession>,
}

impl Accounts {
    pub fn new(persister: Arc<Persister>, crypto: Arc<CryptoSession>) -> Self {
        Self { persister, crypto }
    }

    pub fn profile(&self) -> Result<Option<Profile>> {
        Ok(self.persister.db().get_profile()?)
    }

    fn require_profile(&self) -> Result<Profile> {
        self.profile()?.ok_or(EmberError::NoProfile)
    }

    /// Create the local profile. Only the Argon2 hash of the secret is kept.
    pub fn register(&self, req: RegisterRequest) -> Result<Profile> {
        if req.display_name.trim().is_empty() {
            return Err(EmberError::InvalidProfile);
        }
        if req.secret.is_empty() {
            return Err(CryptoError::EmptySecret.into());
        }
        if self.profile()?.is_some() {
            return Err(EmberError::AlreadyRegistered);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.secret.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("hashing secret: {}", e))?
            .to_string();

        let profile = Profile {
            id: Uuid::new_v4().to_string(),
            display_name: req.display_name.trim().to_string(),
            phone: req.phone,
            email: req.email,
            password_hash,
            bio: String::new(),
            avatar: None,
            role: Role::User,
            account_type: AccountType::Personal,
            status: AccountStatus::Active,
            settings: serde_json::json!({}),
            key_salt: keys::generate_salt(),
            created_at: now_millis(),
        };

        self.persister.db().insert_profile(&profile)?;
        self.persister.schedule();
        info!("Registered profile {}", profile.id);
        Ok(profile)
    }

    /// Check the secret against the stored hash, then derive the session key from it.
    pub async fn login(&self, secret: &str) -> Result<Profile> {
        let profile = self.require_profile()?;

        let parsed_hash = PasswordHash::new(&profile.password_hash)
            .map_err(|e| anyhow::anyhow!("stored hash unreadable: {}", e))?;
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed_hash)
            .map_err(|_| EmberError::InvalidCredentials)?;

        let salt = keys::salt_from_base64(&profile.key_salt)?;
        self.crypto.derive_key(secret, &salt).await?;

        info!("{} logged in", profile.display_name);
        Ok(profile)
    }

    pub fn logout(&self) {
        self.crypto.clear();
    }

    pub fn update(&self, update: ProfileUpdate) -> Result<Profile> {
        let mut profile = self.require_profile()?;

        if let Some(name) = update.display_name {
            if name.trim().is_empty() {
                return Err(EmberError::InvalidProfile);
            }
            profile.display_name = name.trim().to_string();
        }
        if let Some(bio) = update.bio {
            profile.bio = bio;
        }
        if let Some(avatar) = update.avatar {
            profile.avatar = Some(avatar);
        }
        if let Some(phone) = update.phone {
            profile.phone = Some(phone);
        }
        if let Some(email) = update.email {
            profile.email = Some(email);
        }
        if let Some(settings) = update.settings {
            profile.settings = settings;
        }

        self.persister.db().update_profile(&profile)?;
        self.persister.schedule();
        Ok(profile)
    }

    /// Record a moderation status pushed by the account service.
    pub fn set_status(&self, status: AccountStatus) -> Result<()> {
        let profile = self.require_profile()?;
        self.persister.db().set_account_status(&profile.id, status)?;
        self.persister.schedule();
        info!("Account status is now {}", status);
        Ok(())
    }
}
