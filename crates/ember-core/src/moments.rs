use std::sync::Arc;

use uuid::Uuid;

use ember_db::Persister;
use ember_types::models::Moment;

use crate::error::EmberError;
use crate::{Result, now_millis};

/// Social posts. Stored in the clear; they are public by nature.
#[derive(Clone)]
pub struct Moments {
    persister: Arc<Persister>,
}

impl Moments {
    pub fn new(persister: Arc<Persister>) -> Self {
        Self { persister }
    }

    /// Post as the local profile.
    pub fn post(&self, content: &str, media: Option<String>) -> Result<Moment> {
        let db = self.persister.db();
        let profile = db.get_profile()?.ok_or(EmberError::NoProfile)?;
        if content.trim().is_empty() && media.is_none() {
            return Err(EmberError::EmptyMessage);
        }

        let moment = Moment {
            id: Uuid::new_v4().to_string(),
            author_id: profile.id,
            author_name: profile.display_name,
            author_avatar: profile.avatar,
            content: content.to_string(),
            media,
            timestamp: now_millis(),
        };
        db.insert_moment(&moment)?;
        self.persister.schedule();
        Ok(moment)
    }

    /// Newest first.
    pub fn list(&self, limit: u32) -> Result<Vec<Moment>> {
        Ok(self.persister.db().list_moments(limit)?)
    }
}
