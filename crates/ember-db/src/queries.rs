use anyhow::Result;
use rusqlite::params;

use ember_types::models::{
    AccountStatus, Contact, DeliveryState, DirectoryEntry, Direction, Message, Moment, Profile, Reactions,
};

use crate::Database;

const PROFILE_COLUMNS: &str = "id, display_name, phone, email, password_hash, bio, avatar, role, \
     account_type, status, settings, key_salt, created_at";

const CONTACT_COLUMNS: &str = "id, name, avatar, status, last_message, last_message_at, members, \
     owner_id, kind, blocked, hidden, unread";

const MESSAGE_COLUMNS: &str = "id, contact_id, role, content, timestamp, kind, media, \
     reply_to_id, reply_snippet, state, reactions";

const MOMENT_COLUMNS: &str = "id, author_id, author_name, author_avatar, content, media, timestamp";

const DIRECTORY_COLUMNS: &str = "id, name, avatar, bio, status, updated_at";

impl Database {
    // -- Profile --

    pub fn insert_profile(&self, profile: &Profile) -> Result<()> {
        self.execute(
            &format!(
                "INSERT INTO profile ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                PROFILE_COLUMNS
            ),
            params![
                profile.id,
                profile.display_name,
                profile.phone,
                profile.email,
                profile.password_hash,
                profile.bio,
                profile.avatar,
                profile.role.as_str(),
                profile.account_type.as_str(),
                profile.status.as_str(),
                profile.settings.to_string(),
                profile.key_salt,
                profile.created_at,
            ],
        )?;
        Ok(())
    }

    /// The local identity, if one has been registered.
    pub fn get_profile(&self) -> Result<Option<Profile>> {
        self.query_one(
            &format!("SELECT {} FROM profile ORDER BY created_at LIMIT 1", PROFILE_COLUMNS),
            [],
        )
    }

    /// Overwrite the editable profile fields. Identity, hash and salt are fixed at registration.
    pub fn update_profile(&self, profile: &Profile) -> Result<bool> {
        let changed = self.execute(
            "UPDATE profile SET display_name = ?2, phone = ?3, email = ?4, bio = ?5, avatar = ?6,
                 role = ?7, account_type = ?8, settings = ?9
             WHERE id = ?1",
            params![
                profile.id,
                profile.display_name,
                profile.phone,
                profile.email,
                profile.bio,
                profile.avatar,
                profile.role.as_str(),
                profile.account_type.as_str(),
                profile.settings.to_string(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn set_account_status(&self, id: &str, status: AccountStatus) -> Result<bool> {
        let changed = self.execute(
            "UPDATE profile SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(changed == 1)
    }

    // -- Contacts --

    /// Insert a contact, or replace everything but its counters and last-message fields.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.execute(
            &format!(
                "INSERT INTO contacts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     avatar = excluded.avatar,
                     status = excluded.status,
                     members = excluded.members,
                     owner_id = excluded.owner_id,
                     kind = excluded.kind,
                     blocked = excluded.blocked,
                     hidden = excluded.hidden",
                CONTACT_COLUMNS
            ),
            params![
                contact.id,
                contact.name,
                contact.avatar,
                contact.status,
                contact.last_message,
                contact.last_message_at,
                serde_json::to_string(&contact.members)?,
                contact.owner_id,
                contact.kind.as_str(),
                contact.blocked,
                contact.hidden,
                contact.unread,
            ],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, id: &str) -> Result<Option<Contact>> {
        self.query_one(
            &format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLUMNS),
            [id],
        )
    }

    /// Contacts ordered by most recent activity; hidden ones only when asked for.
    pub fn list_contacts(&self, include_hidden: bool) -> Result<Vec<Contact>> {
        self.query(
            &format!(
                "SELECT {} FROM contacts
                 WHERE hidden = 0 OR ?1
                 ORDER BY COALESCE(last_message_at, 0) DESC, name ASC",
                CONTACT_COLUMNS
            ),
            [include_hidden],
        )
    }

    pub fn set_contact_blocked(&self, id: &str, blocked: bool) -> Result<bool> {
        let changed = self.execute("UPDATE contacts SET blocked = ?2 WHERE id = ?1", params![id, blocked])?;
        Ok(changed == 1)
    }

    pub fn set_contact_hidden(&self, id: &str, hidden: bool) -> Result<bool> {
        let changed = self.execute("UPDATE contacts SET hidden = ?2 WHERE id = ?1", params![id, hidden])?;
        Ok(changed == 1)
    }

    pub fn set_contact_status(&self, id: &str, status: &str) -> Result<bool> {
        let changed = self.execute("UPDATE contacts SET status = ?2 WHERE id = ?1", params![id, status])?;
        Ok(changed == 1)
    }

    /// Record a new message on the contact. The snippet only moves forward in
    /// time, so a late-arriving older message never replaces a newer snippet.
    pub fn touch_contact(&self, id: &str, snippet: &str, at: i64, unread_delta: u32) -> Result<bool> {
        let changed = self.execute(
            "UPDATE contacts SET
                 last_message = CASE
                     WHEN last_message_at IS NULL OR ?3 >= last_message_at THEN ?2
                     ELSE last_message END,
                 last_message_at = MAX(COALESCE(last_message_at, ?3), ?3),
                 unread = unread + ?4
             WHERE id = ?1",
            params![id, snippet, at, unread_delta],
        )?;
        Ok(changed == 1)
    }

    /// Recount unread inbound messages for a contact and store the result.
    pub fn refresh_unread(&self, id: &str) -> Result<u32> {
        self.execute(
            "UPDATE contacts SET unread = (
                 SELECT COUNT(*) FROM messages
                 WHERE contact_id = ?1 AND role = ?2 AND state != ?3
             ) WHERE id = ?1",
            params![id, Direction::Assistant.as_str(), DeliveryState::Read.as_str()],
        )?;
        let count: Option<i64> = self.query_one("SELECT unread FROM contacts WHERE id = ?1", [id])?;
        Ok(count.unwrap_or(0) as u32)
    }

    // -- Messages --

    /// Insert a message unless its id is already stored. Returns whether a row was written.
    pub fn insert_message_if_absent(&self, message: &Message) -> Result<bool> {
        let changed = self.execute(
            &format!(
                "INSERT OR IGNORE INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                MESSAGE_COLUMNS
            ),
            message_params(message)?,
        )?;
        Ok(changed == 1)
    }

    /// Write an outbound message, replacing content and state if a previous
    /// attempt already stored the row.
    pub fn save_message(&self, message: &Message) -> Result<()> {
        self.execute(
            &format!(
                "INSERT INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET content = excluded.content, state = excluded.state",
                MESSAGE_COLUMNS
            ),
            message_params(message)?,
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.query_one(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            [id],
        )
    }

    /// A conversation in display order.
    pub fn messages_for_contact(&self, contact_id: &str) -> Result<Vec<Message>> {
        self.query(
            &format!(
                "SELECT {} FROM messages WHERE contact_id = ?1 ORDER BY timestamp ASC, id ASC",
                MESSAGE_COLUMNS
            ),
            [contact_id],
        )
    }

    pub fn unread_inbound(&self, contact_id: &str) -> Result<Vec<Message>> {
        self.query(
            &format!(
                "SELECT {} FROM messages
                 WHERE contact_id = ?1 AND role = ?2 AND state != ?3
                 ORDER BY timestamp ASC, id ASC",
                MESSAGE_COLUMNS
            ),
            params![contact_id, Direction::Assistant.as_str(), DeliveryState::Read.as_str()],
        )
    }

    pub fn update_message_state(&self, id: &str, state: DeliveryState) -> Result<bool> {
        let changed = self.execute(
            "UPDATE messages SET state = ?2 WHERE id = ?1",
            params![id, state.as_str()],
        )?;
        Ok(changed == 1)
    }

    pub fn set_reactions(&self, id: &str, reactions: &Reactions) -> Result<bool> {
        let changed = self.execute(
            "UPDATE messages SET reactions = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(reactions)?],
        )?;
        Ok(changed == 1)
    }

    // -- Moments --

    pub fn insert_moment(&self, moment: &Moment) -> Result<bool> {
        let changed = self.execute(
            &format!(
                "INSERT OR IGNORE INTO moments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                MOMENT_COLUMNS
            ),
            params![
                moment.id,
                moment.author_id,
                moment.author_name,
                moment.author_avatar,
                moment.content,
                moment.media,
                moment.timestamp,
            ],
        )?;
        Ok(changed == 1)
    }

    /// Newest first.
    pub fn list_moments(&self, limit: u32) -> Result<Vec<Moment>> {
        self.query(
            &format!(
                "SELECT {} FROM moments ORDER BY timestamp DESC, id DESC LIMIT ?1",
                MOMENT_COLUMNS
            ),
            [limit],
        )
    }

    // -- Directory --

    pub fn upsert_directory_entry(&self, entry: &DirectoryEntry) -> Result<()> {
        self.execute(
            &format!(
                "INSERT OR REPLACE INTO directory ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                DIRECTORY_COLUMNS
            ),
            params![entry.id, entry.name, entry.avatar, entry.bio, entry.status, entry.updated_at],
        )?;
        Ok(())
    }

    pub fn get_directory_entry(&self, id: &str) -> Result<Option<DirectoryEntry>> {
        self.query_one(
            &format!("SELECT {} FROM directory WHERE id = ?1", DIRECTORY_COLUMNS),
            [id],
        )
    }

    pub fn list_directory(&self) -> Result<Vec<DirectoryEntry>> {
        self.query(
            &format!("SELECT {} FROM directory ORDER BY name ASC", DIRECTORY_COLUMNS),
            [],
        )
    }

    pub fn set_directory_status(&self, id: &str, status: &str) -> Result<bool> {
        let changed = self.execute("UPDATE directory SET status = ?2 WHERE id = ?1", params![id, status])?;
        Ok(changed == 1)
    }
}

fn message_params(message: &Message) -> Result<[Box<dyn rusqlite::ToSql>; 11]> {
    let params: [Box<dyn rusqlite::ToSql>; 11] = [
        Box::new(message.id.clone()),
        Box::new(message.contact_id.clone()),
        Box::new(message.role.as_str()),
        Box::new(message.content.clone()),
        Box::new(message.timestamp),
        Box::new(message.kind.as_str()),
        Box::new(message.media.clone()),
        Box::new(message.reply_to.as_ref().map(|r| r.id.clone())),
        Box::new(message.reply_to.as_ref().map(|r| r.snippet.clone())),
        Box::new(message.state.as_str()),
        Box::new(serde_json::to_string(&message.reactions)?),
    ];
    Ok(params)
}
