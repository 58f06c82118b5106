//! Row mapping at the store boundary. Every table maps onto one `ember-types`
//! record; text-encoded enums and JSON columns are decoded here so nothing
//! above this layer sees a loosely typed row.

use std::str::FromStr;

use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;

use ember_types::models::{Contact, DirectoryEntry, Message, Moment, Profile, ReplyRef, UnknownVariant};

pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

fn text_enum<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e: UnknownVariant| {
        let idx = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

impl FromRow for Profile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Profile {
            id: row.get("id")?,
            display_name: row.get("display_name")?,
            phone: row.get("phone")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            bio: row.get("bio")?,
            avatar: row.get("avatar")?,
            role: text_enum(row, "role")?,
            account_type: text_enum(row, "account_type")?,
            status: text_enum(row, "status")?,
            settings: json_column(row, "settings")?,
            key_salt: row.get("key_salt")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl FromRow for Contact {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Contact {
            id: row.get("id")?,
            name: row.get("name")?,
            avatar: row.get("avatar")?,
            status: row.get("status")?,
            last_message: row.get("last_message")?,
            last_message_at: row.get("last_message_at")?,
            members: json_column(row, "members")?,
            owner_id: row.get("owner_id")?,
            kind: text_enum(row, "kind")?,
            blocked: row.get("blocked")?,
            hidden: row.get("hidden")?,
            unread: row.get("unread")?,
        })
    }
}

impl FromRow for Message {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let reply_id: Option<String> = row.get("reply_to_id")?;
        let reply_snippet: Option<String> = row.get("reply_snippet")?;

        Ok(Message {
            id: row.get("id")?,
            contact_id: row.get("contact_id")?,
            role: text_enum(row, "role")?,
            content: row.get("content")?,
            timestamp: row.get("timestamp")?,
            kind: text_enum(row, "kind")?,
            media: row.get("media")?,
            reply_to: reply_id.map(|id| ReplyRef {
                id,
                snippet: reply_snippet.unwrap_or_default(),
            }),
            state: text_enum(row, "state")?,
            reactions: json_column(row, "reactions")?,
        })
    }
}

impl FromRow for Moment {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Moment {
            id: row.get("id")?,
            author_id: row.get("author_id")?,
            author_name: row.get("author_name")?,
            author_avatar: row.get("author_avatar")?,
            content: row.get("content")?,
            media: row.get("media")?,
            timestamp: row.get("timestamp")?,
        })
    }
}

impl FromRow for DirectoryEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DirectoryEntry {
            id: row.get("id")?,
            name: row.get("name")?,
            avatar: row.get("avatar")?,
            bio: row.get("bio")?,
            status: row.get("status")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Single-column helper for `SELECT COUNT(*)` and similar.
impl FromRow for i64 {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        row.get(0)
    }
}
