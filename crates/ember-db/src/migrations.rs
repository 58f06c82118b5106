use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Columns added after the first schema shipped. Applied on every startup;
/// a column that already exists is skipped. Never drop or rename here.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("profile", "key_salt TEXT NOT NULL DEFAULT ''"),
    ("profile", "settings TEXT NOT NULL DEFAULT '{}'"),
    ("contacts", "hidden INTEGER NOT NULL DEFAULT 0"),
    ("contacts", "owner_id TEXT"),
    ("messages", "reply_to_id TEXT"),
    ("messages", "reply_snippet TEXT"),
    ("messages", "reactions TEXT NOT NULL DEFAULT '{}'"),
    ("directory", "bio TEXT NOT NULL DEFAULT ''"),
];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profile (
            id              TEXT PRIMARY KEY,
            display_name    TEXT NOT NULL,
            phone           TEXT,
            email           TEXT,
            password_hash   TEXT NOT NULL,
            bio             TEXT NOT NULL DEFAULT '',
            avatar          TEXT,
            role            TEXT NOT NULL DEFAULT 'user',
            account_type    TEXT NOT NULL DEFAULT 'personal',
            status          TEXT NOT NULL DEFAULT 'active',
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contacts (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            avatar          TEXT,
            status          TEXT NOT NULL DEFAULT 'offline',
            last_message    TEXT,
            last_message_at INTEGER,
            members         TEXT NOT NULL DEFAULT '[]',
            kind            TEXT NOT NULL DEFAULT 'direct',
            blocked         INTEGER NOT NULL DEFAULT 0,
            unread          INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            contact_id      TEXT NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            kind            TEXT NOT NULL DEFAULT 'text',
            media           TEXT,
            state           TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_contact
            ON messages(contact_id, timestamp, id);

        CREATE TABLE IF NOT EXISTS moments (
            id              TEXT PRIMARY KEY,
            author_id       TEXT NOT NULL,
            author_name     TEXT NOT NULL,
            author_avatar   TEXT,
            content         TEXT NOT NULL,
            media           TEXT,
            timestamp       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_moments_timestamp
            ON moments(timestamp);

        CREATE TABLE IF NOT EXISTS directory (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            avatar          TEXT,
            status          TEXT NOT NULL DEFAULT 'offline',
            updated_at      INTEGER NOT NULL
        );
        ",
    )?;

    let mut added = 0;
    for (table, column) in ADDITIVE_COLUMNS {
        if add_column(conn, table, column)? {
            added += 1;
        }
    }

    info!("Database migrations complete ({} columns added)", added);
    Ok(())
}

/// Returns false when the column was already there.
fn add_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    match conn.execute(&format!("ALTER TABLE {} ADD COLUMN {}", table, column), []) {
        Ok(_) => Ok(true),
        Err(e) if e.to_string().contains("duplicate column name") => {
            debug!("{}.{} already present", table, column);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn running_twice_is_harmless() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let cols = columns(&conn, "messages");
        assert_eq!(cols.iter().filter(|c| *c == "reactions").count(), 1);
    }

    #[test]
    fn upgrades_an_old_schema_without_losing_rows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE messages (
                id TEXT PRIMARY KEY, contact_id TEXT NOT NULL, role TEXT NOT NULL,
                content TEXT NOT NULL, timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL DEFAULT 'text', media TEXT, state TEXT NOT NULL
            );
            INSERT INTO messages (id, contact_id, role, content, timestamp, state)
                VALUES ('m1', 'c1', 'user', 'old', 1, 'sent');",
        )
        .unwrap();

        run(&conn).unwrap();

        assert!(columns(&conn, "messages").contains(&"reply_to_id".to_string()));
        let reactions: String = conn
            .query_row("SELECT reactions FROM messages WHERE id = 'm1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(reactions, "{}");
    }
}
