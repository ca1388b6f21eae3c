use rusqlite::Connection;

use crate::error::Result;

/// Initialise the settings table.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_settings (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL UNIQUE,
            api_key     TEXT,
            base_url    TEXT,
            model       TEXT NOT NULL,
            temperature REAL NOT NULL,
            max_tokens  INTEGER NOT NULL,
            top_p       REAL NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}
