use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::error::{Result, SettingsError};
use crate::types::{
    SettingsPatch, UserSettings, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
    DEFAULT_TOP_P,
};

/// Thread-safe store for per-user upstream settings.
///
/// Wraps a single SQLite connection in a `Mutex`. For high-concurrency
/// deployments consider a connection pool (e.g. r2d2), but a Mutex is
/// sufficient for the single-node gateway.
pub struct SettingsStore {
    db: Mutex<Connection>,
}

impl SettingsStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Retrieve settings for a user, returning `None` if no row exists.
    #[instrument(skip(self), fields(user_id))]
    pub fn get(&self, user_id: &str) -> Result<Option<UserSettings>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT user_id, api_key, base_url, model, temperature, max_tokens, top_p,
                    created_at, updated_at
             FROM user_settings WHERE user_id = ?1",
            rusqlite::params![user_id],
            row_to_settings,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SettingsError::Database(e)),
        }
    }

    /// Return existing settings or create a defaults row (upsert pattern).
    #[instrument(skip(self), fields(user_id))]
    pub fn get_or_create(&self, user_id: &str) -> Result<UserSettings> {
        // Fast path: row already exists
        if let Some(settings) = self.get(user_id)? {
            debug!("settings row exists");
            return Ok(settings);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO user_settings
             (user_id, model, temperature, max_tokens, top_p, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                user_id,
                DEFAULT_MODEL,
                DEFAULT_TEMPERATURE,
                DEFAULT_MAX_TOKENS,
                DEFAULT_TOP_P,
                now
            ],
        )?;

        // Read back — handles the race where two threads insert simultaneously
        let settings = db.query_row(
            "SELECT user_id, api_key, base_url, model, temperature, max_tokens, top_p,
                    created_at, updated_at
             FROM user_settings WHERE user_id = ?1",
            rusqlite::params![user_id],
            row_to_settings,
        )?;

        Ok(settings)
    }

    /// Apply a partial update and return the stored row, bumping `updated_at`.
    ///
    /// The row is created with defaults first if it does not exist, so a PUT
    /// before any GET behaves the same as after one.
    #[instrument(skip(self, patch), fields(user_id))]
    pub fn update(&self, user_id: &str, patch: &SettingsPatch) -> Result<UserSettings> {
        patch.validate()?;
        self.get_or_create(user_id)?;

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE user_settings
             SET api_key     = COALESCE(?1, api_key),
                 base_url    = COALESCE(?2, base_url),
                 model       = COALESCE(?3, model),
                 temperature = COALESCE(?4, temperature),
                 max_tokens  = COALESCE(?5, max_tokens),
                 top_p       = COALESCE(?6, top_p),
                 updated_at  = ?7
             WHERE user_id = ?8",
            rusqlite::params![
                patch.api_key,
                patch.base_url,
                patch.model,
                patch.temperature,
                patch.max_tokens,
                patch.top_p,
                now,
                user_id
            ],
        )?;

        let settings = db.query_row(
            "SELECT user_id, api_key, base_url, model, temperature, max_tokens, top_p,
                    created_at, updated_at
             FROM user_settings WHERE user_id = ?1",
            rusqlite::params![user_id],
            row_to_settings,
        )?;

        Ok(settings)
    }
}

/// Map a SQLite row to `UserSettings`.
fn row_to_settings(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSettings> {
    Ok(UserSettings {
        user_id: row.get(0)?,
        api_key: row.get(1)?,
        base_url: row.get(2)?,
        model: row.get(3)?,
        temperature: row.get(4)?,
        max_tokens: row.get::<_, i64>(5)? as u32,
        top_p: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
