//! SQLite-backed show store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{CatalogError, Episode, EpisodeKey, InsertOutcome, NewShow, Show, ShowStore};

/// SQLite-backed show store.
pub struct SqliteShowStore {
    conn: Mutex<Connection>,
}

impl SqliteShowStore {
    /// Create a new SQLite store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path).map_err(|e| CatalogError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite store (useful for testing).
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CatalogError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CatalogError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Tracked shows, keyed by canonical title
            CREATE TABLE IF NOT EXISTS shows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL UNIQUE,
                quality TEXT NOT NULL DEFAULT '',
                episodal INTEGER NOT NULL DEFAULT 1,
                last_update TEXT
            );

            -- Fetched episodes; the unique constraint is the dedup key
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                show_id INTEGER NOT NULL REFERENCES shows(id) ON DELETE CASCADE,
                season INTEGER NOT NULL DEFAULT 0,
                episode INTEGER NOT NULL DEFAULT 0,
                air_date TEXT NOT NULL DEFAULT '',
                added_at TEXT NOT NULL,
                UNIQUE(show_id, season, episode, air_date)
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_show ON episodes(show_id);
            "#,
        )
        .map_err(|e| CatalogError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_show(row: &Row<'_>) -> rusqlite::Result<Show> {
        let last_update: Option<String> = row.get(4)?;
        Ok(Show {
            id: row.get(0)?,
            title: row.get(1)?,
            quality: row.get(2)?,
            episodal: row.get(3)?,
            last_update: last_update.as_deref().and_then(parse_timestamp),
        })
    }

    fn row_to_episode(row: &Row<'_>) -> rusqlite::Result<Episode> {
        let added_at: String = row.get(5)?;
        Ok(Episode {
            id: row.get(0)?,
            show_id: row.get(1)?,
            season: row.get(2)?,
            episode: row.get(3)?,
            air_date: row.get(4)?,
            added_at: parse_timestamp(&added_at).unwrap_or_else(Utc::now),
        })
    }

    fn find_episode(conn: &Connection, key: &EpisodeKey) -> Result<Option<Episode>, CatalogError> {
        conn.query_row(
            "SELECT id, show_id, season, episode, air_date, added_at FROM episodes
             WHERE show_id = ? AND season = ? AND episode = ? AND air_date = ?",
            params![key.show_id, key.season, key.episode, key.air_date],
            Self::row_to_episode,
        )
        .optional()
        .map_err(|e| CatalogError::Database(e.to_string()))
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl ShowStore for SqliteShowStore {
    fn find_show_by_title(&self, title: &str) -> Result<Option<Show>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, quality, episodal, last_update FROM shows WHERE title = ?",
            params![title],
            Self::row_to_show,
        )
        .optional()
        .map_err(|e| CatalogError::Database(e.to_string()))
    }

    fn insert_episode(&self, key: &EpisodeKey) -> Result<InsertOutcome, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO episodes (show_id, season, episode, air_date, added_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    key.show_id,
                    key.season,
                    key.episode,
                    key.air_date,
                    now.to_rfc3339()
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    CatalogError::NotFound(format!("show {}", key.show_id))
                }
                other => CatalogError::Database(other.to_string()),
            })?;

        let episode = Self::find_episode(&conn, key)?.ok_or_else(|| {
            CatalogError::Database(format!("episode row for {:?} vanished after insert", key))
        })?;

        if inserted == 1 {
            Ok(InsertOutcome::Inserted(episode))
        } else {
            Ok(InsertOutcome::AlreadyPresent(episode))
        }
    }

    fn episode_exists(&self, key: &EpisodeKey) -> Result<bool, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM episodes
                 WHERE show_id = ? AND season = ? AND episode = ? AND air_date = ?",
                params![key.show_id, key.season, key.episode, key.air_date],
                |row| row.get(0),
            )
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    fn update_show_last_seen(&self, show_id: i64, at: DateTime<Utc>) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "UPDATE shows SET last_update = ? WHERE id = ?",
                params![at.to_rfc3339(), show_id],
            )
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        if rows == 0 {
            return Err(CatalogError::NotFound(format!("show {}", show_id)));
        }
        Ok(())
    }

    fn list_shows(&self) -> Result<Vec<Show>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, title, quality, episodal, last_update FROM shows ORDER BY title")
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_show)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let mut shows = Vec::new();
        for row in rows {
            shows.push(row.map_err(|e| CatalogError::Database(e.to_string()))?);
        }
        Ok(shows)
    }

    fn get_show(&self, id: i64) -> Result<Show, CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, quality, episodal, last_update FROM shows WHERE id = ?",
            params![id],
            Self::row_to_show,
        )
        .optional()
        .map_err(|e| CatalogError::Database(e.to_string()))?
        .ok_or_else(|| CatalogError::NotFound(format!("show {}", id)))
    }

    fn add_show(&self, show: &NewShow) -> Result<Show, CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO shows (title, quality, episodal) VALUES (?, ?, ?)",
            params![show.title, show.quality, show.episodal],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CatalogError::AlreadyExists(show.title.clone())
            }
            other => CatalogError::Database(other.to_string()),
        })?;

        Ok(Show {
            id: conn.last_insert_rowid(),
            title: show.title.clone(),
            quality: show.quality.clone(),
            episodal: show.episodal,
            last_update: None,
        })
    }

    fn update_show(&self, id: i64, show: &NewShow) -> Result<Show, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "UPDATE shows SET title = ?, quality = ?, episodal = ? WHERE id = ?",
                params![show.title, show.quality, show.episodal, id],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    CatalogError::AlreadyExists(show.title.clone())
                }
                other => CatalogError::Database(other.to_string()),
            })?;

        if rows == 0 {
            return Err(CatalogError::NotFound(format!("show {}", id)));
        }

        conn.query_row(
            "SELECT id, title, quality, episodal, last_update FROM shows WHERE id = ?",
            params![id],
            Self::row_to_show,
        )
        .map_err(|e| CatalogError::Database(e.to_string()))
    }

    fn remove_show(&self, id: i64) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute("DELETE FROM shows WHERE id = ?", params![id])
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        if rows == 0 {
            return Err(CatalogError::NotFound(format!("show {}", id)));
        }
        Ok(())
    }

    fn list_episodes(&self, show_id: i64) -> Result<Vec<Episode>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, show_id, season, episode, air_date, added_at FROM episodes
                 WHERE show_id = ? ORDER BY added_at DESC, id DESC",
            )
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![show_id], Self::row_to_episode)
            .map_err(|e| CatalogError::Database(e.to_string()))?;

        let mut episodes = Vec::new();
        for row in rows {
            episodes.push(row.map_err(|e| CatalogError::Database(e.to_string()))?);
        }
        Ok(episodes)
    }
}
