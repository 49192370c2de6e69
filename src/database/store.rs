//! SQLite Store
//!
//! Eine Connection hinter einem Mutex; das Schema wird beim Öffnen angelegt.

use super::DatabaseError;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Dateiname der Datenbank im App-Datenverzeichnis
const DATABASE_FILE: &str = "emotisound.db";

/// Lokale Datenbank für Benutzer und Sessions
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Öffnet oder erstellt die Datenbank unter `path`
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        // Parent-Verzeichnis erstellen
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening database at {:?}", path);

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Öffnet die Datenbank im Standard-Datenverzeichnis
    pub fn open_default() -> Result<Self, DatabaseError> {
        Self::open(&Self::default_path()?)
    }

    /// In-Memory Datenbank (Tests, Demos)
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Ermittelt den Pfad zur Datenbank-Datei
    pub fn default_path() -> Result<PathBuf, DatabaseError> {
        let proj_dirs =
            directories::ProjectDirs::from("org", "emotisound", "emotisound").ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        Ok(proj_dirs.data_dir().join(DATABASE_FILE))
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialisiert das Datenbank-Schema
    fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            "#,
        )?;
        Ok(())
    }

    pub(super) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{IdentityService, SessionLedger};

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("emotisound.db");

        let user = {
            let store = LocalStore::open(&path).unwrap();
            let user = store.register("Ada", "ada@example.com", "pw").unwrap();
            store.start_session(user.id).unwrap();
            user
        };

        let store = LocalStore::open(&path).unwrap();
        assert_eq!(store.login("ada@example.com", "pw").unwrap(), user);
        assert_eq!(store.cleanup_open_sessions().unwrap(), 1);
    }

    #[test]
    fn default_path_ends_with_database_file() {
        if let Ok(path) = LocalStore::default_path() {
            assert!(path.ends_with(DATABASE_FILE));
        }
    }
}
