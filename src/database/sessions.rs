//! Session-Ledger: ein Eintrag pro Anruf

use super::{DatabaseError, LedgerSession, LocalStore, SessionLedger};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

impl LocalStore {
    /// Holt einen Ledger-Eintrag
    pub fn get_session(&self, session_id: i64) -> Result<LedgerSession, DatabaseError> {
        let conn = self.conn();
        Self::get_session_inner(&conn, session_id)
    }

    fn get_session_inner(conn: &Connection, session_id: i64) -> Result<LedgerSession, DatabaseError> {
        conn.query_row(
            "SELECT id, user_id, started_at, ended_at FROM sessions WHERE id = ?1",
            params![session_id],
            |row| {
                Ok(LedgerSession {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    started_at: row.get(2)?,
                    ended_at: row.get(3)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::SessionNotFound(session_id),
            other => DatabaseError::Sqlite(other),
        })
    }
}

impl SessionLedger for LocalStore {
    fn start_session(&self, user_id: i64) -> Result<LedgerSession, DatabaseError> {
        let conn = self.conn();

        let user: Option<i64> = conn
            .query_row("SELECT id FROM users WHERE id = ?1", params![user_id], |row| {
                row.get(0)
            })
            .optional()?;
        if user.is_none() {
            return Err(DatabaseError::UserNotFound(user_id));
        }

        conn.execute(
            "INSERT INTO sessions (user_id, started_at) VALUES (?1, ?2)",
            params![user_id, Utc::now()],
        )?;

        let session = Self::get_session_inner(&conn, conn.last_insert_rowid())?;
        tracing::debug!("Ledger session {} started", session.id);
        Ok(session)
    }

    fn end_session(&self, session_id: i64) -> Result<LedgerSession, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE sessions SET ended_at = COALESCE(ended_at, ?2) WHERE id = ?1",
            params![session_id, Utc::now()],
        )?;

        let session = Self::get_session_inner(&conn, session_id)?;
        tracing::debug!("Ledger session {} ended", session.id);
        Ok(session)
    }

    fn cleanup_open_sessions(&self) -> Result<usize, DatabaseError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM sessions WHERE ended_at IS NULL", [])?;
        tracing::info!("Deleted {} open sessions", deleted);
        Ok(deleted)
    }
}
