//! Database Module - Lokale SQLite-Datenbank
//!
//! Dieses Modul verwaltet:
//! - Benutzer (Registrierung, Login mit Argon2-Hashes)
//! - Das Session-Ledger (Start/Ende jedes Anrufs)

mod sessions;
mod store;
mod users;

pub use store::LocalStore;
pub use users::{hash_password, verify_password};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("Email already registered")]
    Conflict,

    #[error("Invalid email or password")]
    Unauthorized,

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

// ============================================================================
// RECORDS
// ============================================================================

/// Registrierter Benutzer (ohne Passwort-Hash)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// Eintrag im Session-Ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSession {
    pub id: i64,
    pub user_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ============================================================================
// SERVICES
// ============================================================================

pub trait IdentityService: Send + Sync {
    /// Legt einen Benutzer an; `Conflict` wenn die E-Mail vergeben ist
    fn register(&self, name: &str, email: &str, password: &str) -> Result<User, DatabaseError>;

    /// `Unauthorized` bei unbekannter E-Mail oder falschem Passwort
    fn login(&self, email: &str, password: &str) -> Result<User, DatabaseError>;
}

pub trait SessionLedger: Send + Sync {
    fn start_session(&self, user_id: i64) -> Result<LedgerSession, DatabaseError>;

    /// Idempotent: ein bereits beendeter Eintrag behält seine Endzeit
    fn end_session(&self, session_id: i64) -> Result<LedgerSession, DatabaseError>;

    /// Löscht alle Sessions ohne Endzeit; gibt die Anzahl zurück
    fn cleanup_open_sessions(&self) -> Result<usize, DatabaseError>;
}
