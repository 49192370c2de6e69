//! Benutzer: Registrierung und Login
//!
//! Passwörter werden als Argon2id PHC-Strings gespeichert.

use super::{DatabaseError, IdentityService, LocalStore, User};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rusqlite::{params, OptionalExtension};

/// Hasht ein Passwort mit zufälligem Salt
pub fn hash_password(password: &str) -> Result<String, DatabaseError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DatabaseError::PasswordHash(e.to_string()))
}

/// Prüft ein Passwort gegen einen gespeicherten PHC-String
pub fn verify_password(password: &str, hash: &str) -> Result<bool, DatabaseError> {
    let parsed = PasswordHash::new(hash).map_err(|e| DatabaseError::PasswordHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(DatabaseError::PasswordHash(e.to_string())),
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl IdentityService for LocalStore {
    fn register(&self, name: &str, email: &str, password: &str) -> Result<User, DatabaseError> {
        let name = name.trim();
        let email = normalize_email(email);
        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(DatabaseError::Invalid(
                "Name, email, and password are required".to_string(),
            ));
        }

        let password_hash = hash_password(password)?;

        let conn = self.conn();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(DatabaseError::Conflict);
        }

        conn.execute(
            "INSERT INTO users (name, email, password_hash) VALUES (?1, ?2, ?3)",
            params![name, email, password_hash],
        )?;

        let user = User {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            email,
        };
        tracing::info!("Registered user {}", user.id);
        Ok(user)
    }

    fn login(&self, email: &str, password: &str) -> Result<User, DatabaseError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(DatabaseError::Invalid(
                "Email and password are required".to_string(),
            ));
        }

        let row = self
            .conn()
            .query_row(
                "SELECT id, name, email, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok((
                        User {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            email: row.get(2)?,
                        },
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((user, password_hash)) = row else {
            return Err(DatabaseError::Unauthorized);
        };
        if !verify_password(password, &password_hash)? {
            return Err(DatabaseError::Unauthorized);
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
        assert!(verify_password("x", "not a phc string").is_err());
    }

    #[test]
    fn register_then_login() {
        let store = LocalStore::open_in_memory().unwrap();
        let user = store
            .register(" Grace ", "Grace@Example.com", "hopper")
            .unwrap();
        assert_eq!(user.name, "Grace");
        assert_eq!(user.email, "grace@example.com");

        let logged_in = store.login("grace@example.com", "hopper").unwrap();
        assert_eq!(logged_in, user);
    }

    #[test]
    fn duplicate_email_conflicts() {
        let store = LocalStore::open_in_memory().unwrap();
        store.register("A", "a@example.com", "one").unwrap();
        assert!(matches!(
            store.register("B", "A@example.com", "two"),
            Err(DatabaseError::Conflict)
        ));
    }

    #[test]
    fn missing_fields_are_invalid() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(matches!(
            store.register("", "a@example.com", "pw"),
            Err(DatabaseError::Invalid(_))
        ));
        assert!(matches!(
            store.register("A", "a@example.com", ""),
            Err(DatabaseError::Invalid(_))
        ));
        assert!(matches!(
            store.login("  ", "pw"),
            Err(DatabaseError::Invalid(_))
        ));
    }

    #[test]
    fn wrong_password_and_unknown_email_are_unauthorized() {
        let store = LocalStore::open_in_memory().unwrap();
        store.register("A", "a@example.com", "right").unwrap();
        assert!(matches!(
            store.login("a@example.com", "wrong"),
            Err(DatabaseError::Unauthorized)
        ));
        assert!(matches!(
            store.login("nobody@example.com", "right"),
            Err(DatabaseError::Unauthorized)
        ));
    }
}
