//! SQLite-backed user store.
//!
//! Table:
//! - `users`: id, email (unique, case-insensitive), password_hash, salt, created_at
//!
//! Passwords are stretched with iterated SHA-256 (100k rounds) and a
//! per-user salt. Verification fails closed: unknown email and wrong
//! password are indistinguishable to the caller, and an unknown email still
//! pays for one hash to level the timing.

use crate::auth::flow::{CreateUserError, User, UserRepository, MIN_PASSWORD_LEN};
use crate::auth::{constant_time_eq, epoch_secs};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// Maximum accepted email length (RFC 5321 path limit).
const MAX_EMAIL_LEN: usize = 254;

/// SQLite-backed user repository.
pub struct SqliteUserStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteUserStore {
    /// Open (or create) the user table in the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl UserRepository for SqliteUserStore {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let row: Result<(String, String, String, String, i64), _> = conn.query_row(
            "SELECT id, email, password_hash, salt, created_at
             FROM users WHERE email = ?1 COLLATE NOCASE",
            rusqlite::params![email.trim()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        );

        match row {
            Ok((id, stored_email, stored_hash, salt, created_at)) => {
                let attempt_hash = hash_password(password, &salt);
                if !constant_time_eq(stored_hash.as_bytes(), attempt_hash.as_bytes()) {
                    return Ok(None);
                }
                Ok(Some(User {
                    id,
                    email: stored_email,
                    created_at,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                // Dummy hash so unknown emails cost the same as wrong passwords
                let _ = hash_password(password, "0000000000000000");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, email: &str, password: &str) -> Result<User, CreateUserError> {
        let email = email.trim();
        if !is_plausible_email(email) {
            return Err(CreateUserError::InvalidEmail(email.to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(CreateUserError::WeakPassword);
        }

        let user_id = uuid::Uuid::new_v4().to_string();
        let salt = generate_salt();
        let password_hash = hash_password(password, &salt);
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (id, email, password_hash, salt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![user_id, email, password_hash, salt, now],
        );

        match result {
            Ok(_) => Ok(User {
                id: user_id,
                email: email.to_string(),
                created_at: now,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(CreateUserError::EmailTaken(email.to_string()))
            }
            Err(e) => Err(CreateUserError::Store(e.into())),
        }
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT id, email, created_at FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        );

        match row {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Loose shape check: one `@`, non-empty local and domain parts, no
/// whitespace. Anything stricter belongs to a delivery-time check, not here.
fn is_plausible_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return false;
    }
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

/// Generate a random salt (hex-encoded).
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using iterated SHA-256.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    // Iterated hashing for key stretching
    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteUserStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteUserStore::open(&tmp.path().join("auth.db")).unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn create_and_verify() {
        let (_tmp, store) = test_store();

        let created = store
            .create("alice@example.com", "securepassword123")
            .await
            .unwrap();
        assert!(!created.id.is_empty());

        let verified = store
            .verify_credentials("alice@example.com", "securepassword123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verified.id, created.id);
        assert_eq!(verified.email, "alice@example.com");
    }

    #[tokio::test]
    async fn verify_wrong_password_fails_closed() {
        let (_tmp, store) = test_store();

        store
            .create("alice@example.com", "correct-password")
            .await
            .unwrap();
        let result = store
            .verify_credentials("alice@example.com", "wrong-password")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn verify_unknown_email_fails_closed() {
        let (_tmp, store) = test_store();

        let result = store
            .verify_credentials("ghost@example.com", "anypassword1")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let (_tmp, store) = test_store();

        store
            .create("alice@example.com", "password123!")
            .await
            .unwrap();
        let result = store.create("alice@example.com", "otherpassword1").await;
        assert!(matches!(result, Err(CreateUserError::EmailTaken(_))));

        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn duplicate_email_is_case_insensitive() {
        let (_tmp, store) = test_store();

        store
            .create("Alice@Example.com", "password123!")
            .await
            .unwrap();
        let result = store.create("alice@example.com", "otherpassword1").await;
        assert!(matches!(result, Err(CreateUserError::EmailTaken(_))));
    }

    #[tokio::test]
    async fn malformed_email_is_rejected() {
        let (_tmp, store) = test_store();

        for bad in ["", "no-at-sign", "@nodomain", "nolocal@", "two@@ats", "has space@x.y"] {
            let result = store.create(bad, "password123!").await;
            assert!(
                matches!(result, Err(CreateUserError::InvalidEmail(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let (_tmp, store) = test_store();

        let result = store.create("alice@example.com", "short").await;
        assert!(matches!(result, Err(CreateUserError::WeakPassword)));
    }

    #[tokio::test]
    async fn stored_hash_is_not_the_password() {
        let (_tmp, store) = test_store();

        store
            .create("alice@example.com", "securepassword123")
            .await
            .unwrap();

        let conn = store.conn.lock();
        let (hash, salt): (String, String) = conn
            .query_row(
                "SELECT password_hash, salt FROM users WHERE email = ?1",
                rusqlite::params!["alice@example.com"],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_ne!(hash, "securepassword123");
        assert_eq!(hash, hash_password("securepassword123", &salt));
    }

    #[tokio::test]
    async fn get_user_by_id() {
        let (_tmp, store) = test_store();

        let created = store
            .create("alice@example.com", "securepassword123")
            .await
            .unwrap();

        let found = store.get_user(&created.id).await.unwrap();
        assert_eq!(found.unwrap().email, "alice@example.com");

        let none = store.get_user("nonexistent-id").await.unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn password_hash_is_deterministic_with_same_salt() {
        let h1 = hash_password("test_password", "fixed_salt_value");
        let h2 = hash_password("test_password", "fixed_salt_value");
        assert_eq!(h1, h2);
    }

    #[test]
    fn password_hash_differs_with_different_salt() {
        let h1 = hash_password("test_password", "salt_a");
        let h2 = hash_password("test_password", "salt_b");
        assert_ne!(h1, h2);
    }

    #[test]
    fn plausible_email_check() {
        assert!(is_plausible_email("alice@example.com"));
        assert!(is_plausible_email("a@b"));
        assert!(!is_plausible_email("alice"));
        assert!(!is_plausible_email("alice@"));
        assert!(!is_plausible_email("@example.com"));
    }
}
