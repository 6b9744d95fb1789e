//! SQLite-backed access-token store.
//!
//! Table:
//! - `access_tokens`: token_hash (PK), user_id, created_at, expires_at
//!
//! Tokens are opaque 32-byte values, hex-encoded. Only the SHA-256 hash is
//! persisted; the plaintext leaves this module exactly once, inside the
//! [`AccessToken`] returned from `issue`. Expired rows are removed on
//! startup and by [`SqliteTokenStore::sweep_expired`].

use crate::auth::epoch_secs;
use crate::auth::flow::{AccessToken, TokenService, User};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Default token lifetime: 30 days (seconds).
const DEFAULT_TOKEN_TTL_SECS: u64 = 30 * 24 * 3600;

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// SQLite-backed token issuer.
pub struct SqliteTokenStore {
    conn: Mutex<rusqlite::Connection>,
    token_ttl_secs: u64,
}

impl SqliteTokenStore {
    /// Open (or create) the token table in the database at `db_path`.
    pub fn open(db_path: &Path, token_ttl_secs: Option<u64>) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS access_tokens (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_access_tokens_expires ON access_tokens(expires_at);",
        )?;

        // Stale rows from previous runs
        let now = epoch_secs() as i64;
        let _ = conn.execute(
            "DELETE FROM access_tokens WHERE expires_at <= ?1",
            rusqlite::params![now],
        );

        Ok(Self {
            conn: Mutex::new(conn),
            token_ttl_secs: token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
        })
    }

    /// Remove expired tokens. Returns the number of rows deleted.
    pub fn sweep_expired(&self) -> Result<u64> {
        let now = epoch_secs() as i64;
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM access_tokens WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl TokenService for SqliteTokenStore {
    async fn issue(&self, user: &User) -> Result<AccessToken> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let now = epoch_secs();
        let expires_at = now + self.token_ttl_secs;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO access_tokens (token_hash, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token_hash, user.id, now as i64, expires_at as i64],
        )?;

        Ok(AccessToken::bearer(token))
    }

    async fn authenticate(&self, token: &str) -> Result<Option<String>> {
        let token_hash = hash_token(token);
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT user_id FROM access_tokens
             WHERE token_hash = ?1 AND expires_at > ?2",
            rusqlite::params![token_hash, now],
            |row| row.get::<_, String>(0),
        );

        match row {
            Ok(user_id) => Ok(Some(user_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Generate a random token (hex-encoded).
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a token (SHA-256, single pass — tokens are already high-entropy).
fn hash_token(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    hex::encode(h.finalize())
}
