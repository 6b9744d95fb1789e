//! Authentication flow orchestration.
//!
//! [`AuthFlow`] coordinates login, registration, and token issuance against
//! two injected collaborators: a [`UserRepository`] that owns user records
//! and a [`TokenService`] that owns access-token lifecycle. Each call is a
//! single-shot request/response; the flow keeps no state of its own between
//! requests.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 8;

/// A registered user as exposed to API clients. Password material never
/// leaves the user store.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub created_at: i64,
}

/// An issued access token. `value` is the plaintext, released exactly once
/// at creation time; only its hash is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    #[serde(rename = "type")]
    pub token_type: String,
    pub value: String,
}

impl AccessToken {
    pub fn bearer(value: String) -> Self {
        Self {
            token_type: "bearer".into(),
            value,
        }
    }
}

/// Uniform response shape for login and registration.
///
/// `token` is present iff `user` is present; absent fields are omitted from
/// the serialized JSON entirely, so a denied login carries only `message`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResult {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<AccessToken>,
}

impl AuthResult {
    fn granted(message: &str, user: User, token: AccessToken) -> Self {
        Self {
            message: message.into(),
            user: Some(user),
            token: Some(token),
        }
    }

    fn denied(message: &str) -> Self {
        Self {
            message: message.into(),
            user: None,
            token: None,
        }
    }

    /// Whether authentication succeeded (user and token are populated).
    pub fn succeeded(&self) -> bool {
        self.user.is_some()
    }
}

/// Login input: credentials plus the bearer token presented alongside them,
/// if any.
#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub session_token: Option<String>,
}

/// Why account creation failed.
#[derive(Debug, Error)]
pub enum CreateUserError {
    #[error("email '{0}' is already registered")]
    EmailTaken(String),
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Owns user records: credential verification and account creation.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Verify an email/password pair. Fails closed: unknown email and wrong
    /// password both yield `None`, indistinguishable to the caller.
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<User>>;

    /// Create a user. Validates and persists in one step.
    async fn create(&self, email: &str, password: &str) -> Result<User, CreateUserError>;

    /// Look up a user by id.
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;
}

/// Owns access-token lifecycle.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Create a token bound to `user` and release its plaintext. The
    /// plaintext is retrievable only here; the service persists a hash.
    async fn issue(&self, user: &User) -> Result<AccessToken>;

    /// Resolve a presented bearer token to the owning user id, if the token
    /// is known and unexpired.
    async fn authenticate(&self, token: &str) -> Result<Option<String>>;
}

/// Coordinates login, registration, and token issuance.
pub struct AuthFlow {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenService>,
    allow_existing_session: bool,
}

impl AuthFlow {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn TokenService>,
        allow_existing_session: bool,
    ) -> Self {
        Self {
            users,
            tokens,
            allow_existing_session,
        }
    }

    /// Generate a new access token for `user`. Failures propagate to the
    /// caller; there is no local recovery.
    pub async fn issue_token(&self, user: &User) -> Result<AccessToken> {
        self.tokens.issue(user).await
    }

    /// Authenticate with email and password.
    ///
    /// When the existing-session fast path is enabled and the request
    /// carries a bearer token that resolves to a live user, credential
    /// verification is skipped. Token plaintext is one-time-release, so the
    /// fast path issues a fresh token rather than echoing a stale value.
    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResult> {
        if self.allow_existing_session {
            if let Some(user) = self.session_user(request.session_token.as_deref()).await? {
                let token = self.issue_token(&user).await?;
                tracing::debug!(user_id = %user.id, "login short-circuited by existing session");
                return Ok(AuthResult::granted("Already logged in", user, token));
            }
        }

        let Some(user) = self
            .users
            .verify_credentials(&request.email, &request.password)
            .await?
        else {
            tracing::debug!(email = %request.email, "credential verification failed");
            return Ok(AuthResult::denied("Invalid credentials"));
        };

        let token = self.issue_token(&user).await?;
        tracing::debug!(user_id = %user.id, email = %user.email, "credentials verified");
        Ok(AuthResult::granted("Login successful", user, token))
    }

    /// Create a new account and issue its first token. Creation failures
    /// (duplicate email, validation) propagate as [`CreateUserError`].
    pub async fn register(&self, email: &str, password: &str) -> Result<AuthResult> {
        let user = self.users.create(email, password).await?;
        let token = self.issue_token(&user).await?;
        tracing::debug!(user_id = %user.id, email = %user.email, "user registered");
        Ok(AuthResult::granted("Registration successful", user, token))
    }

    /// Resolve the bearer token on a login request to a live user, if any.
    async fn session_user(&self, token: Option<&str>) -> Result<Option<User>> {
        let Some(token) = token else {
            return Ok(None);
        };
        let Some(user_id) = self.tokens.authenticate(token).await? else {
            return Ok(None);
        };
        self.users.get_user(&user_id).await
    }
}
