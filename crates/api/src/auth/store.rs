//! Credential storage: users and their session tokens
//!
//! Pure data access. Tokens are stored only as hex SHA-256 digests; the raw
//! token never reaches the database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keyhaven_shared::{Identity, Role};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::middleware::AuthError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub agent_id: Option<Uuid>,
    pub agency_id: Option<Uuid>,
    pub contractor_id: Option<Uuid>,
    pub is_active: bool,
    pub is_verified: bool,
}

impl UserRecord {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            role: self.role,
            agent_id: self.agent_id,
            agency_id: self.agency_id,
            contractor_id: self.contractor_id,
        }
    }
}

/// A session joined with the user it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user: UserRecord,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, AuthError>;

    /// Lookup is case-insensitive on the address
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError>;

    async fn insert_session(&self, session: &NewSession) -> Result<(), AuthError>;

    async fn revoke_session(&self, token_hash: &str) -> Result<bool, AuthError>;

    async fn revoke_user_sessions(&self, user_id: Uuid) -> Result<u64, AuthError>;

    /// Drop sessions whose expiry is at or before `now`
    async fn delete_expired_sessions(&self, now: OffsetDateTime) -> Result<u64, AuthError>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    role: String,
    agent_id: Option<Uuid>,
    agency_id: Option<Uuid>,
    contractor_id: Option<Uuid>,
    is_active: bool,
    is_verified: bool,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse()
            .map_err(|e| AuthError::Internal(format!("user {}: {e}", row.id)))?;

        Ok(UserRecord {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            role,
            agent_id: row.agent_id,
            agency_id: row.agency_id,
            contractor_id: row.contractor_id,
            is_active: row.is_active,
            is_verified: row.is_verified,
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    expires_at: OffsetDateTime,
    #[sqlx(flatten)]
    user: UserRow,
}

#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, AuthError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT
                s.expires_at,
                u.id, u.email, u.password_hash, u.role,
                u.agent_id, u.agency_id, u.contractor_id,
                u.is_active, u.is_verified
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SessionRecord {
                expires_at: row.expires_at,
                user: UserRecord::try_from(row.user)?,
            })
        })
        .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, password_hash, role, agent_id, agency_id,
                   contractor_id, is_active, is_verified
            FROM users
            WHERE LOWER(email) = LOWER($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRecord::try_from).transpose()
    }

    async fn insert_session(&self, session: &NewSession) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token_hash, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.token_hash)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn revoke_session(&self, token_hash: &str) -> Result<bool, AuthError> {
        let rows_affected = sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn revoke_user_sessions(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let rows_affected = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    async fn delete_expired_sessions(&self, now: OffsetDateTime) -> Result<u64, AuthError> {
        let rows_affected = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    user_id: Uuid,
    expires_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct CredentialTables {
    users: HashMap<Uuid, UserRecord>,
    sessions: HashMap<String, StoredSession>,
}

/// In-memory [`CredentialStore`] for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    tables: Arc<RwLock<CredentialTables>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.tables.write().await.users.insert(user.id, user);
    }

    pub async fn set_user_active(&self, user_id: Uuid, active: bool) {
        if let Some(user) = self.tables.write().await.users.get_mut(&user_id) {
            user.is_active = active;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, AuthError> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.get(token_hash).and_then(|session| {
            tables.users.get(&session.user_id).map(|user| SessionRecord {
                user: user.clone(),
                expires_at: session.expires_at,
            })
        }))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_session(&self, session: &NewSession) -> Result<(), AuthError> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.token_hash) {
            return Err(AuthError::Internal("session token collision".to_string()));
        }
        tables.sessions.insert(
            session.token_hash.clone(),
            StoredSession {
                user_id: session.user_id,
                expires_at: session.expires_at,
            },
        );
        Ok(())
    }

    async fn revoke_session(&self, token_hash: &str) -> Result<bool, AuthError> {
        Ok(self
            .tables
            .write()
            .await
            .sessions
            .remove(token_hash)
            .is_some())
    }

    async fn revoke_user_sessions(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn delete_expired_sessions(&self, now: OffsetDateTime) -> Result<u64, AuthError> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.expires_at > now);
        Ok((before - tables.sessions.len()) as u64)
    }
}
