//! Postgres-backed record store.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{AccountRecord, NewAccount, NewUser, RecordStore, Role, SessionRecord, UserRecord};

/// Record store on a Postgres pool; see `migrations/` for the schema.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails to apply.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> Result<UserRecord> {
    let role: String = row.try_get("role")?;
    let Some(role) = Role::from_str(&role) else {
        bail!("invalid users.role value: {role}");
    };
    Ok(UserRecord {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
        banned_at: row.try_get("banned_at")?,
        role,
        proof_of_work: row.try_get("proof_of_work")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<AccountRecord> {
    let codes: String = row.try_get("recovery_codes")?;
    Ok(AccountRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        password_hash: row.try_get("password_hash")?,
        otp_secret: row.try_get("otp_secret")?,
        recovery_codes: split_codes(&codes),
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        secret_token: row.try_get("secret_token")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        last_used_at: row.try_get("last_used_at")?,
    })
}

// Recovery codes are persisted as one comma-separated column.
fn join_codes(codes: &[String]) -> String {
    codes.join(",")
}

fn split_codes(column: &str) -> Vec<String> {
    column
        .split(',')
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn create_user(&self, new: NewUser) -> Result<UserRecord> {
        let query = r"
            INSERT INTO users (username, email, display_name, role)
            VALUES ($1, $2, $3, $4)
            RETURNING *
        ";
        let row = sqlx::query(query)
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.display_name)
            .bind(new.role.as_str())
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert user")?;
        user_from_row(&row)
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let query = "SELECT * FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let query = "SELECT * FROM users WHERE username = $1";
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by username")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = "SELECT * FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by email")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let query = "SELECT * FROM users ORDER BY created_at";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list users")?;
        rows.iter().map(user_from_row).collect()
    }

    async fn update_display_name(&self, id: Uuid, display_name: &str) -> Result<()> {
        let query = "UPDATE users SET display_name = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(display_name)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update display name")?;
        if result.rows_affected() == 0 {
            bail!("user {id} not found");
        }
        Ok(())
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<()> {
        let query = "UPDATE users SET role = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(role.as_str())
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update role")?;
        if result.rows_affected() == 0 {
            bail!("user {id} not found");
        }
        Ok(())
    }

    async fn update_proof_of_work(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        let query = "UPDATE users SET proof_of_work = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(token)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update proof of work")?;
        if result.rows_affected() == 0 {
            bail!("user {id} not found");
        }
        Ok(())
    }

    async fn soft_delete_user(&self, id: Uuid) -> Result<()> {
        let query = r"
            UPDATE users
            SET username = NULL,
                email = NULL,
                deleted_at = NOW()
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to soft delete user")?;
        if result.rows_affected() == 0 {
            bail!("user {id} not found");
        }
        Ok(())
    }

    async fn set_banned(&self, id: Uuid, banned: bool) -> Result<()> {
        let query = r"
            UPDATE users
            SET banned_at = CASE WHEN $2 THEN NOW() ELSE NULL END
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(banned)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update ban state")?;
        if result.rows_affected() == 0 {
            bail!("user {id} not found");
        }
        Ok(())
    }

    async fn create_account(&self, new: NewAccount) -> Result<AccountRecord> {
        let query = r"
            INSERT INTO accounts (user_id, password_hash, otp_secret, recovery_codes)
            VALUES ($1, $2, $3, $4)
            RETURNING *
        ";
        let row = sqlx::query(query)
            .bind(new.user_id)
            .bind(&new.password_hash)
            .bind(&new.otp_secret)
            .bind(join_codes(&new.recovery_codes))
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert account")?;
        account_from_row(&row)
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>> {
        let query = "SELECT * FROM accounts WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup account by id")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn account_by_user_id(&self, user_id: Uuid) -> Result<Option<AccountRecord>> {
        let query = "SELECT * FROM accounts WHERE user_id = $1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup account by user id")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn update_password(&self, account_id: Uuid, password_hash: &[u8]) -> Result<()> {
        let query = "UPDATE accounts SET password_hash = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        if result.rows_affected() == 0 {
            bail!("account {account_id} not found");
        }
        Ok(())
    }

    async fn update_otp_secret(&self, account_id: Uuid, secret: Option<&str>) -> Result<()> {
        let query = "UPDATE accounts SET otp_secret = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update otp secret")?;
        if result.rows_affected() == 0 {
            bail!("account {account_id} not found");
        }
        Ok(())
    }

    async fn update_recovery_codes(&self, account_id: Uuid, codes: &[String]) -> Result<()> {
        let query = "UPDATE accounts SET recovery_codes = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(join_codes(codes))
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update recovery codes")?;
        if result.rows_affected() == 0 {
            bail!("account {account_id} not found");
        }
        Ok(())
    }

    async fn delete_account(&self, account_id: Uuid) -> Result<()> {
        let query = "DELETE FROM accounts WHERE id = $1";
        let result = sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete account")?;
        if result.rows_affected() == 0 {
            bail!("account {account_id} not found");
        }
        Ok(())
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        secret_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let query = r"
            INSERT INTO sessions (user_id, secret_token, expires_at)
            VALUES ($1, $2, $3)
            RETURNING *
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(secret_token)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert session")?;
        session_from_row(&row)
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<SessionRecord>> {
        let query = "SELECT * FROM sessions WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session by id")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn session_by_user_and_token(
        &self,
        user_id: Uuid,
        secret_token: &str,
    ) -> Result<Option<SessionRecord>> {
        let query = "SELECT * FROM sessions WHERE user_id = $1 AND secret_token = $2";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(secret_token)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session by user and token")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_session_last_used(&self, id: Uuid) -> Result<()> {
        let query = "UPDATE sessions SET last_used_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update session last used")?;
        if result.rows_affected() == 0 {
            bail!("session {id} not found");
        }
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        // Logout is idempotent; deleting an absent row is fine.
        let query = "DELETE FROM sessions WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete sessions for user")?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_sessions(&self) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE expires_at < NOW()";
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete expired sessions")?;
        Ok(result.rows_affected())
    }
}
