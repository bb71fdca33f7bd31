use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User, UserRow};
use crate::error::AuthError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => {
                AuthError::conflict("Duplicate email. Please use another email address.")
            }
            StoreError::Invalid(msg) => AuthError::validation(msg),
            StoreError::Backend(e) => AuthError::Internal(e.into()),
        }
    }
}

/// Persistence for user records. Inactive users are invisible to every read.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;

    async fn find_by_id(&self, id: Uuid, with_password: bool)
        -> Result<Option<User>, StoreError>;

    async fn find_by_email(
        &self,
        email: &str,
        with_password: bool,
    ) -> Result<Option<User>, StoreError>;

    /// User holding a reset digest that is still valid at `now`.
    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;

    /// Writes the column groups marked in [`User::changes`]; everything else
    /// keeps its stored value. A `None` password hash keeps the stored one.
    async fn save(&self, user: &User, validate: bool) -> Result<(), StoreError>;
}

fn map_unique(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        _ => StoreError::Backend(e),
    }
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(|msg| StoreError::Backend(sqlx::Error::Decode(msg.into())))
}

/// Select list; `$1` toggles whether the password hash comes back.
const USER_COLUMNS: &str = r#"
    id, name, email,
    CASE WHEN $1 THEN password_hash END AS password_hash,
    role, password_changed_at, password_reset_token, password_reset_expires,
    active, created_at
"#;

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (name, email, password_hash, role)
            VALUES ($2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(true)
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(new.role.as_str())
            .fetch_one(&self.db)
            .await
            .map_err(map_unique)?;
        into_user(row)
    }

    async fn find_by_id(
        &self,
        id: Uuid,
        with_password: bool,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $2 AND active");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(with_password)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(into_user)
            .transpose()
    }

    async fn find_by_email(
        &self,
        email: &str,
        with_password: bool,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $2 AND active");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(with_password)
            .bind(email)
            .fetch_optional(&self.db)
            .await?
            .map(into_user)
            .transpose()
    }

    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE password_reset_token = $2
              AND password_reset_expires > $3
              AND active
            "#
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(false)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.db)
            .await?
            .map(into_user)
            .transpose()
    }

    async fn save(&self, user: &User, validate: bool) -> Result<(), StoreError> {
        if validate {
            user.validate().map_err(StoreError::Invalid)?;
        }
        let changes = user.changes();
        if changes.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET ");
        let mut set = qb.separated(", ");
        if changes.profile {
            set.push("name = ").push_bind_unseparated(user.name());
            set.push("email = ").push_bind_unseparated(user.email());
        }
        if changes.password {
            set.push("password_hash = COALESCE(")
                .push_bind_unseparated(user.password_hash())
                .push_unseparated(", password_hash)");
            set.push("password_changed_at = ")
                .push_bind_unseparated(user.password_changed_at());
        }
        if changes.password || changes.reset {
            let reset = user.reset();
            set.push("password_reset_token = ")
                .push_bind_unseparated(reset.map(|r| r.token_hash.as_str()));
            set.push("password_reset_expires = ")
                .push_bind_unseparated(reset.map(|r| r.expires_at));
        }
        if changes.role {
            set.push("role = ").push_bind_unseparated(user.role().as_str());
        }
        if changes.active {
            set.push("active = ").push_bind_unseparated(user.is_active());
        }
        qb.push(" WHERE id = ").push_bind(user.id);

        qb.build().execute(&self.db).await.map_err(map_unique)?;
        Ok(())
    }
}

// Needs a reachable Postgres in DATABASE_URL: `cargo test -- --ignored`.
#[cfg(test)]
mod pg_tests {
    use time::Duration;

    use super::*;
    use crate::auth::repo_types::{PendingReset, Role};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Grace".into(),
            email: email.into(),
            password_hash: "$argon2id$hash".into(),
            role: Role::User,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn hash_is_projected_only_when_asked(pool: PgPool) {
        let store = PgCredentialStore::new(pool);
        let created = store.create(new_user("g@example.com")).await.unwrap();
        assert_eq!(created.password_hash(), Some("$argon2id$hash"));

        let without = store.find_by_id(created.id, false).await.unwrap().unwrap();
        assert!(without.password_hash().is_none());
        let with = store.find_by_email("g@example.com", true).await.unwrap().unwrap();
        assert_eq!(with.password_hash(), Some("$argon2id$hash"));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn unique_violation_is_duplicate_email(pool: PgPool) {
        let store = PgCredentialStore::new(pool);
        let first = store.create(new_user("g@example.com")).await.unwrap();
        let err = store.create(new_user("g@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        let mut other = store.create(new_user("h@example.com")).await.unwrap();
        other.set_profile(None, Some(first.email().to_string()));
        let err = store.save(&other, true).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn half_set_reset_is_refused_by_the_table(pool: PgPool) {
        let store = PgCredentialStore::new(pool.clone());
        let u = store.create(new_user("g@example.com")).await.unwrap();
        let res = sqlx::query("UPDATE users SET password_reset_token = 'x' WHERE id = $1")
            .bind(u.id)
            .execute(&pool)
            .await;
        assert!(res.is_err());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn stale_copy_keeps_newer_password_change(pool: PgPool) {
        let store = PgCredentialStore::new(pool);
        let u = store.create(new_user("g@example.com")).await.unwrap();
        let mut early = store.find_by_email("g@example.com", false).await.unwrap().unwrap();

        let mut changer = store.find_by_id(u.id, true).await.unwrap().unwrap();
        changer.set_password("$argon2id$newer".into(), OffsetDateTime::now_utc());
        store.save(&changer, true).await.unwrap();

        let expires = OffsetDateTime::now_utc() + Duration::minutes(10);
        early.set_reset(Some(PendingReset {
            token_hash: "digest".into(),
            expires_at: expires,
        }));
        store.save(&early, false).await.unwrap();

        let now = store.find_by_id(u.id, true).await.unwrap().unwrap();
        assert_eq!(now.password_hash(), Some("$argon2id$newer"));
        assert_eq!(
            now.password_changed_at().map(|t| t.unix_timestamp()),
            changer.password_changed_at().map(|t| t.unix_timestamp())
        );
        let found = store
            .find_by_reset_token_hash("digest", OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(found.map(|f| f.id), Some(u.id));
    }
}
