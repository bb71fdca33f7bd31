use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{CredentialStore, StoreError};
use super::repo_types::{NewUser, User};
use crate::clock::Clock;

/// Process-local user table for tests and database-less runs.
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<Uuid, User>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCredentialStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

fn project(user: &User, with_password: bool) -> User {
    if with_password {
        user.clone()
    } else {
        user.clone().without_password()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email() == new.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User::created(Uuid::new_v4(), new, self.clock.now());
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(
        &self,
        id: Uuid,
        with_password: bool,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(&id)
            .filter(|u| u.is_active())
            .map(|u| project(u, with_password)))
    }

    async fn find_by_email(
        &self,
        email: &str,
        with_password: bool,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.is_active() && u.email() == email)
            .map(|u| project(u, with_password)))
    }

    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                u.is_active()
                    && u
                        .reset()
                        .is_some_and(|r| r.token_hash == token_hash && r.expires_at > now)
            })
            .map(|u| project(u, false)))
    }

    async fn save(&self, user: &User, validate: bool) -> Result<(), StoreError> {
        if validate {
            user.validate().map_err(StoreError::Invalid)?;
        }
        let changes = user.changes();
        if changes.is_empty() {
            return Ok(());
        }
        let mut users = self.users.write().await;
        if changes.profile
            && users
                .values()
                .any(|u| u.id != user.id && u.email() == user.email())
        {
            return Err(StoreError::DuplicateEmail);
        }
        let Some(stored) = users.get_mut(&user.id) else {
            return Err(StoreError::Invalid(format!("no user with id {}", user.id)));
        };
        stored.apply(user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::auth::repo_types::{PendingReset, Role};
    use crate::clock::SystemClock;

    fn store() -> MemoryCredentialStore {
        MemoryCredentialStore::new(Arc::new(SystemClock))
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Grace".into(),
            email: email.into(),
            password_hash: "$argon2id$hash".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let s = store();
        s.create(new_user("g@example.com")).await.unwrap();
        let err = s.create(new_user("g@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn password_hash_only_when_asked() {
        let s = store();
        let u = s.create(new_user("g@example.com")).await.unwrap();
        let without = s.find_by_id(u.id, false).await.unwrap().unwrap();
        assert!(without.password_hash().is_none());
        let with = s.find_by_email("g@example.com", true).await.unwrap().unwrap();
        assert_eq!(with.password_hash(), Some("$argon2id$hash"));
    }

    #[tokio::test]
    async fn save_without_hash_keeps_stored_hash() {
        let s = store();
        let u = s.create(new_user("g@example.com")).await.unwrap();
        let mut loaded = s.find_by_id(u.id, false).await.unwrap().unwrap();
        loaded.set_profile(Some("Grace Hopper".into()), None);
        s.save(&loaded, true).await.unwrap();
        let again = s.find_by_id(u.id, true).await.unwrap().unwrap();
        assert_eq!(again.name(), "Grace Hopper");
        assert_eq!(again.password_hash(), Some("$argon2id$hash"));
    }

    #[tokio::test]
    async fn inactive_users_are_hidden() {
        let s = store();
        let mut u = s.create(new_user("g@example.com")).await.unwrap();
        u.deactivate();
        s.save(&u, false).await.unwrap();
        assert!(s.find_by_id(u.id, false).await.unwrap().is_none());
        assert!(s.find_by_email("g@example.com", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_lookup_honours_expiry() {
        let s = store();
        let mut u = s.create(new_user("g@example.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        u.set_reset(Some(PendingReset {
            token_hash: "digest".into(),
            expires_at: now + Duration::minutes(10),
        }));
        s.save(&u, false).await.unwrap();

        assert!(s.find_by_reset_token_hash("digest", now).await.unwrap().is_some());
        assert!(s.find_by_reset_token_hash("other", now).await.unwrap().is_none());
        assert!(s
            .find_by_reset_token_hash("digest", now + Duration::minutes(11))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn validating_save_rejects_bad_email() {
        let s = store();
        let mut u = s.create(new_user("g@example.com")).await.unwrap();
        u.set_profile(None, Some("not-an-email".into()));
        assert!(matches!(
            s.save(&u, true).await.unwrap_err(),
            StoreError::Invalid(_)
        ));
        // without validation the same write goes through
        s.save(&u, false).await.unwrap();
    }

    #[tokio::test]
    async fn stale_copy_does_not_undo_a_password_change() {
        let s = store();
        let u = s.create(new_user("g@example.com")).await.unwrap();
        let mut early = s.find_by_email("g@example.com", false).await.unwrap().unwrap();

        let mut changer = s.find_by_id(u.id, true).await.unwrap().unwrap();
        changer.set_password("$argon2id$newer".into(), OffsetDateTime::now_utc());
        s.save(&changer, true).await.unwrap();

        early.set_reset(Some(PendingReset {
            token_hash: "digest".into(),
            expires_at: OffsetDateTime::now_utc() + Duration::minutes(10),
        }));
        s.save(&early, false).await.unwrap();

        let now = s.find_by_id(u.id, true).await.unwrap().unwrap();
        assert_eq!(now.password_changed_at(), changer.password_changed_at());
        assert_eq!(now.password_hash(), Some("$argon2id$newer"));
        assert!(now.reset().is_some());
    }

    #[tokio::test]
    async fn untouched_save_writes_nothing() {
        let s = store();
        let u = s.create(new_user("g@example.com")).await.unwrap();
        let mut other = s.find_by_id(u.id, false).await.unwrap().unwrap();
        other.set_role(Role::Admin);
        s.save(&other, false).await.unwrap();

        s.save(&u, false).await.unwrap();
        let now = s.find_by_id(u.id, false).await.unwrap().unwrap();
        assert_eq!(now.role(), Role::Admin);
    }
}
