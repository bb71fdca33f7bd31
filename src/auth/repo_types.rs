use std::{fmt, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "guide" => Ok(Role::Guide),
            "lead-guide" => Ok(Role::LeadGuide),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// Outstanding reset secret. Digest and expiry only ever exist together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReset {
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

/// Groups of columns modified since the record was loaded.
///
/// `CredentialStore::save` writes only the marked groups, so a record read
/// before someone else's write never puts old values back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    /// `name` and `email`.
    pub profile: bool,
    /// Hash, change time and the consumed reset, written together.
    pub password: bool,
    pub reset: bool,
    pub role: bool,
    pub active: bool,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// User record as the core sees it.
///
/// Mutable fields are reached through setters that record what changed.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    name: String,
    email: String,
    /// `None` when the store was asked not to select it.
    #[serde(skip_serializing)]
    password_hash: Option<String>,
    role: Role,
    #[serde(with = "time::serde::rfc3339::option")]
    password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    reset: Option<PendingReset>,
    #[serde(skip_serializing)]
    active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    changes: Changes,
}

impl User {
    /// A freshly inserted, active user with nothing pending.
    pub fn created(id: Uuid, new: NewUser, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            name: new.name,
            email: new.email,
            password_hash: Some(new.password_hash),
            role: new.role,
            password_changed_at: None,
            reset: None,
            active: true,
            created_at,
            changes: Changes::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn password_changed_at(&self) -> Option<OffsetDateTime> {
        self.password_changed_at
    }

    pub fn reset(&self) -> Option<&PendingReset> {
        self.reset.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn changes(&self) -> Changes {
        self.changes
    }

    /// Same record without the credential, as returned by a projection that
    /// did not select it.
    pub fn without_password(mut self) -> Self {
        self.password_hash = None;
        self
    }

    pub fn set_profile(&mut self, name: Option<String>, email: Option<String>) {
        if let Some(name) = name {
            self.name = name;
            self.changes.profile = true;
        }
        if let Some(email) = email {
            self.email = email;
            self.changes.profile = true;
        }
    }

    /// Replaces the credential and consumes any pending reset in one step.
    ///
    /// The change time is backdated a second so a token minted right after
    /// the change (same unix second) is not considered stale.
    pub fn set_password(&mut self, hash: String, now: OffsetDateTime) {
        self.password_hash = Some(hash);
        self.password_changed_at = Some(now - Duration::seconds(1));
        self.reset = None;
        self.changes.password = true;
    }

    pub fn set_reset(&mut self, reset: Option<PendingReset>) {
        self.reset = reset;
        self.changes.reset = true;
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        self.changes.role = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.changes.active = true;
    }

    /// Copies the changed groups of `other` onto this record.
    pub fn apply(&mut self, other: &User) {
        let c = other.changes;
        if c.profile {
            self.name = other.name.clone();
            self.email = other.email.clone();
        }
        if c.password {
            if let Some(hash) = &other.password_hash {
                self.password_hash = Some(hash.clone());
            }
            self.password_changed_at = other.password_changed_at;
            self.reset = None;
        }
        if c.reset {
            self.reset = other.reset.clone();
        }
        if c.role {
            self.role = other.role;
        }
        if c.active {
            self.active = other.active;
        }
    }

    /// True when the password changed after a token with `issued_at` was minted.
    ///
    /// Compared in whole seconds against the backdated change time, so a
    /// token issued less than two seconds before the change still passes.
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .map(|changed| changed.unix_timestamp() > issued_at)
            .unwrap_or(false)
    }

    /// Field checks the store runs on a validating save.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Please tell us your name!".into());
        }
        if !is_valid_email(&self.email) {
            return Err("Please provide a valid email".into());
        }
        if matches!(&self.password_hash, Some(h) if h.is_empty()) {
            return Err("Please provide a password".into());
        }
        Ok(())
    }
}

/// Fields needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Row shape of the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: String,
    pub password_changed_at: Option<OffsetDateTime>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<OffsetDateTime>,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let reset = match (r.password_reset_token, r.password_reset_expires) {
            (Some(token_hash), Some(expires_at)) => Some(PendingReset {
                token_hash,
                expires_at,
            }),
            (None, None) => None,
            _ => return Err(format!("user {} has a half-set password reset", r.id)),
        };
        Ok(Self {
            id: r.id,
            name: r.name,
            email: r.email,
            password_hash: r.password_hash,
            role: r.role.parse()?,
            password_changed_at: r.password_changed_at,
            reset,
            active: r.active,
            created_at: r.created_at,
            changes: Changes::default(),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_user(role: Role) -> User {
    User::created(
        Uuid::new_v4(),
        NewUser {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: "$argon2id$stub".into(),
            role,
        },
        OffsetDateTime::now_utc(),
    )
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn user() -> User {
        let mut u = test_user(Role::User);
        u.set_reset(Some(PendingReset {
            token_hash: "abc".into(),
            expires_at: OffsetDateTime::now_utc(),
        }));
        u
    }

    #[test]
    fn serialized_user_has_no_secrets() {
        let json = serde_json::to_string(&user()).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("reset"));
        assert!(!json.contains("changes"));
    }

    #[test]
    fn set_password_clears_reset_and_marks_change() {
        let mut u = user();
        let now = OffsetDateTime::now_utc();
        u.set_password("new-hash".into(), now);
        assert!(u.reset().is_none());
        assert_eq!(u.password_hash(), Some("new-hash"));
        assert!(u.changes().password);
        assert!(u.changed_password_after(now.unix_timestamp() - 2));
        assert!(!u.changed_password_after(now.unix_timestamp()));
    }

    #[test]
    fn staleness_boundary_is_two_whole_seconds() {
        let issued = datetime!(2026-03-01 12:00:00 UTC);
        let iat = issued.unix_timestamp();

        let mut u = test_user(Role::User);
        u.set_password("h".into(), issued + Duration::milliseconds(1999));
        assert!(!u.changed_password_after(iat));

        u.set_password("h".into(), issued + Duration::seconds(2));
        assert!(u.changed_password_after(iat));
    }

    #[test]
    fn never_changed_is_never_stale() {
        assert!(!user().changed_password_after(0));
    }

    #[test]
    fn loaded_records_start_clean_and_setters_mark_groups() {
        let mut u = test_user(Role::User);
        assert!(u.changes().is_empty());
        u.set_profile(None, None);
        assert!(u.changes().is_empty());
        u.set_profile(Some("Ada King".into()), None);
        u.deactivate();
        let c = u.changes();
        assert!(c.profile && c.active);
        assert!(!c.password && !c.reset && !c.role);
    }

    #[test]
    fn apply_copies_only_changed_groups() {
        let mut stored = test_user(Role::User);
        stored.set_password("newer".into(), OffsetDateTime::now_utc());
        let changed_at = stored.password_changed_at();

        let mut stale = test_user(Role::Admin);
        stale.set_reset(Some(PendingReset {
            token_hash: "digest".into(),
            expires_at: OffsetDateTime::now_utc(),
        }));
        stored.apply(&stale);

        assert_eq!(stored.password_changed_at(), changed_at);
        assert_eq!(stored.password_hash(), Some("newer"));
        assert_eq!(stored.role(), Role::User);
        assert_eq!(stored.reset().map(|r| r.token_hash.as_str()), Some("digest"));
    }

    #[test]
    fn roles_parse_and_print() {
        for role in [Role::User, Role::Guide, Role::LeadGuide, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
        assert_eq!(
            serde_json::to_string(&Role::LeadGuide).unwrap(),
            r#""lead-guide""#
        );
    }

    #[test]
    fn half_set_reset_row_is_rejected() {
        let row = UserRow {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: None,
            role: "user".into(),
            password_changed_at: None,
            password_reset_token: Some("abc".into()),
            password_reset_expires: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        assert!(User::try_from(row).is_err());
    }

    #[test]
    fn validate_checks_name_and_email() {
        let mut u = user();
        assert!(u.validate().is_ok());
        u.set_profile(None, Some("nope".into()));
        assert!(u.validate().is_err());
        u.set_profile(Some("  ".into()), Some("ada@example.com".into()));
        assert!(u.validate().is_err());
    }
}
