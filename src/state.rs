use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::auth::{
    jwt::TokenCodec,
    memory::MemoryCredentialStore,
    password::PasswordHasher,
    repo::{CredentialStore, PgCredentialStore},
};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::mail::{self, MailSender};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub mailer: Arc<dyn MailSender>,
    pub clock: Arc<dyn Clock>,
    pub tokens: TokenCodec,
    pub hasher: PasswordHasher,
    /// Present when users live in Postgres.
    pub db: Option<PgPool>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (store, db) = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                info!("using postgres credential store");
                (
                    Arc::new(PgCredentialStore::new(db.clone())) as Arc<dyn CredentialStore>,
                    Some(db),
                )
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                (
                    Arc::new(MemoryCredentialStore::new(clock.clone())) as Arc<dyn CredentialStore>,
                    None,
                )
            }
        };

        let mailer = mail::from_config(&config.mail).context("configure mail sender")?;
        let hasher = PasswordHasher::new(&config.hash)?;
        let tokens = TokenCodec::new(&config.jwt, clock.clone());

        Ok(Self {
            config,
            store,
            mailer,
            clock,
            tokens,
            hasher,
            db,
        })
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn MailSender>,
        clock: Arc<dyn Clock>,
        hasher: PasswordHasher,
    ) -> Self {
        let tokens = TokenCodec::new(&config.jwt, clock.clone());
        Self {
            config,
            store,
            mailer,
            clock,
            tokens,
            hasher,
            db: None,
        }
    }
}
