use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::{AppConfig, JwtConfig, PagingConfig};
use crate::data::{
    seed, AccessorConfig, DataAccessor, EntityKind, MemoryStore, PgStore, Store,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn Store> = if config.uses_memory_store() {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        } else {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.database_url)
                .await
                .context("connect to database")?;

            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                warn!(error = %e, "migration failed; continuing");
            }
            Arc::new(PgStore::new(pool))
        };

        let state = Self::from_parts(store, config);
        if state.config.seed_demo_data {
            let mut data = state.accessor(seed::seed_config());
            seed::seed_demo_data(&mut data).await.context("seed demo data")?;
        }
        Ok(state)
    }

    pub fn from_parts(store: Arc<dyn Store>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// A fresh unit of work for one request.
    pub fn accessor(&self, config: AccessorConfig) -> DataAccessor {
        DataAccessor::new(self.store.clone(), config)
    }

    /// An accessor limited to `kinds` with default save behavior.
    pub fn data(&self, kinds: impl IntoIterator<Item = EntityKind>) -> DataAccessor {
        self.accessor(AccessorConfig::new(kinds))
    }

    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: "memory".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            paging: PagingConfig::default(),
            seed_demo_data: false,
        });
        Self::from_parts(Arc::new(MemoryStore::new()), config)
    }
}
