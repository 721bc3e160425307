use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingConfig {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// A postgres URL, or `memory` for the in-process store.
    pub database_url: String,
    pub jwt: JwtConfig,
    pub paging: PagingConfig,
    pub seed_demo_data: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "maintenance-portal".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "maintenance-portal-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let defaults = PagingConfig::default();
        let paging = PagingConfig {
            default_page_size: env_or("DEFAULT_PAGE_SIZE", defaults.default_page_size).max(1),
            max_page_size: env_or("MAX_PAGE_SIZE", defaults.max_page_size).max(1),
        };
        Ok(Self {
            database_url,
            jwt,
            paging,
            seed_demo_data: env_or("SEED_DEMO_DATA", false),
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.eq_ignore_ascii_case("memory")
    }
}
