use worker::Env;

pub const DEFAULT_DATABASE_NAME: &str = "galaxiga";
const SQLITE_SCHEME: &str = "sqlite://";
const DEFAULT_AUTH_LEEWAY_SECONDS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendKind {
    Sql,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Name of the `STORE` durable object instance that owns the data.
    pub database_name: String,
    pub auth_leeway_seconds: i64,
}

impl StorageConfig {
    /// A database URL selects the SQL backend, as does a production app
    /// environment. Anything else runs in memory.
    pub fn from_vars(
        database_url: Option<&str>,
        app_env: Option<&str>,
        auth_leeway_seconds: Option<&str>,
    ) -> Self {
        let database_url = database_url.map(str::trim).filter(|url| !url.is_empty());
        let is_production = app_env.is_some_and(|env| env.trim().eq_ignore_ascii_case("production"));

        let backend = if database_url.is_some() || is_production {
            StorageBackendKind::Sql
        } else {
            StorageBackendKind::Memory
        };

        let database_name = database_url
            .and_then(|url| url.strip_prefix(SQLITE_SCHEME))
            .map(|name| name.trim_matches('/'))
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DATABASE_NAME)
            .to_string();

        let auth_leeway_seconds = auth_leeway_seconds
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|value| *value >= 0)
            .unwrap_or(DEFAULT_AUTH_LEEWAY_SECONDS);

        Self {
            backend,
            database_name,
            auth_leeway_seconds,
        }
    }

    pub fn from_env(env: &Env) -> Self {
        let read = |name: &str| {
            env.var(name)
                .map(|value| value.to_string())
                .or_else(|_| env.secret(name).map(|value| value.to_string()))
                .ok()
        };

        Self::from_vars(
            read("DATABASE_URL").as_deref(),
            read("APP_ENV").as_deref(),
            read("AUTH_TOKEN_LEEWAY_SECONDS").as_deref(),
        )
    }
}
