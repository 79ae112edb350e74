use dotenvy::dotenv;
use std::env;

/// Runtime tunables for the messaging core.
///
/// Everything comes from the environment; defaults match the values the
/// platform runs in staging.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    /// Shared secret for validating identity-service JWTs.
    pub jwt_secret: String,
    /// Upper bound on group conversation membership.
    pub max_group_members: usize,
    /// Typing indicators auto-expire after this many seconds even if the
    /// client never sends typing_stop.
    pub typing_ttl_secs: u64,
    /// Interval between server pings on an idle connection.
    pub heartbeat_interval_secs: u64,
    /// A connection that has not answered a ping within this window is
    /// forcibly disconnected and cleaned up.
    pub client_timeout_secs: u64,
    /// Bound on persistence-layer calls issued from the connection read
    /// loop; elapsed calls surface a retryable error instead of hanging.
    pub storage_timeout_ms: u64,
    /// Default and maximum page sizes for message history.
    pub history_page_size: i64,
    pub history_page_size_max: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_SECRET missing".into()))?;

        let max_group_members = env::var("MAX_GROUP_MEMBERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(64);
        let typing_ttl_secs = env::var("TYPING_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let heartbeat_interval_secs = env::var("HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let client_timeout_secs = env::var("CLIENT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let storage_timeout_ms = env::var("STORAGE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        let history_page_size = env::var("HISTORY_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);
        let history_page_size_max = env::var("HISTORY_PAGE_SIZE_MAX")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200);

        Ok(Self {
            database_url,
            redis_url,
            port,
            jwt_secret,
            max_group_members,
            typing_ttl_secs,
            heartbeat_interval_secs,
            client_timeout_secs,
            storage_timeout_ms,
            history_page_size,
            history_page_size_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for key in [
            "MAX_GROUP_MEMBERS",
            "TYPING_TTL_SECS",
            "HEARTBEAT_INTERVAL_SECS",
            "CLIENT_TIMEOUT_SECS",
            "STORAGE_TIMEOUT_MS",
            "HISTORY_PAGE_SIZE",
            "HISTORY_PAGE_SIZE_MAX",
            "PORT",
            "REDIS_URL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_defaults() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/alumni");
        env::set_var("JWT_SECRET", "secret");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_group_members, 64);
        assert_eq!(cfg.typing_ttl_secs, 10);
        assert_eq!(cfg.heartbeat_interval_secs, 5);
        assert_eq!(cfg.client_timeout_secs, 30);
        assert_eq!(cfg.storage_timeout_ms, 5000);
        assert_eq!(cfg.history_page_size, 50);
        assert_eq!(cfg.history_page_size_max, 200);

        env::remove_var("DATABASE_URL");
        env::remove_var("JWT_SECRET");
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_requires_database_url() {
        clear_env();
        env::remove_var("DATABASE_URL");
        env::set_var("JWT_SECRET", "secret");
        assert!(Config::from_env().is_err());
        env::remove_var("JWT_SECRET");
    }
}
