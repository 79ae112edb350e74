use db_pool::{create_pool as create_pg_pool, DbConfig as DbPoolConfig, PgPool, PoolError};

pub async fn init_pool(database_url: &str) -> Result<PgPool, PoolError> {
    let mut cfg = DbPoolConfig::from_env("alumni-chat-service").unwrap_or_default();
    if cfg.database_url.is_empty() {
        cfg.database_url = database_url.to_string();
    }
    cfg.log_config();
    create_pg_pool(cfg).await
}
