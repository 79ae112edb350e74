use crate::{config::Config, redis_client::RedisClient, websocket::RoomRegistry};
use deadpool_postgres::Pool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool,
    pub registry: RoomRegistry,
    pub redis: RedisClient,
    pub config: Arc<Config>,
}
