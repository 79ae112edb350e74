use actix_web::{web, App, HttpServer};
use alumni_chat_service::{
    config, db, error, logging,
    redis_client::RedisClient,
    routes,
    state::AppState,
    websocket::{start_typing_sweeper, RoomRegistry},
};
use redis_utils::RedisPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    // JWT validation key shared with the identity collaborator
    actix_middleware::init_hs256(cfg.jwt_secret.as_bytes());

    let db = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    let redis_pool = RedisPool::connect(&cfg.redis_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;
    let redis = RedisClient::new(redis_pool.manager());

    let registry = RoomRegistry::new();

    // Expire typing indicators whose typing_stop never arrived
    let sweeper_registry = registry.clone();
    let _typing_sweeper: JoinHandle<()> = tokio::spawn(async move {
        start_typing_sweeper(sweeper_registry, Duration::from_secs(2)).await;
    });

    let state = AppState {
        db,
        registry,
        redis,
        config: cfg.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting alumni-chat-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(actix_middleware::JwtAuth::new())
            .wrap(cors)
            .wrap(actix_middleware::RequestId::new())
            .wrap(actix_middleware::Logging)
            .app_data(web::Data::new(state.clone()))
            .service(routes::conversations::create_direct)
            .service(routes::conversations::create_content_linked)
            .service(routes::conversations::create_group)
            .service(routes::conversations::list_conversations)
            .service(routes::conversations::get_conversation)
            .service(routes::conversations::archive_conversation)
            .service(routes::conversations::add_participant)
            .service(routes::conversations::remove_participant)
            .service(routes::messages::send_message)
            .service(routes::messages::get_history)
            .service(routes::messages::edit_message)
            .service(routes::messages::delete_message)
            .service(routes::messages::forward_message)
            .service(routes::messages::mark_read)
            .service(routes::reactions::add_reaction)
            .service(routes::reactions::remove_reaction)
            .service(routes::wsroute::ws_handler)
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))
}
