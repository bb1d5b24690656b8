use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use db_pool::{create_pool, DbConfig};
use hospital_service::{
    db::MIGRATOR,
    handlers::{self, health, realtime},
    logging::{self, PathOnlyRootSpan},
    metrics,
    middleware::JwtAuthMiddleware,
    security::JwtValidator,
    services::RedisQueueCache,
    AppState, Config,
};
use redis_utils::{redact_url, RedisPool};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

const SERVICE_NAME: &str = "hospital-service";

fn startup_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    tracing::error!("{}: {}", context, err);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    logging::init_tracing();

    let config = Config::from_env().map_err(|e| startup_error("Invalid configuration", e))?;
    tracing::info!(env = %config.app.env, "Starting {}", SERVICE_NAME);

    // Database
    let mut db_config =
        DbConfig::from_env(SERVICE_NAME).map_err(|e| startup_error("Invalid database config", e))?;
    db_config.database_url = config.database.url.clone();
    db_config.max_connections = db_config.max_connections.max(config.database.max_connections);
    db_config.log_config();

    let db = create_pool(db_config)
        .await
        .map_err(|e| startup_error("Failed to connect to database", e))?;

    if config.database.run_migrations {
        MIGRATOR
            .run(&db)
            .await
            .map_err(|e| startup_error("Failed to run migrations", e))?;
        tracing::info!("Database migrations applied");
    }

    // Redis queue mirror
    let redis = RedisPool::connect(&config.redis.url)
        .await
        .map_err(|e| startup_error("Failed to connect to Redis", e))?;
    tracing::info!(url = %redact_url(&config.redis.url), "Redis queue cache ready");
    let cache = Arc::new(RedisQueueCache::new(
        &redis,
        config.redis.queue_ttl_secs,
        Duration::from_millis(config.redis.command_timeout_ms),
    ));

    let account_checks = config
        .auth
        .verify_active_accounts
        .then(|| Duration::from_secs(config.auth.account_check_ttl_secs));
    let state = web::Data::new(
        AppState::build(db, cache, &config.queue).account_checks(account_checks),
    );
    let jwt = web::Data::from(Arc::new(JwtValidator::new(&config.auth.jwt_secret)));

    let bind_addr = (config.app.host.clone(), config.app.port);
    let cors_origin = config.app.cors_origin.clone();
    if cors_origin.is_none() && config.is_production() {
        tracing::warn!("CORS_ORIGIN is not set; accepting requests from any origin");
    }
    tracing::info!("Starting HTTP server on {}:{}", bind_addr.0, bind_addr.1);

    HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allow_any_method()
                .allow_any_header()
                .supports_credentials()
                .max_age(3600),
            None => Cors::permissive(),
        };

        App::new()
            .app_data(state.clone())
            .app_data(jwt.clone())
            .wrap(middleware::Logger::new(logging::ACCESS_LOG_FORMAT))
            .wrap(TracingLogger::<PathOnlyRootSpan>::new())
            .wrap(metrics::MetricsMiddleware)
            .wrap(cors)
            .route("/health", web::get().to(health::liveness))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .route("/ws", web::get().to(realtime::ws_connect))
            .route("/api/v1/health", web::get().to(health::api_health))
            .service(
                web::scope("/api/v1")
                    .wrap(JwtAuthMiddleware)
                    .configure(handlers::configure_api),
            )
    })
    .bind(bind_addr)?
    .run()
    .await
}
