use actix_web::{middleware::Logger, web, App, HttpServer};
use chat_service::{
    config::{self, StoreBackend},
    db, error, logging,
    realtime::{relay, ChannelHub, Realtime, RelayPublisher},
    routes,
    services::{BlobJanitor, HttpBlobStore, HttpProfileDirectory, HttpPropertyDirectory},
    state::AppState,
    store::{MemoryMessageStore, MessageStore, PgMessageStore},
};
use crypto_core::{ChannelKeys, JwtVerifier};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let store: Arc<dyn MessageStore> = match cfg.store {
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| error::AppError::Config("DATABASE_URL missing".into()))?;
            let pool = db::init_pool(url, cfg.database_max_connections).await?;
            Arc::new(PgMessageStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory message store; data is lost on restart");
            Arc::new(MemoryMessageStore::new())
        }
    };

    let verifier = Arc::new(
        JwtVerifier::from_rsa_pem(&cfg.jwt_public_key_pem)
            .map_err(|e| error::AppError::StartServer(format!("identity key: {e}")))?,
    );
    let channel_keys = Arc::new(
        ChannelKeys::from_rsa_pem(
            &cfg.channel_private_key_pem,
            &cfg.channel_public_key_pem,
            chrono::Duration::seconds(cfg.channel_token_ttl_secs),
        )
        .map_err(|e| error::AppError::StartServer(format!("channel keys: {e}")))?,
    );

    let collaborators = &cfg.collaborators;
    let profiles = Arc::new(HttpProfileDirectory::new(
        collaborators.profile_service_url.clone(),
        collaborators.timeout,
    )?);
    let properties = Arc::new(HttpPropertyDirectory::new(
        collaborators.property_service_url.clone(),
        collaborators.timeout,
    )?);
    let blobs = Arc::new(HttpBlobStore::new(
        collaborators.blob_service_url.clone(),
        collaborators.timeout,
    )?);
    let (janitor, _janitor_task) = BlobJanitor::spawn(blobs);

    let realtime = match cfg.redis_url.as_deref() {
        Some(url) => {
            let client = redis::Client::open(url)
                .map_err(|e| error::AppError::Config(format!("REDIS_URL: {e}")))?;
            let conn = redis::aio::ConnectionManager::new(client.clone())
                .await
                .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;

            let origin = Uuid::new_v4();
            let hub = Arc::new(ChannelHub::new());
            let (publisher, _publisher_task) = RelayPublisher::spawn(conn, origin);
            let _listener_task = relay::spawn_listener(client, origin, hub.clone()).await?;
            Realtime::with_relay(hub, publisher)
        }
        None => {
            tracing::info!("REDIS_URL not set; realtime channels are single-instance");
            Realtime::local()
        }
    };

    let state = AppState::new(store, profiles, properties, janitor, realtime, channel_keys);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting chat-service");

    HttpServer::new(move || {
        App::new()
            .wrap(actix_middleware::RequestId::new())
            .wrap(Logger::new(
                r#"%a "%r" %s %b %Dms request_id=%{X-Request-ID}o"#,
            ))
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure(verifier.clone()))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))
}
