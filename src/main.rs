use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use helpdesk::{
    auth::jwt::JwtService,
    config::AppConfig,
    db,
    notifications::{
        builders::BuilderRegistry,
        chat::{ChatClient, DisabledChatClient, HttpChatClient},
        dispatcher::NotificationDispatcher,
        NotificationQueue,
    },
    routes::create_router,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        chat_enabled = config.chat_enabled(),
        queue_capacity = config.notification_queue_capacity,
        "loaded helpdesk configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    if applied > 0 {
        tracing::info!(applied, "database migrations applied");
    }

    let chat: Arc<dyn ChatClient> = match (&config.chat_api_base_url, &config.chat_api_token) {
        (Some(base_url), Some(token)) => Arc::new(HttpChatClient::new(
            base_url.as_str(),
            token.as_str(),
            config.chat_timeout,
        )?),
        _ => {
            tracing::warn!("CHAT_API_BASE_URL or CHAT_API_TOKEN unset; notifications will be recorded as failed");
            Arc::new(DisabledChatClient)
        }
    };

    let (notifications, receiver) = NotificationQueue::channel(config.notification_queue_capacity);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        pool.clone(),
        chat,
        BuilderRegistry::default(),
        config.chat_timeout,
    ));
    let dispatcher_task = dispatcher.spawn(receiver);

    let jwt = JwtService::from_config(&config)?;
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("SERVER_HOST and SERVER_PORT must form a socket address")?;

    let state = AppState::new(pool, config, jwt, notifications);
    let app = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "helpdesk listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // the router (and with it every queue sender) is gone; let the
    // dispatcher drain what was already queued
    if let Err(err) = dispatcher_task.await {
        tracing::error!(error = %err, "notification dispatcher task failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
