use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workbench_access::{
    AuthFlow, AuthorizationClient, AuthorizationGuard, CookieSigner, IdentityProvider,
    MemorySessionBackend, PermissionModel, SessionBackend, SessionStore,
};
use workbench_server::{
    auth::{AppState, db::PgSessionBackend},
    build_router,
    config::ServerConfig,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // An inconsistent role table must stop startup
    let permission_model = PermissionModel::load().expect("invalid permission model");
    let signer =
        CookieSigner::new(config.session.secret.as_bytes()).expect("invalid session secret");

    let backend: Arc<dyn SessionBackend> = match &config.database_url {
        Some(database_url) => {
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .expect("failed to connect to database");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&db_pool)
                .await
                .expect("failed to run migrations");

            Arc::new(PgSessionBackend::new(db_pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sessions are kept in memory");
            Arc::new(MemorySessionBackend::new())
        }
    };
    let store = SessionStore::new(backend, signer);

    // Cleanup expired sessions on startup
    match store.delete_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(
                deleted_entries = count,
                "Cleaned up expired sessions on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired sessions on startup");
        }
    }

    // Spawn periodic session cleanup task
    let cleanup_store = store.clone();
    let cleanup_interval_secs = config.session.cleanup_interval_seconds;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            match cleanup_store.delete_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_entries = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    });

    // Initialize the authorization client
    let provider: Option<Arc<dyn IdentityProvider>> = match config.oauth {
        Some(oauth) => {
            let client = AuthorizationClient::new(oauth).expect("invalid OAuth configuration");
            tracing::info!(
                issuer = client.config().issuer(),
                authorize_url = client.config().authorize_url(),
                "Identity provider configured"
            );
            Some(Arc::new(client) as Arc<dyn IdentityProvider>)
        }
        None => {
            tracing::warn!("OAUTH is not configured, login is disabled");
            None
        }
    };

    let flow = AuthFlow::new(store, provider, config.session.flow_settings());
    let guard = AuthorizationGuard::new(Arc::new(permission_model));
    let app_state = Arc::new(AppState::new(flow, guard, config.session));

    let app = build_router(app_state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
