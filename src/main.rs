//! Easy Chat - self-hosted chat session service
//!
//! Loads the stored conversation, serves it over HTTP, and saves it again on
//! shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use easy_chat::config::Config;
use easy_chat::core::{ChatSession, MemoryStore};
use easy_chat::providers::Provider;
use easy_chat::{routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easy_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let store = Arc::new(MemoryStore::new(&config.database_path()).await?);
    tracing::info!("💾 Conversation store at {}", config.database_path().display());

    let provider = Provider::from_config(&config.llm)?;
    tracing::info!("🤖 Using {} ({})", provider.name(), config.llm.model);

    let session = ChatSession::start(Arc::new(provider), store).await?;

    let state = AppState {
        config,
        session: session.clone(),
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("💬 Easy Chat running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown().await?;
    tracing::info!("Conversation saved, bye");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
