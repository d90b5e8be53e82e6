//! `CirclePay` - expense splitting for hobby circles
//!
//! A chat bot that onboards members through a per-user state machine,
//! plus the mini-app and admin HTTP APIs around the same ledger.

mod api;
mod circles;
mod config;
mod db;
mod error;
mod ledger;
mod notify;
mod reminder;
mod runtime;
mod state_machine;

use api::{create_router, AppState, LineTokenVerifier};
use circles::CircleService;
use config::AppConfig;
use db::Database;
use ledger::Ledger;
use notify::{LineMessagingClient, LogOnlySink, MessageSink, Notifier};
use reminder::ReminderScheduler;
use runtime::{MessageRuntime, RecentMessages};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "circlepay=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let circles = CircleService::new(db.clone());
    circles.migrate_legacy()?;

    let sink: Arc<dyn MessageSink> = match &config.line_access_token {
        Some(token) => Arc::new(LineMessagingClient::new(
            &config.line_api_base,
            token.clone(),
        )?),
        None => {
            tracing::warn!("LINE_CHANNEL_ACCESS_TOKEN not set, outbound messages are only logged");
            Arc::new(LogOnlySink)
        }
    };
    let notifier = Notifier::new(sink);
    let ledger = Ledger::new(db.clone(), notifier.clone());

    let runtime = MessageRuntime::new(
        db.clone(),
        circles.clone(),
        ledger.clone(),
        notifier.clone(),
        config.liff_url.clone(),
    );
    let reminders = Arc::new(ReminderScheduler::new(
        ledger.clone(),
        notifier.clone(),
        config.reminder.clone(),
    ));

    if config.admin_api_key.is_none() {
        tracing::warn!("ADMIN_API_KEY not set, admin endpoints are disabled");
    }

    let state = AppState {
        db,
        circles,
        ledger,
        runtime: Arc::new(runtime),
        notifier,
        verifier: Arc::new(LineTokenVerifier::new(&config.line_api_base)?),
        recent: Arc::new(RecentMessages::new(config.recent_messages_capacity)),
        reminders: reminders.clone(),
        admin_api_key: config.admin_api_key.clone(),
    };

    // Background reminder loop
    let shutdown = CancellationToken::new();
    let scheduler = if config.reminder.enabled {
        let cancel = shutdown.clone();
        Some(tokio::spawn(async move { reminders.run(cancel).await }))
    } else {
        tracing::info!("Daily reminders disabled");
        None
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("CirclePay server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        handle.await?;
    }

    Ok(())
}
