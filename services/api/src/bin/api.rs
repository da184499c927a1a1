//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        db::run_migrations, EmailChannel, InAppChannel, MessagingChannel, PgNotificationStore,
        PgSessionStore, PgSlotStore,
    },
    config::Config,
    error::ApiError,
    web::{
        rest, spawn_reminder_task, state::AppState, ApiDoc,
    },
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, Method,
};
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use care_scheduling_core::dispatch::Dispatcher;
use care_scheduling_core::memory::{InMemoryNotificationStore, InMemorySessionStore, InMemorySlotStore};
use care_scheduling_core::ports::{Clock, NotificationStore, SessionStore, SlotStore, SystemClock};
use care_scheduling_core::reminder::ReminderEngine;
use care_scheduling_core::scheduler::Scheduler;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Select the Storage Backend ---
    let (slots, sessions, notifications): (
        Arc<dyn SlotStore>,
        Arc<dyn SessionStore>,
        Arc<dyn NotificationStore>,
    ) = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            info!("Running database migrations...");
            run_migrations(&db_pool).await?;
            info!("Database migrations complete.");
            (
                Arc::new(PgSlotStore::new(db_pool.clone())),
                Arc::new(PgSessionStore::new(db_pool.clone())),
                Arc::new(PgNotificationStore::new(db_pool)),
            )
        }
        None => {
            info!("DATABASE_URL not set; running on in-memory storage");
            (
                Arc::new(InMemorySlotStore::new()),
                Arc::new(InMemorySessionStore::new()),
                Arc::new(InMemoryNotificationStore::new()),
            )
        }
    };

    // --- 3. Build the Scheduling Core ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = Arc::new(Scheduler::new(slots.clone(), sessions.clone()));
    let engine = Arc::new(ReminderEngine::new(
        sessions.clone(),
        notifications.clone(),
        clock.clone(),
        config.reminder_config(),
    ));

    // --- 4. Register Delivery Channels ---
    let in_app = Arc::new(InAppChannel::new(clock.clone()));
    let mut dispatcher = Dispatcher::new(notifications.clone(), clock, config.retry_policy());
    dispatcher.register(in_app.clone());

    let http_client = reqwest::Client::new();
    if let Some(webhook_url) = &config.messaging_webhook_url {
        info!("Messaging channel enabled");
        dispatcher.register(Arc::new(MessagingChannel::new(
            http_client.clone(),
            webhook_url.clone(),
        )));
    }
    if let (Some(api_url), Some(api_key)) = (&config.email_api_url, &config.email_api_key) {
        info!("Email channel enabled");
        dispatcher.register(Arc::new(EmailChannel::new(
            http_client,
            api_url.clone(),
            api_key.clone(),
        )));
    }
    let dispatcher = Arc::new(dispatcher);

    // --- 5. Spawn the Reminder Sweep ---
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (sweep, sweep_task) =
        spawn_reminder_task(engine, dispatcher, config.sweep_interval, shutdown_rx);

    // --- 6. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        scheduler,
        slots,
        sessions,
        notifications,
        in_app,
        sweep,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-user-role"),
        ]);

    // --- 7. Create the Web Router ---
    let api_router = Router::new()
        .route("/slots/open", get(rest::list_open_slots_handler))
        .route("/slots", post(rest::publish_slot_handler))
        .route("/slots/{slot_id}", delete(rest::delete_slot_handler))
        .route(
            "/sessions",
            post(rest::book_session_handler).get(rest::list_sessions_handler),
        )
        .route(
            "/sessions/{session_id}/schedule",
            put(rest::reschedule_session_handler),
        )
        .route(
            "/sessions/{session_id}",
            delete(rest::cancel_session_handler),
        )
        .route(
            "/sessions/{session_id}/complete",
            post(rest::complete_session_handler),
        )
        .route(
            "/sessions/{session_id}/progress",
            put(rest::update_progress_handler),
        )
        .route("/notifications", get(rest::list_notifications_handler))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 8. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Stop the sweep and let the in-flight pass finish.
    let _ = shutdown_tx.send(true);
    let _ = sweep_task.await;

    Ok(())
}
