use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_iteration::app_state::{build_pipeline, build_sinks, AppState};
use image_iteration::config::AppConfig;
use image_iteration::db;
use image_iteration::routes;
use image_iteration::services::broadcast::ProgressHub;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-iteration server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("pipeline_jobs_total", "Total jobs started");
    metrics::describe_counter!(
        "pipeline_jobs_aborted_total",
        "Jobs stopped early because no new image could be stored"
    );
    metrics::describe_counter!("iterations_completed_total", "Iterations that completed");
    metrics::describe_counter!("iterations_skipped_total", "Iterations that produced no result");
    metrics::describe_histogram!(
        "iteration_duration_seconds",
        "Time to complete one describe/generate/persist/record cycle"
    );
    metrics::describe_counter!("sink_failures_total", "Failed iteration record writes per backend");
    metrics::describe_gauge!("progress_subscribers", "Connected progress channel clients");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let database_url = config
        .require_database_url()
        .expect("DATABASE_URL is required by the server");
    let db_pool = db::init_pool(database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let progress = ProgressHub::default();

    let sinks = build_sinks(&config, Some(db_pool.clone())).expect("Failed to initialize sinks");
    let pipeline = build_pipeline(&config, sinks, Arc::new(progress.clone()))
        .expect("Failed to initialize pipeline services");

    let state = AppState::new(db_pool, pipeline, progress);

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .expect("CORS_ORIGIN is not a valid header value"),
            )
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::health::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting image-iteration on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
