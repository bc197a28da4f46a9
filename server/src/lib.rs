use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, trace::TraceLayer,
};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

pub mod assembler;
pub mod chunks;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod file_reply;
pub mod files;
mod handlers;
pub mod metadata;
pub mod paths;
pub mod sessions;
pub mod tree;
pub mod upload;

#[cfg(test)] // <-- not needed in integration tests
extern crate rstest;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::init_upload,
        handlers::upload_chunk,
        handlers::complete_upload,
        handlers::abandon_upload,
        handlers::list_files,
        handlers::delete_file,
        handlers::batch_delete,
        handlers::download,
        handlers::stats,
    ),
    components(
        schemas(
            kernel::InitUploadRequest,
            kernel::InitUploadResponse,
            kernel::ChunkReceipt,
            kernel::CompleteUploadRequest,
            kernel::CompleteUploadResponse,
            kernel::NodeKind,
            kernel::TreeNode,
            kernel::Stats,
            kernel::DeleteResult,
            kernel::BatchDeleteRequest,
            kernel::BatchDeleteResult,
            kernel::ErrorReply,
            handlers::ChunkForm,
        ),
        responses(file_reply::FileReply),
    ),
    tags(
        (name = "upload", description = "Resumable chunked upload API"),
        (name = "files", description = "Stored files API"),
    )
)]
struct ApiDoc;

/// Starts the server using `FILEHUB_*` environment settings and serves until
/// Ctrl+C or SIGTERM.
pub async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "server=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let engine = Arc::new(Engine::open(&config)?);
    tracing::info!(
        "storing files in {} ({} tracked)",
        engine.upload_dir().display(),
        engine.registry().all().len()
    );

    let socket = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(socket).await?;
    tracing::debug!("listening on {}", listener.local_addr()?);

    let app = create_routes(engine, config.body_limit);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn create_routes(engine: Arc<Engine>, body_limit: usize) -> Router {
    Router::new()
        .route("/api/upload/init", post(handlers::init_upload))
        .route("/api/upload/chunk", post(handlers::upload_chunk))
        .route("/api/upload/complete", post(handlers::complete_upload))
        .route("/api/upload/:upload_id", delete(handlers::abandon_upload))
        .route("/api/files", get(handlers::list_files))
        .route("/api/files/batch", delete(handlers::batch_delete))
        .route("/api/files/:file_id", delete(handlers::delete_file))
        .route("/api/download/:file_id", get(handlers::download))
        .route("/api/stats", get(handlers::stats))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        tracing::error!("Server error: {error}");
                    },
                ))
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(body_limit))
                .into_inner(),
        )
        .with_state(engine)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
