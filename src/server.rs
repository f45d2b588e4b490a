//! HTTP surface of the control server.

use crate::store;
use crate::stream::tail_messages;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use log::{info, trace, warn};
use serde::Serialize;
use std::convert::Infallible;
use std::future::{Future, IntoFuture};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Request bodies larger than this are rejected.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
struct AppState {
    log_path: Arc<PathBuf>,
    shutdown: CancellationToken,
}

/// Status and log-management endpoints over one active log file.
#[derive(Debug)]
pub struct ControlServer {
    state: AppState,
}

impl ControlServer {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        ControlServer {
            state: AppState {
                log_path: Arc::new(log_path.into()),
                shutdown: CancellationToken::new(),
            },
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.state.log_path
    }

    /// Token cancelled when the server begins shutting down. Every tail
    /// session runs under a child of it; cancelling it also starts shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/status", get(status))
            .route("/logs/download", get(download_log))
            .route("/logs/tail", get(tail_log))
            .route("/logs/truncate", post(truncate_log))
            .layer(middleware::from_fn(log_request))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(self.state.clone());

        Router::new().nest("/api", api)
    }

    /// Serve until `signal` resolves or the shutdown token is cancelled.
    ///
    /// Shutdown stops accepting connections and cancels every tail session,
    /// then waits at most `grace` for open connections to finish.
    pub async fn serve<F>(self, listener: TcpListener, signal: F, grace: Duration) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!("control server listening on {addr}");
        }

        let shutdown = self.state.shutdown.clone();
        let trigger = shutdown.clone();
        let app = self.router();

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = signal => {}
                    _ = trigger.cancelled() => {}
                }
                info!("shutting down control server");
                trigger.cancel();
            })
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                info!("control server shut down gracefully");
                result
            }
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!("connections still open after {grace:?}, forcing shutdown");
                Ok(())
            }
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let response = next.run(req).await;

    trace!(
        "{method} {path} status={} latency={:?}",
        response.status().as_u16(),
        start.elapsed()
    );
    response
}

#[derive(Debug, Serialize)]
struct StatusBody {
    hello: &'static str,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn status() -> Json<StatusBody> {
    Json(StatusBody { hello: "world" })
}

async fn download_log(State(state): State<AppState>) -> Response {
    let path = &state.log_path;

    match store::open_active(path).await {
        Ok(file) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename={}", base_name(path)),
                ),
            ],
            Body::from_stream(ReaderStream::new(file)),
        )
            .into_response(),
        Err(e) => {
            warn!("download of {} failed: {e}", path.display());
            error_response(format!("error opening file: {e}"))
        }
    }
}

async fn tail_log(State(state): State<AppState>) -> impl IntoResponse {
    let events = tail_messages(&state.log_path, state.shutdown.child_token())
        .map(|message| Ok::<_, Infallible>(message.into_sse()));

    (
        [(header::CONNECTION, "keep-alive")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
}

async fn truncate_log(State(state): State<AppState>) -> Response {
    let path = Arc::clone(&state.log_path);
    let reset_path = Arc::clone(&path);
    let result = tokio::task::spawn_blocking(move || store::reset(&reset_path))
        .await
        .unwrap_or_else(|e| Err(io::Error::other(e)));

    match result {
        Ok(()) => {
            info!("log file {} wiped", path.display());
            Json(MessageBody {
                message: format!("Log file {} wiped successfully", path.display()),
            })
            .into_response()
        }
        Err(e) => {
            warn!("wiping {} failed: {e}", path.display());
            error_response(format!("error wiping log file: {e}"))
        }
    }
}

fn error_response(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: message }),
    )
        .into_response()
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
