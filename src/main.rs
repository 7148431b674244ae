//! file-depot server binary.
//!
//! A token-gated HTTP file store: list, upload, download and delete over a
//! local storage directory. The main entry point loads the token file,
//! builds the Axum router and serves it until a shutdown signal arrives.

mod atomic;
mod auth;
mod conditional;
mod config;
mod download;
mod error;
mod files;
mod http;
mod logging;
mod storage;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span};

use crate::auth::AccessToken;
use crate::config::{Args, load_token_config};
use crate::http::build_cors_layer;
use crate::storage::Storage;
use crate::upload::UploadOptions;

shadow!(build);

/// Per-process switches that change how routes are assembled.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteOptions {
    pub protect_download: bool,
}

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let token_config = match load_token_config(Path::new(&args.config)).await {
        Ok(config) => config,
        Err(err) => {
            error!(config = args.config, error = %err, "failed to load config");
            return Err(err.into());
        }
    };

    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    if let Err(err) = storage.ensure_root().await {
        error!(root = ?storage.root_path(), error = %err, "failed to create storage root");
        return Err(err);
    }

    let token = Arc::new(AccessToken::new(token_config.token));
    let upload_options = Arc::new(UploadOptions {
        atomic: args.atomic_upload,
    });
    let route_options = RouteOptions {
        protect_download: args.protect_download,
    };

    let mut app = build_router(storage, token, upload_options, route_options).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_ip = http::client_ip(request),
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(
        version = build::PKG_VERSION,
        storage_dir = args.storage_dir,
        protect_download = args.protect_download,
        atomic_upload = args.atomic_upload,
        "🚀 Starting HTTP server at {}",
        addr
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// Assembles the routes. `/list`, `/upload` and `/delete` always sit behind
/// the token gate; `/get` joins them only with `protect_download`.
pub fn build_router(
    storage: Arc<Storage>,
    token: Arc<AccessToken>,
    upload_options: Arc<UploadOptions>,
    options: RouteOptions,
) -> Router {
    let downloads = Router::new()
        .route("/get/", get(download::download_root))
        .route("/get/{*path}", get(download::download_file));

    let mut protected = Router::new()
        .route("/list", post(files::list_files))
        .route(
            "/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/delete", post(files::delete_entry));

    let public = if options.protect_download {
        protected = protected.merge(downloads);
        Router::new()
    } else {
        downloads
    };

    protected
        .route_layer(middleware::from_fn(auth::require_token))
        .merge(public)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(Extension(storage))
        .layer(Extension(token))
        .layer(Extension(upload_options))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
