mod annotate;
mod config;
mod detectors;
mod documents;
mod fetch;
mod folder;
mod grpc;
mod http;
mod model_config;
mod models;
mod ocr;
mod onnx;
mod state;
mod text_classifier;
mod yolo;

use config::ServiceConfig;
use grpc::{TriageService, media_triage_service};
use state::AppState;
use std::future::IntoFuture;
use tokio::signal;
use tokio::sync::watch;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forensic_triage=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env();
    info!(
        models_dir = ?config.models_dir,
        intra_threads = config.intra_threads,
        "starting forensic triage service"
    );
    let state = AppState::new(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Reflection lets grpcurl and similar tools discover the service
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(media_triage_service::FILE_DESCRIPTOR_SET)
        .build_v1()?;

    info!("gRPC server listening on {}", config.grpc_addr);
    let grpc_server = Server::builder()
        .add_service(TriageService::new(state.clone()).into_server())
        .add_service(reflection_service)
        .serve_with_shutdown(config.grpc_addr, until_shutdown(shutdown_rx.clone()));

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!("HTTP server listening on {}", config.http_addr);
    let app = http::router(state, &config);
    let http_server = axum::serve(listener, app)
        .with_graceful_shutdown(until_shutdown(shutdown_rx))
        .into_future();

    let (grpc_result, http_result) = tokio::join!(grpc_server, http_server);
    grpc_result?;
    http_result?;
    info!("shutdown complete");
    Ok(())
}

async fn until_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
