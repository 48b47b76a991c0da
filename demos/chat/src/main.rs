//! Broadcast chat server.
//!
//! Serves WebSocket upgrades on the configured path; every text message is
//! relayed to all other connected clients.
//!
//! Configuration is read from `relay.toml` (or the file named by
//! `RELAY_CONFIG`), then `.env`, then `RELAY__SECTION__KEY` variables.

mod chat;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use relay::prelude::*;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

struct App {
    hub: Hub,
    path: String,
    options: UpgradeOptions,
    worker_config: WorkerConfig,
}

impl App {
    fn route(&self, request: &mut Request<Incoming>) -> Response<Full<Bytes>> {
        if request.uri().path() != self.path {
            let mut response = Response::new(Full::new(Bytes::from_static(b"not found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            return response;
        }
        upgrade_request(request, &self.options, self.worker_config.clone(), self.hub.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new()
        .with_optional_file(config_path())?
        .with_dotenv()?
        .with_env_prefix("RELAY")
        .load()?;

    init_logging(&config.logging.to_log_config())?;
    init_metrics(&config.metrics.to_metrics_config())?;

    let app = Arc::new(App {
        hub: Hub::with_config(config.hub.to_hub_config(), chat::on_message),
        path: config.server.path.clone(),
        options: config.upgrade.to_upgrade_options(),
        worker_config: config.worker.to_worker_config(),
    });

    let listener = TcpListener::bind(&config.server.http_addr).await?;
    info!(
        addr = %config.server.http_addr,
        path = %config.server.path,
        "chat server listening"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, remote_addr)) => {
                    tokio::spawn(serve_connection(Arc::clone(&app), stream, remote_addr));
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
            () = &mut shutdown => {
                info!("shutdown signal received, stopping server");
                break;
            }
        }
    }

    let mut closing = JoinSet::new();
    for worker in app.hub.workers() {
        closing.spawn(async move {
            let _ = worker
                .close_with(CloseCode::GoingAway, "server shutting down")
                .await;
        });
    }
    info!(connections = closing.len(), "closing connections");

    let timeout = config.server.shutdown_timeout();
    if tokio::time::timeout(timeout, async { while closing.join_next().await.is_some() {} })
        .await
        .is_err()
    {
        warn!(?timeout, "shutdown timeout reached with connections still closing");
    }

    app.hub.close();
    info!("server stopped");
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::var_os("RELAY_CONFIG").map_or_else(|| PathBuf::from("relay.toml"), PathBuf::from)
}

async fn serve_connection(app: Arc<App>, stream: TcpStream, remote_addr: SocketAddr) {
    let service = service_fn(move |mut request: Request<Incoming>| {
        let app = Arc::clone(&app);
        async move { Ok::<_, Infallible>(app.route(&mut request)) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!(%remote_addr, error = %e, "connection error");
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}
