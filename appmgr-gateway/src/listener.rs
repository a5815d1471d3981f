//! TCP and TLS listeners.
//!
//! Plain HTTP is served by `axum::serve`. HTTPS terminates TLS with rustls
//! and serves each connection through hyper-util's auto (HTTP/1 + HTTP/2)
//! builder. Both stop accepting on shutdown and wait for in-flight requests.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ConnectInfo;
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful::GracefulShutdown},
};
use rustls::ServerConfig;
use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use crate::{
    config::{GatewayConfig, TlsConfig},
    context::AppContext,
    error::ServeError,
    pipeline,
};

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does not
/// spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
///
/// # Errors
/// Returns [`ServeError`] if the socket cannot be bound, the TLS material is
/// unusable, or the accept loop fails.
pub async fn serve(config: &GatewayConfig, ctx: Arc<AppContext>) -> Result<(), ServeError> {
    let listener = bind(config.listen_addr).await?;
    serve_on(listener, config.tls.as_ref(), ctx, shutdown_signal()).await
}

/// Bind `addr`.
///
/// # Errors
/// Returns [`ServeError::Bind`].
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServeError> {
    TcpListener::bind(addr).await.map_err(|source| ServeError::Bind { addr, source })
}

/// Serve on an already bound socket until `shutdown` resolves.
///
/// # Errors
/// Returns [`ServeError`] if the TLS material is unusable or the accept loop
/// fails.
pub async fn serve_on<F>(
    listener: TcpListener,
    tls: Option<&TlsConfig>,
    ctx: Arc<AppContext>,
    shutdown: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    for (method, pattern) in ctx.router.routes() {
        tracing::debug!(%method, pattern, "route");
    }
    let app = pipeline::app(ctx);

    match tls {
        None => {
            tracing::info!(%addr, scheme = "http", "listening for requests");
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(shutdown)
                .await?;
        }
        Some(tls) => {
            let acceptor = tls_acceptor(tls)?;
            tracing::info!(%addr, scheme = "https", "listening for requests");
            serve_tls(listener, acceptor, app, shutdown).await;
        }
    }
    tracing::info!("listener stopped");
    Ok(())
}

async fn serve_tls<F>(listener: TcpListener, acceptor: TlsAcceptor, app: axum::Router, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = &mut shutdown => break,
        };
        let Some((stream, remote)) = settle(accepted).await else {
            continue;
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        let watcher = graceful.watcher();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(%remote, error = %e, "TLS handshake failed");
                    return;
                }
            };
            let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(remote));
                app.clone().oneshot(request)
            });
            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            if let Err(e) = watcher.watch(conn).await {
                tracing::debug!(%remote, error = %e, "connection closed with error");
            }
        });
    }

    drop(listener);
    graceful.shutdown().await;
}

async fn settle<T>(accepted: std::io::Result<T>) -> Option<T> {
    match accepted {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::warn!(error = %e, "accept failed");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

/// Build a TLS acceptor from PEM files. TLS 1.2 and 1.3 only.
///
/// # Errors
/// Returns [`ServeError::Tls`] naming the offending file.
pub fn tls_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, ServeError> {
    let certs = CertificateDer::pem_file_iter(&tls.cert_path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| tls_error(&tls.cert_path, e))?;
    if certs.is_empty() {
        return Err(tls_error(&tls.cert_path, "no certificates found"));
    }
    let key = PrivateKeyDer::from_pem_file(&tls.key_path).map_err(|e| tls_error(&tls.key_path, e))?;

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .and_then(|builder| builder.with_no_client_auth().with_single_cert(certs, key))
            .map_err(|e| tls_error(&tls.cert_path, e))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn tls_error(path: &Path, reason: impl std::fmt::Display) -> ServeError {
    ServeError::Tls { path: path.to_owned(), reason: reason.to_string() }
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
