//! Per-connection HTTP handling.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error};

use super::request::{is_multipart, parse_form_fields};
use crate::core::{Context, Request, Response};
use crate::dispatcher::Dispatcher;
use crate::middleware::MiddlewareChain;

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Resets, broken pipes and timeouts are routine; not worth logging.
#[inline]
fn is_connection_error(err_str: &str) -> bool {
    err_str.contains("connection reset")
        || err_str.contains("Connection reset")
        || err_str.contains("broken pipe")
        || err_str.contains("os error 104")
        || err_str.contains("os error 32")
        || err_str.contains("timed out")
        || err_str.contains("HeaderTimeout")
}

/// State shared by every connection of a server.
pub struct ConnectionContext {
    pub dispatcher: Arc<Dispatcher>,
    pub middleware: MiddlewareChain,
    pub active_connections: Arc<AtomicUsize>,
    pub header_timeout: Duration,
    pub max_body_size: usize,
}

impl ConnectionContext {
    /// Serve one accepted connection until it closes or shutdown drains it.
    pub async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        tls_acceptor: Option<TlsAcceptor>,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        match tls_acceptor {
            Some(acceptor) => {
                match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                    Ok(Ok(tls_stream)) => {
                        Arc::clone(&self)
                            .serve(tls_stream, remote_addr, shutdown_rx)
                            .await
                    }
                    Ok(Err(e)) => debug!(peer = %remote_addr, error = %e, "TLS handshake failed"),
                    Err(_) => debug!(peer = %remote_addr, "TLS handshake timeout"),
                }
            }
            None => Arc::clone(&self).serve(stream, remote_addr, shutdown_rx).await,
        }

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    async fn serve<S>(
        self: Arc<Self>,
        stream: S,
        remote_addr: SocketAddr,
        mut shutdown_rx: watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ctx = Arc::clone(&self);
        let service = service_fn(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { ctx.handle_request(req, remote_addr).await }
        });

        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(Some(self.header_timeout))
            .keep_alive(true)
            .http2()
            .max_concurrent_streams(250);

        let conn = builder.serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = shutdown_rx.changed() => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };

        if let Err(err) = result {
            let err_str = format!("{:?}", err);
            if !is_connection_error(&err_str) {
                debug!(peer = %remote_addr, error = %err_str, "connection error");
            }
        }
    }

    async fn handle_request(
        &self,
        req: http::Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<http::Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();

        let body = match Limited::new(body, self.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Ok(plain(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"));
            }
            Err(e) => {
                debug!(peer = %remote_addr, error = %e, "failed to read request body");
                return Ok(plain(StatusCode::BAD_REQUEST, "Bad Request"));
            }
        };

        let mut request = Request::new(parts.method, parts.uri, parts.headers, body.clone())
            .with_peer(remote_addr.ip());
        request.set_version(parts.version);

        if is_multipart(request.content_type()) {
            let content_type = request.content_type().unwrap_or_default().to_string();
            match parse_form_fields(&content_type, body).await {
                Ok(fields) => request = request.with_form_fields(fields),
                Err(e) => {
                    debug!(rid = request.rid(), error = %e, "malformed multipart body");
                    return Ok(plain(StatusCode::BAD_REQUEST, "Bad Request"));
                }
            }
        }

        let mut ctx = Context::for_request(remote_addr.ip(), &request);
        let dispatcher = Arc::clone(&self.dispatcher);
        let response = self
            .middleware
            .process_async(request, &mut ctx, |request| async move {
                let rid = request.rid().to_string();
                match tokio::task::spawn_blocking(move || dispatcher.respond(&request)).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(rid = %rid, error = %e, "dispatcher task failed");
                        Response::internal_error("Internal Server Error")
                    }
                }
            })
            .await;

        let response: http::Response<Bytes> = response.into();
        Ok(response.map(Full::new))
    }
}

fn plain(status: StatusCode, body: &'static str) -> http::Response<Full<Bytes>> {
    let response: http::Response<Bytes> = Response::empty(status).with_body(body).into();
    response.map(Full::new)
}
