//! HTTP server in front of the [`Dispatcher`].
//!
//! - HTTP/1.1 and HTTP/2 with automatic detection
//! - optional TLS with ALPN (`h2`, `http/1.1`)
//! - graceful shutdown: accepting stops, open connections get a graceful
//!   close and [`Server::wait_for_drain`] waits for them
//!
//! ```rust,ignore
//! let server = Server::bind(config.server, dispatcher, middleware::from_config(&config.middleware))?;
//! tokio::select! {
//!     result = server.run() => result?,
//!     _ = tokio::signal::ctrl_c() => server.trigger_shutdown(),
//! }
//! server.wait_for_drain(server.drain_timeout()).await;
//! ```

pub mod connection;
pub mod request;

use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use connection::ConnectionContext;

use crate::broker::{topics, Event};
use crate::config::{ServerConfig, TlsConfig};
use crate::dispatcher::Dispatcher;
use crate::middleware::MiddlewareChain;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct Server {
    config: ServerConfig,
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    context: Arc<ConnectionContext>,
    active_connections: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_initiated: AtomicBool,
}

impl Server {
    /// Bind the listen address. Port 0 picks an ephemeral port, see
    /// [`local_addr`](Self::local_addr).
    pub fn bind(
        config: ServerConfig,
        dispatcher: Dispatcher,
        middleware: MiddlewareChain,
    ) -> Result<Self, BoxError> {
        let tls_acceptor = if config.tls.is_enabled() {
            Some(TlsAcceptor::from(Arc::new(load_tls_config(&config.tls)?)))
        } else {
            None
        };

        let listener = create_listener(config.listen_addr)?;
        let local_addr = listener.local_addr()?;

        let active_connections = Arc::new(AtomicUsize::new(0));
        let context = Arc::new(ConnectionContext {
            dispatcher: Arc::new(dispatcher),
            middleware,
            active_connections: Arc::clone(&active_connections),
            header_timeout: config.header_timeout,
            max_body_size: config.max_body_size,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            listener,
            local_addr,
            tls_acceptor,
            context,
            active_connections,
            shutdown_tx,
            shutdown_rx,
            shutdown_initiated: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.context.dispatcher
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn drain_timeout(&self) -> Duration {
        self.config.drain_timeout
    }

    /// Accept connections until [`trigger_shutdown`](Self::trigger_shutdown).
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::from_std(self.listener.try_clone()?)?;
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Server listening on {}://{}",
            if self.tls_acceptor.is_some() { "https" } else { "http" },
            self.local_addr
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, remote_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "accept error");
                            continue;
                        }
                    };

                    let _ = stream.set_nodelay(true);
                    let keepalive = TcpKeepalive::new()
                        .with_time(Duration::from_secs(5))
                        .with_interval(Duration::from_secs(1))
                        .with_retries(3);
                    let _ = SockRef::from(&stream).set_tcp_keepalive(&keepalive);

                    let ctx = Arc::clone(&self.context);
                    let tls = self.tls_acceptor.clone();
                    let conn_shutdown = self.shutdown_rx.clone();
                    tokio::spawn(async move {
                        ctx.handle_connection(stream, remote_addr, tls, conn_shutdown).await;
                    });
                }
                _ = shutdown_rx.changed() => {
                    debug!("shutdown signalled, stopping accept loop");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop accepting, close open connections gracefully and publish
    /// `shutdown` on the broker. Only the first call has an effect.
    pub fn trigger_shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self
            .context
            .dispatcher
            .broker()
            .publish(topics::SHUTDOWN, &mut Event::Shutdown)
        {
            warn!(error = %e, "shutdown handler failed");
        }
    }

    /// Wait until no connection is open. `false` on timeout.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        let check_interval = Duration::from_millis(100);

        loop {
            let active = self.active_connections();
            if active == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                warn!("Drain timeout reached with {} active connections", active);
                return false;
            }
            debug!("Waiting for {} connections to drain...", active);
            tokio::time::sleep(check_interval).await;
        }
    }
}

fn load_tls_config(tls: &TlsConfig) -> Result<RustlsConfig, BoxError> {
    let cert_path = tls.cert_path.as_ref().ok_or("TLS cert path not set")?;
    let key_path = tls.key_path.as_ref().ok_or("TLS key path not set")?;

    let mut cert_reader = BufReader::new(std::fs::File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .filter_map(|r| r.ok())
        .collect();
    if certs.is_empty() {
        return Err("No certificates found in cert file".into());
    }

    let mut key_reader = BufReader::new(std::fs::File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or("No private key found in key file")?;

    // Both ring and aws-lc-rs may be compiled in; pick ring explicitly.
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = RustlsConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(tls_config)
}

fn create_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
