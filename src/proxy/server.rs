use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::settings::Settings;

use super::http_handler::HttpHandler;

/// Plain HTTP/1.1 listener in front of the upstream.
pub struct ProxyServer {
    settings: Arc<Settings>,
    handler: Arc<HttpHandler>,
    active: Arc<AtomicUsize>,
}

impl ProxyServer {
    pub fn new(settings: Arc<Settings>, handler: Arc<HttpHandler>) -> Self {
        Self {
            settings,
            handler,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let addr = &self.settings.server.bind;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!(addr = %addr, upstream = %self.settings.upstream.address, "HTTP listener started");

        let max_connections = self.settings.server.max_connections;

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("Failed to accept TCP connection: {}", err);
                    continue;
                }
            };

            let peer_ip = peer_addr.ip();

            if self.active.load(Ordering::Relaxed) >= max_connections {
                debug!(client_ip = %peer_ip, "Max connections reached, dropping");
                drop(stream);
                continue;
            }

            let guard = ConnectionGuard::new(Arc::clone(&self.active));
            let handler = Arc::clone(&self.handler);

            tokio::spawn(async move {
                handle_connection(stream, handler, peer_ip).await;
                drop(guard);
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, handler: Arc<HttpHandler>, peer_ip: IpAddr) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let h = Arc::clone(&handler);
        async move {
            let resp = h.handle(req, peer_ip).await;
            Ok::<_, hyper::Error>(resp)
        }
    });

    let conn = http1::Builder::new().keep_alive(true).serve_connection(io, service);

    if let Err(err) = conn.await {
        debug!(client_ip = %peer_ip, error = %err, "HTTP connection error");
    }
}

/// Holds one slot of the active connection count.
struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self { active }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}
