//! Accept loop of the backend.
//!
//! # Responsibilities
//! - Bind (with `SO_REUSEADDR`, so a killed backend can be restarted on the
//!   same port right away)
//! - Optionally terminate mTLS, rejecting clients without a trusted certificate
//! - Serve each connection with hyper's HTTP/1.1 server, keep-alive on
//!
//! # Design Decisions
//! - Every connection task lives in one `JoinSet` owned by the loop; killing
//!   the server aborts them all, so peers observe the sockets closing

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use crate::backend::service::{self, BackendOptions};

/// A running backend. Dropping it stops the accept loop as well.
pub struct BackendServer {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BackendServer {
    /// Bind `addr` and start serving. mTLS when `tls` is given.
    pub async fn bind(
        addr: &str,
        tls: Option<Arc<ServerConfig>>,
        options: BackendOptions,
    ) -> io::Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            address = %local_addr,
            mode = options.mode,
            client_auth = tls.is_some(),
            "Backend listening"
        );

        let (stop, stopped) = oneshot::channel();
        let acceptor = tls.map(TlsAcceptor::from);
        let task = tokio::spawn(accept_loop(listener, acceptor, service::router(options), stopped));

        Ok(Self {
            local_addr,
            stop: Some(stop),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and drop every open connection. Returns once the port
    /// is free again.
    pub async fn kill(mut self) {
        self.stop_and_join().await;
        tracing::info!(address = %self.local_addr, "Backend killed");
    }

    /// Serve until `signal` resolves, then kill.
    pub async fn serve_until(mut self, signal: impl Future<Output = ()>) {
        signal.await;
        self.stop_and_join().await;
        tracing::info!(address = %self.local_addr, "Backend stopped");
    }

    async fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    router: Router,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    connections.spawn(serve_connection(stream, peer, acceptor.clone(), router.clone()));
                }
                Err(e) => tracing::warn!(error = %e, "Backend accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    connections.shutdown().await;
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, acceptor: Option<TlsAcceptor>, router: Router) {
    tracing::debug!(peer = %peer, "Backend connection accepted");
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => serve_http(TokioIo::new(tls), peer, router).await,
            Err(e) => tracing::warn!(peer = %peer, error = %e, "TLS handshake rejected"),
        },
        None => serve_http(TokioIo::new(stream), peer, router).await,
    }
}

async fn serve_http<I>(io: I, peer: SocketAddr, router: Router)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| router.clone().oneshot(request));
    if let Err(e) = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service)
        .await
    {
        tracing::debug!(peer = %peer, error = %e, "Backend connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn get(port: u16) -> io::Result<String> {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nX-Request-ID: 5\r\nConnection: close\r\n\r\n")
            .await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    #[tokio::test]
    async fn serves_then_restarts_on_same_port() {
        let server = BackendServer::bind("127.0.0.1:0", None, BackendOptions::default())
            .await
            .unwrap();
        let port = server.port();
        assert!(get(port).await.unwrap().contains("Received ReqID 5."));

        server.kill().await;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

        let restarted = BackendServer::bind(&format!("127.0.0.1:{port}"), None, BackendOptions::default())
            .await
            .unwrap();
        assert!(get(port).await.unwrap().contains("Received ReqID 5."));
        restarted.kill().await;
    }

    #[tokio::test]
    async fn kill_closes_open_connections() {
        let server = BackendServer::bind("127.0.0.1:0", None, BackendOptions::default())
            .await
            .unwrap();
        let mut idle = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        // Let the loop accept it before killing.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        server.kill().await;
        let mut buf = [0u8; 16];
        let read = idle.read(&mut buf).await;
        assert!(matches!(read, Ok(0) | Err(_)));
    }
}
