//! Listeners: the fixed-port status responder and the WebSocket endpoint.

pub mod socket;
pub mod status;

use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::buffer::BufferProvider;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::session::SessionOptions;

use self::socket::SocketState;

/// Both listeners, bound and ready to serve
pub struct BridgeServer {
    status: TcpListener,
    socket: TcpListener,
    status_addr: SocketAddr,
    socket_addr: SocketAddr,
    state: SocketState,
}

async fn bind_listener(addr: SocketAddr, what: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| {
        BridgeError::Io(io::Error::new(
            e.kind(),
            format!("failed to bind {} listener on port {}: {}", what, addr.port(), e),
        ))
    })
}

impl BridgeServer {
    pub async fn bind(config: &Config, provider: Arc<dyn BufferProvider>) -> Result<Self> {
        let socket = bind_listener(SocketAddr::new(config.host, config.socket_port), "socket").await?;
        let status = bind_listener(SocketAddr::new(config.host, config.status_port), "status").await?;

        let socket_addr = socket.local_addr()?;
        let status_addr = status.local_addr()?;

        Ok(Self {
            status,
            socket,
            status_addr,
            socket_addr,
            state: SocketState {
                provider,
                options: SessionOptions::from(config),
            },
        })
    }

    pub fn status_addr(&self) -> SocketAddr {
        self.status_addr
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.socket_addr
    }

    /// Serve forever
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` resolves. Only the listeners stop; sessions
    /// already running keep going until their own connection or document
    /// closes.
    pub async fn run_until(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });

        info!(
            status = %self.status_addr,
            socket = %self.socket_addr,
            "bridge listening"
        );

        let status_app = status::router(self.socket_addr.port());
        let socket_app = socket::router(self.state);

        let status_server = axum::serve(self.status, status_app)
            .with_graceful_shutdown(stopped(stop_rx.clone()))
            .into_future();
        let socket_server = axum::serve(self.socket, socket_app)
            .with_graceful_shutdown(stopped(stop_rx))
            .into_future();

        tokio::try_join!(status_server, socket_server)?;
        info!("bridge stopped");
        Ok(())
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
