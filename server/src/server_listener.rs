use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::client_handler::ClientHandler;
use crate::errors::ServerError;
use crate::rooms::ConnId;
use crate::state::{Shared, State};

const COUNTER_SEED: ConnId = 0;

/// Long-lived accept loop. Owns the connection id counter, so ids are
/// scoped to this listener instance and start fresh with each server.
pub struct ServerListener {
    listener: TcpListener,
    shared: Shared,
    counter: AtomicI32,
}

impl ServerListener {
    /// A failed bind is the one startup error that is fatal to the
    /// whole process.
    pub async fn bind(addr: &str) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;

        Ok(ServerListener {
            listener,
            shared: State::new_shared(),
            counter: AtomicI32::new(COUNTER_SEED),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts forever, spawning one handler task per connection. The
    /// loop itself never blocks on per-connection work.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((tcp_socket, addr)) => {
                    let conn_id = self.counter.fetch_add(1, Ordering::Relaxed);
                    info!("Server received new client connection {:?} as {}", addr, conn_id);

                    ClientHandler::spawn(conn_id, tcp_socket, addr, self.shared.clone());
                }
                Err(e) => {
                    warn!("Failed to accept connection: {:?}", e);
                }
            }
        }
    }
}
