use std::env;

use tracing::{info, Level};
use tracing_subscriber::fmt;

use parley_server::errors::ServerError;
use parley_server::server_listener::ServerListener;

const DEFAULT_ADDR: &str = "127.0.0.1:4321";

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    fmt().compact().with_max_level(Level::INFO).init();

    // single argument: a port, or a full listen address
    let addr = match env::args().nth(1) {
        Some(arg) if arg.contains(':') => arg,
        Some(port) => format!("127.0.0.1:{}", port),
        None => DEFAULT_ADDR.to_owned(),
    };

    let listener = ServerListener::bind(&addr).await?;
    if let Ok(local) = listener.local_addr() {
        info!("Server now listening on {:?}", local);
    }

    listener.run().await;
    Ok(())
}
