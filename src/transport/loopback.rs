//! In-process connection between two endpoints.

use std::sync::Arc;

use tokio::io::duplex;

use super::connection::Connection;
use super::endpoint::Endpoint;
use crate::direction::LogicalSide;
use crate::error::{Error, Result};

/// Connect `server` and `client` over an in-memory duplex stream.
///
/// Both connections report `is_local() == true`. Returns
/// `(server_connection, client_connection)`; the login exchange is
/// already under way when this returns.
pub async fn loopback(server: &Endpoint, client: &Endpoint) -> Result<(Arc<Connection>, Arc<Connection>)> {
    if server.side() != LogicalSide::Server || client.side() != LogicalSide::Client {
        return Err(Error::Protocol(format!(
            "Loopback needs a server and a client endpoint, got {} and {}",
            server.side(),
            client.side()
        )));
    }

    let capacity = server
        .config()
        .read_buffer_size
        .max(client.config().read_buffer_size)
        .max(1);
    let (server_stream, client_stream) = duplex(capacity);

    let client_connection = client.open(client_stream, true).await?;
    let server_connection = server.open(server_stream, true).await?;
    Ok((server_connection, client_connection))
}
