//! Same-process fast-path connection.
//!
//! Co-located clients can bypass the RPC data path entirely: after a pid
//! handshake the server heap-allocates a cell holding a strong table
//! reference and transmits the cell's address. The client dereferences and
//! copies the reference out, then acknowledges; the server reclaims the
//! cell when the stream ends regardless of outcome.

use crate::service_impl::ReplayServiceImpl;
use crate::status::table_not_found;
use replaydb_core::Table;
use replaydb_proto::{InitializeConnectionRequest, InitializeConnectionResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Drives one fast-path handshake.
///
/// `peer` is the transport's reported peer address; in-process channels
/// report none. Non-local peers are answered with a clean close and no
/// exchange.
pub async fn run_initialize_connection<S>(
    service: ReplayServiceImpl,
    peer: Option<SocketAddr>,
    mut requests: S,
    tx: mpsc::Sender<Result<InitializeConnectionResponse, Status>>,
) where
    S: Stream<Item = Result<InitializeConnectionRequest, Status>> + Unpin + Send,
{
    let local = match peer {
        None => true,
        Some(addr) => addr.ip().is_loopback(),
    };
    if !local {
        return;
    }

    let first = match requests.next().await {
        Some(Ok(request)) => request,
        _ => {
            let _ = tx
                .send(Err(Status::internal("Failed to read from stream")))
                .await;
            return;
        }
    };

    if first.pid != std::process::id() as i64 {
        // A response without an address signals that the client and server
        // are not part of the same process.
        let _ = tx
            .send(Ok(InitializeConnectionResponse { address: 0 }))
            .await;
        return;
    }

    let table = match service.table_by_name(&first.table_name) {
        Some(table) => table,
        None => {
            let _ = tx.send(Err(table_not_found(&first.table_name))).await;
            return;
        }
    };

    // Heap cell holding a strong reference. The client copies the Arc out
    // of the transmitted address rather than taking it, so the server is
    // always responsible for reclaiming the cell.
    let cell_address = Box::into_raw(Box::new(table)) as usize;

    let mut failure = None;
    if tx
        .send(Ok(InitializeConnectionResponse {
            address: cell_address as i64,
        }))
        .await
        .is_ok()
    {
        // Wait for the client to confirm it copied the reference.
        match requests.next().await {
            Some(Ok(ack)) if ack.ownership_transferred => {}
            Some(Ok(_)) => failure = Some(Status::internal("Received unexpected request")),
            _ => failure = Some(Status::internal("Failed to read from stream")),
        }
    }

    // SAFETY: `cell_address` came from `Box::into_raw` above, is reclaimed
    // exactly once, and the client only clones through the pointer while
    // the stream (and therefore this cell) is alive.
    unsafe {
        drop(Box::from_raw(cell_address as *mut Arc<dyn Table>));
    }

    if let Some(status) = failure {
        let _ = tx.send(Err(status)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_detection() {
        let v4: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        let v6: SocketAddr = "[::1]:1234".parse().unwrap();
        let remote: SocketAddr = "10.0.0.7:1234".parse().unwrap();
        assert!(v4.ip().is_loopback());
        assert!(v6.ip().is_loopback());
        assert!(!remote.ip().is_loopback());
    }
}
