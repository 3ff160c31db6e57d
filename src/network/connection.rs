//! SocketSession - push delivery over one WebSocket.
//!
//! The session owns the consuming end of its connection's queue and runs a
//! single `tokio::select!` loop over three sources:
//!
//! ```text
//!   queue record  ──▶ text frame (JSON array with one record)
//!   inbound frame ──▶ refresh last_active (close ends the session)
//!   keepalive     ──▶ refresh last_active, or close if the connection is gone
//! ```
//!
//! Closing the socket does not mark the connection for collection; the idle
//! sweep removes it once keepalives stop.

use crate::handlers::render_batch;
use crate::state::{Connection, Store};
use crate::telemetry::spans;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{Instrument, debug};

/// A push session bound to one connection.
pub struct SocketSession {
    conn: Arc<Connection>,
    store: Arc<Store>,
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    keepalive: Duration,
}

impl SocketSession {
    pub fn new(
        conn: Arc<Connection>,
        store: Arc<Store>,
        ws: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        keepalive: Duration,
    ) -> Self {
        Self {
            conn,
            store,
            ws,
            addr,
            keepalive,
        }
    }

    /// Push records until either side goes away.
    pub async fn run(self) -> anyhow::Result<()> {
        let span = spans::socket(&self.conn.id, &self.addr.to_string());
        crate::metrics::socket_opened();
        let result = self.serve().instrument(span).await;
        crate::metrics::socket_closed();
        result
    }

    async fn serve(self) -> anyhow::Result<()> {
        let Self {
            conn,
            store,
            ws,
            keepalive,
            ..
        } = self;
        let (mut sink, mut stream) = ws.split();

        conn.touch(store.now());
        let mut rx = conn.queue().consumer().await;
        let mut ticker = tokio::time::interval(keepalive);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                record = rx.recv() => {
                    let Some(record) = record else {
                        break Ok(());
                    };
                    let text = render_batch(std::slice::from_ref(&record), None);
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break Err(e.into());
                    }
                }
                frame = stream.next() => match frame {
                    None | Some(Ok(Message::Close(_))) => {
                        debug!("Client closed socket");
                        break Ok(());
                    }
                    Some(Ok(_)) => conn.touch(store.now()),
                    Some(Err(e)) => break Err(e.into()),
                },
                _ = ticker.tick() => {
                    let live = store
                        .connection(&conn.id)
                        .is_some_and(|c| Arc::ptr_eq(&c, &conn) && !c.is_marked_for_gc());
                    if !live {
                        debug!("Connection collected; closing socket");
                        let _ = sink.send(Message::Close(None)).await;
                        break Ok(());
                    }
                    conn.touch(store.now());
                }
            }
        }
    }
}
