//! Gateway - WebSocket listener that accepts push sockets.
//!
//! A socket attaches to a connection registered through `connect`. The
//! handshake path is `/ws?conn_id=...`; unknown connections and disallowed
//! origins are refused with 403 before the upgrade completes.

use crate::config::WebSocketConfig;
use crate::network::SocketSession;
use crate::state::{Connection, Store};
use axum::extract::Query;
use channelstream_proto::api::ListenQuery;
use http::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{error, info, instrument, warn};

/// Path sockets must request during the handshake.
pub const SOCKET_PATH: &str = "/ws";

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Validate an upgrade request and resolve the connection it names.
pub fn check_handshake(
    req: &Request,
    allow_origins: &[String],
    store: &Store,
) -> Result<Arc<Connection>, ErrorResponse> {
    if req.uri().path() != SOCKET_PATH {
        return Err(reject(StatusCode::NOT_FOUND, "unknown socket path"));
    }

    // If allow_origins is empty, allow all origins
    if !allow_origins.is_empty() {
        let origin = req.headers().get("Origin").and_then(|o| o.to_str().ok());
        let allowed = origin.is_some_and(|origin| {
            allow_origins.iter().any(|a| a == origin || a == "*")
        });
        if !allowed {
            warn!(origin = ?origin, "WebSocket CORS rejected");
            return Err(reject(StatusCode::FORBIDDEN, "CORS origin not allowed"));
        }
    }

    let conn_id = Query::<ListenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.conn_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "conn_id is required"))?;

    store
        .connection(&conn_id)
        .filter(|conn| !conn.is_marked_for_gc())
        .ok_or_else(|| reject(StatusCode::FORBIDDEN, "unknown connection"))
}

/// The Gateway accepts WebSocket connections and spawns push sessions.
pub struct Gateway {
    listener: TcpListener,
    allow_origins: Vec<String>,
    store: Arc<Store>,
    keepalive: Duration,
}

impl Gateway {
    /// Bind the gateway to the configured address.
    ///
    /// `keepalive` is how often an idle socket refreshes its connection.
    pub async fn bind(
        config: &WebSocketConfig,
        store: Arc<Store>,
        keepalive: Duration,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.address).await?;
        info!(address = %config.address, "WebSocket listener bound");
        Ok(Self {
            listener,
            allow_origins: config.allow_origins.clone(),
            store,
            keepalive,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        let allow_origins: Arc<[String]> = self.allow_origins.into();
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!(%addr, "WebSocket connection attempt");
                    let store = Arc::clone(&self.store);
                    let allowed = Arc::clone(&allow_origins);
                    let keepalive = self.keepalive;
                    tokio::spawn(async move {
                        accept_socket(stream, addr, store, &allowed, keepalive).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept WebSocket connection");
                }
            }
        }
    }
}

async fn accept_socket(
    stream: TcpStream,
    addr: SocketAddr,
    store: Arc<Store>,
    allow_origins: &[String],
    keepalive: Duration,
) {
    let mut resolved = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let conn = check_handshake(req, allow_origins, &store)?;
        resolved = Some(conn);
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!(%addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let Some(conn) = resolved else {
        return;
    };

    info!(%addr, conn_id = %conn.id, "WebSocket handshake successful");
    let conn_id = conn.id.clone();
    let session = SocketSession::new(conn, store, ws_stream, addr, keepalive);
    if let Err(e) = session.run().await {
        error!(%conn_id, %addr, error = %e, "WebSocket connection error");
    }
    info!(%conn_id, %addr, "WebSocket connection closed");
}
