//! WebSocket endpoint and HTTP server
//!
//! Each upgraded connection gets a writer task draining its outbound frame
//! channel and a reader loop feeding a [`Session`]. The session's registry
//! entry owns the channel sender, so closing the session also ends the
//! writer.

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::bridge::{ClientRegistry, Session};
use crate::config::ServerSection;
use crate::error::{BridgeError, BridgeResult};
use crate::observability::HealthServer;
use crate::transport::Broker;

/// State shared by every connection
pub struct AppState<B: Broker> {
    pub registry: ClientRegistry,
    pub broker: Arc<B>,
}

impl<B: Broker> AppState<B> {
    pub fn new(registry: ClientRegistry, broker: Arc<B>) -> Self {
        Self { registry, broker }
    }
}

impl<B: Broker> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            broker: self.broker.clone(),
        }
    }
}

fn with_state<B: Broker + 'static>(
    state: AppState<B>,
) -> impl Filter<Extract = (AppState<B>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// WebSocket route at `/<ws_path>` plus the health endpoints
pub fn routes<B: Broker + 'static>(
    state: AppState<B>,
    ws_path: &str,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ws_route = warp::path(ws_path.to_string())
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_state(state.clone()))
        .map(|ws: warp::ws::Ws, state: AppState<B>| {
            ws.on_upgrade(move |socket| handle_socket(socket, state))
        });

    let health_routes = Arc::new(HealthServer::new(
        state.broker.clone(),
        state.registry.clone(),
        ws_path,
    ))
    .routes()
    .with(warp::cors().allow_any_origin());

    ws_route.or(health_routes)
}

/// Drive one upgraded WebSocket connection until it closes
pub async fn handle_socket<B: Broker + 'static>(socket: WebSocket, state: AppState<B>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

    let mut session = Session::open(state.registry, state.broker, frame_tx).await;
    let span = crate::session_span!(client_id = %session.id());

    async move {
        info!("WebSocket client connected");

        let writer = tokio::spawn(
            async move {
                while let Some(frame) = frame_rx.recv().await {
                    if let Err(e) = ws_tx.send(Message::text(frame)).await {
                        debug!("WebSocket send failed: {}", e);
                        break;
                    }
                }
                let _ = ws_tx.close().await;
            }
            .in_current_span(),
        );

        while let Some(result) = ws_rx.next().await {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            };

            if message.is_close() {
                break;
            }
            if let Ok(text) = message.to_str() {
                session.handle_text(text).await;
            } else if message.is_binary() {
                let text = String::from_utf8_lossy(message.as_bytes()).into_owned();
                session.handle_text(&text).await;
            }
        }

        session.close().await;
        if let Err(e) = writer.await {
            debug!("WebSocket writer ended abnormally: {}", e);
        }
        info!("WebSocket client disconnected");
    }
    .instrument(span)
    .await;
}

/// Bind the listener and serve until `shutdown` resolves
pub async fn serve<B, F>(state: AppState<B>, config: &ServerSection, shutdown: F) -> BridgeResult<()>
where
    B: Broker + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
        .await?
        .next()
        .ok_or_else(|| BridgeError::server(format!("Cannot resolve listen host {}", config.host)))?;

    let routes = routes(state, config.ws_path_segment());
    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| BridgeError::server(format!("Failed to bind {addr}: {e}")))?;

    info!(
        "Listening on {}, WebSocket endpoint /{}",
        bound,
        config.ws_path_segment()
    );
    server.await;
    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockBroker;

    #[tokio::test]
    async fn test_websocket_greets_client() {
        let state = AppState::new(ClientRegistry::new(), Arc::new(MockBroker::new()));
        let filter = routes(state, "mqtt");

        let mut client = warp::test::ws()
            .path("/mqtt")
            .handshake(filter)
            .await
            .expect("handshake");

        let frame = client.recv().await.expect("greeting");
        let value: serde_json::Value = serde_json::from_str(frame.to_str().unwrap()).unwrap();
        assert_eq!(value["type"], "connected");
    }

    #[tokio::test]
    async fn test_other_paths_do_not_upgrade() {
        let state = AppState::new(ClientRegistry::new(), Arc::new(MockBroker::new()));
        let filter = routes(state, "mqtt");

        let result = warp::test::ws().path("/other").handshake(filter).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serve_fails_when_port_taken() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();
        let state = AppState::new(ClientRegistry::new(), Arc::new(MockBroker::new()));
        let config = ServerSection {
            host: "127.0.0.1".to_string(),
            port,
            ..ServerSection::default()
        };

        let result = serve(state, &config, async {}).await;
        assert!(matches!(result, Err(BridgeError::Server { .. })));
    }
}
