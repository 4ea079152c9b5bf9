//! HTTP server exposing the WebSocket bridge and health endpoints

pub mod websocket;

pub use websocket::{handle_socket, routes, serve, AppState};
