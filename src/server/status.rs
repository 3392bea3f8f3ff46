//! Status responder: tells the browser extension where the socket listener is.

use axum::{extract::State, Json, Router};

use crate::protocol::StatusResponse;

/// Every method on every path answers with the same status document
pub fn router(socket_port: u16) -> Router {
    Router::new().fallback(status).with_state(socket_port)
}

async fn status(State(socket_port): State<u16>) -> Json<StatusResponse> {
    Json(StatusResponse::new(socket_port))
}
