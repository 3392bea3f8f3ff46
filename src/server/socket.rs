use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info_span, Instrument};

use crate::buffer::BufferProvider;
use crate::session::{Outbound, SessionOptions, SyncSession, TransportEvent};

#[derive(Clone)]
pub struct SocketState {
    pub provider: Arc<dyn BufferProvider>,
    pub options: SessionOptions,
}

pub fn router(state: SocketState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    State(state): State<SocketState>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, socket))
}

/// Pump frames between one browser connection and its session
async fn handle_ws(state: SocketState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let session = SyncSession::new(state.provider.clone(), state.options.clone(), out_tx);
    let span = info_span!("session", id = %session.id());
    tokio::spawn(session.run(in_rx).instrument(span.clone()));

    let mut send_task = tokio::spawn(
        async move {
            while let Some(outbound) = out_rx.recv().await {
                match outbound {
                    Outbound::Text(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
        .instrument(span.clone()),
    );

    async {
        loop {
            tokio::select! {
                _ = &mut send_task => break,
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(TransportEvent::Message(text.to_string())).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => debug!("ignoring binary frame"),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket receive failed");
                        break;
                    }
                },
            }
        }

        let _ = in_tx.send(TransportEvent::Closed);
        debug!("connection finished");
    }
    .instrument(span)
    .await;
}
