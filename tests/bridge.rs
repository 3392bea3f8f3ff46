use std::sync::Arc;
use std::time::Duration;

use dx_ghost::buffer::DocumentId;
use dx_ghost::error::ErrorCategory;
use dx_ghost::{BridgeError, BridgeServer, Config, EditorCommand, MemoryBufferProvider};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    Config {
        status_port: 0,
        socket_port: 0,
        settle_delay: Duration::from_millis(20),
        editor: EditorCommand::new("true", Vec::new()),
        ..Config::default()
    }
}

struct Bridge {
    provider: MemoryBufferProvider,
    status_port: u16,
    socket_port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl Bridge {
    async fn start() -> Self {
        let provider = MemoryBufferProvider::new();
        let server = BridgeServer::bind(&test_config(), Arc::new(provider.clone()))
            .await
            .unwrap();
        let status_port = server.status_addr().port();
        let socket_port = server.socket_addr().port();
        let server = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            provider,
            status_port,
            socket_port,
            server,
        }
    }

    async fn connect(&self) -> Client {
        let url = format!("ws://127.0.0.1:{}/", self.socket_port);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
        ws
    }

    /// Wait until the host holds a document titled `title` with `text`
    async fn document(&self, title: &str, text: &str) -> DocumentId {
        for _ in 0..200 {
            if let Some(id) = self.provider.find(title) {
                if self.provider.text(id).as_deref() == Some(text) {
                    return id;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("document {:?} never reached {:?}", title, text);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn send(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame, or None on close / timeout
async fn next_text(client: &mut Client, wait: Duration) -> Option<Value> {
    loop {
        match timeout(wait, client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap())
            }
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

async fn until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_edit_in_editor_and_close() {
    let bridge = Bridge::start().await;
    let mut client = bridge.connect().await;

    // First message seeds the buffer; nothing comes back
    send(&mut client, json!({"title": "Doc1", "text": "hello"})).await;
    let id = bridge.document("Doc1", "hello").await;
    assert!(next_text(&mut client, Duration::from_millis(150)).await.is_none());

    // Local edit reaches the browser after the settle delay
    bridge.provider.edit(id, "hello world").unwrap();
    let frame = next_text(&mut client, Duration::from_secs(2)).await;
    assert_eq!(
        frame,
        Some(json!({
            "selections": [],
            "syntax": "TODO",
            "text": "hello world",
            "title": "Doc1"
        }))
    );

    // Browser confirming the same text is not echoed back
    send(&mut client, json!({"text": "hello world"})).await;
    assert!(next_text(&mut client, Duration::from_millis(150)).await.is_none());
    assert_eq!(bridge.provider.text(id).as_deref(), Some("hello world"));

    // Closing the document hangs up
    bridge.provider.close(id);
    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection was not closed");

    assert!(until(|| bridge.provider.is_released(id)).await);
    assert_eq!(bridge.provider.watcher_count(), 0);
    assert!(bridge.provider.edit(id, "too late").is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_updates_reach_the_buffer() {
    let bridge = Bridge::start().await;
    let mut client = bridge.connect().await;

    send(&mut client, json!({"title": "Notes", "text": "a"})).await;
    let id = bridge.document("Notes", "a").await;

    for text in ["ab", "abc", "abcd"] {
        send(&mut client, json!({"text": text})).await;
    }
    bridge.document("Notes", "abcd").await;

    assert!(next_text(&mut client, Duration::from_millis(150)).await.is_none());
    assert!(bridge.provider.is_open(id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_are_independent() {
    let bridge = Bridge::start().await;
    let mut first = bridge.connect().await;
    let mut second = bridge.connect().await;

    send(&mut first, json!({"title": "One", "text": "1"})).await;
    send(&mut second, json!({"title": "Two", "text": "2"})).await;
    let one = bridge.document("One", "1").await;
    let two = bridge.document("Two", "2").await;
    // Both sessions have their change + close observers in place
    assert!(until(|| bridge.provider.watcher_count() == 4).await);

    bridge.provider.edit(two, "2!").unwrap();
    let frame = next_text(&mut second, Duration::from_secs(2)).await.unwrap();
    assert_eq!(frame["title"], "Two");
    assert_eq!(frame["text"], "2!");
    assert!(next_text(&mut first, Duration::from_millis(100)).await.is_none());

    // Closing one document leaves the other session alone
    bridge.provider.close(one);
    assert!(until(|| bridge.provider.is_released(one)).await);
    bridge.provider.edit(two, "2!!").unwrap();
    let frame = next_text(&mut second, Duration::from_secs(2)).await.unwrap();
    assert_eq!(frame["text"], "2!!");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frame_keeps_session() {
    let bridge = Bridge::start().await;
    let mut client = bridge.connect().await;

    client
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    send(&mut client, json!({"title": "Doc1"})).await;
    assert!(until(|| bridge.provider.notifications().len() == 2).await);

    send(&mut client, json!({"title": "Doc1", "text": "finally"})).await;
    bridge.document("Doc1", "finally").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_browser_disconnect_releases_scratch() {
    let bridge = Bridge::start().await;
    let mut client = bridge.connect().await;

    send(&mut client, json!({"title": "Doc1", "text": "bye"})).await;
    let id = bridge.document("Doc1", "bye").await;

    client.close(None).await.unwrap();
    drop(client);

    assert!(until(|| bridge.provider.is_released(id)).await);
    assert_eq!(bridge.provider.watcher_count(), 0);
    // The user's document stays open
    assert!(bridge.provider.is_open(id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_endpoint() {
    let bridge = Bridge::start().await;

    for path in ["/", "/GhostText", "/anything/else?x=1"] {
        let url = format!("http://127.0.0.1:{}{}", bridge.status_port, path);
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .unwrap(),
            "application/json"
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({"ProtocolVersion": 1, "WebSocketPort": bridge.socket_port})
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_port_in_use() {
    let bridge = Bridge::start().await;

    let config = Config {
        status_port: bridge.status_port,
        ..test_config()
    };
    let err = BridgeServer::bind(&config, Arc::new(MemoryBufferProvider::new()))
        .await
        .err()
        .expect("second bridge must not bind the same status port");
    assert!(err.to_string().contains(&bridge.status_port.to_string()));
    assert!(matches!(err, BridgeError::Io(_)));
    assert_eq!(err.category(), ErrorCategory::FileSystem);
    assert!(err.user_message().contains("already using the port"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_listeners() {
    let server = BridgeServer::bind(&test_config(), Arc::new(MemoryBufferProvider::new()))
        .await
        .unwrap();
    let status_addr = server.status_addr();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async move {
        let _ = stop_rx.await;
    }));

    stop_tx.send(()).unwrap();
    let result = timeout(Duration::from_secs(5), running).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));

    assert!(TcpStream::connect(status_addr).await.is_err());
}
