//! Mock gateway and REST servers shared by integration tests

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use cordial::{
    ws::{event::EventKind, Event},
    Bot, Config,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_log() {
    let _ = pretty_env_logger::try_init();
}

/// Gateway server, every accepted websocket is handed to the test as a [Peer]
pub struct MockGateway {
    pub addr: SocketAddr,
    peers: mpsc::UnboundedReceiver<Peer>,
}

impl MockGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, peers) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        let _ = tx.send(Peer { ws });
                    }
                });
            }
        });

        Self { addr, peers }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// next client connection, panics if none arrives in time
    pub async fn accept(&mut self) -> Peer {
        tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("no gateway connection in time")
            .expect("gateway listener stopped")
    }

    /// next client connection within `wait`, if any
    pub async fn try_accept(&mut self, wait: Duration) -> Option<Peer> {
        tokio::time::timeout(wait, self.peers.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Server side of one gateway connection
pub struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    pub async fn send(&mut self, value: Value) {
        self.ws
            .send(WsMessage::Text(value.to_string()))
            .await
            .unwrap();
    }

    /// next text frame as json, `None` once the client closes
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no frame from client in time");

            match frame {
                Some(Ok(WsMessage::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Read until the client closes, answering its close frame.
    /// Returns the close code and the text frames received meanwhile.
    pub async fn recv_close(&mut self) -> (Option<u16>, Vec<Value>) {
        let mut code = None;
        let mut frames = Vec::new();

        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("client did not close in time");

            match frame {
                Some(Ok(WsMessage::Text(text))) => frames.push(serde_json::from_str(&text).unwrap()),
                Some(Ok(WsMessage::Close(frame))) => {
                    code = frame.map(|f| u16::from(f.code));
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return (code, frames),
            }
        }
    }

    pub async fn hello(&mut self, interval_ms: u64) {
        self.send(json!({ "op": 10, "d": { "heartbeat_interval": interval_ms } }))
            .await;
    }

    /// Hello, then answer identify with Ready(seq 1) or resume with Resumed.
    /// Returns the identify or resume frame.
    pub async fn handshake(&mut self, interval_ms: u64, resume_url: &str) -> Value {
        self.hello(interval_ms).await;

        let frame = self.recv().await.expect("no identify or resume");
        if frame["op"] == 2 {
            self.send(json!({
                "op": 0,
                "s": 1,
                "t": "READY",
                "d": {
                    "v": 10,
                    "session_id": "abc",
                    "resume_gateway_url": resume_url,
                },
            }))
            .await;
        } else {
            let seq = frame["d"]["seq"].as_u64().unwrap_or_default();
            self.send(json!({ "op": 0, "s": seq + 1, "t": "RESUMED", "d": {} }))
                .await;
        }

        frame
    }
}

/// Scripted response of [MockHttp]
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Request seen by [MockHttp]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal HTTP/1.1 server answering with scripted responses in order,
/// the last one repeats forever
pub struct MockHttp {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttp {
    pub async fn start(responses: Vec<MockResponse>) -> Self {
        assert!(!responses.is_empty());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(VecDeque::from(responses)));

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let response = {
                    let mut responses = responses.lock().unwrap();
                    if responses.len() > 1 {
                        responses.pop_front().unwrap()
                    } else {
                        responses[0].clone()
                    }
                };
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    if let Some(request) = Self::serve(stream, response).await {
                        recorded.lock().unwrap().push(request);
                    }
                });
            }
        });

        Self { addr, requests }
    }

    /// discovery endpoint always pointing at `gateway`
    pub async fn discovery(gateway: &MockGateway) -> Self {
        Self::start(vec![MockResponse::json(200, json!({ "url": gateway.url() }))]).await
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn serve(stream: TcpStream, response: MockResponse) -> Option<RecordedRequest> {
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.ok()?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();

        let mut headers = Vec::new();
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.ok()?;
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                let value = value.trim().to_string();
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.parse().unwrap_or_default();
                }
                headers.push((name.to_string(), value));
            }
        }

        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).await.ok()?;

        let mut head = format!(
            "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
            response.status,
            response.body.len()
        );
        for (name, value) in &response.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");

        let mut stream = reader.into_inner();
        stream.write_all(head.as_bytes()).await.ok()?;
        stream.write_all(response.body.as_bytes()).await.ok()?;
        let _ = stream.shutdown().await;

        Some(RecordedRequest {
            method,
            path,
            headers,
            body,
        })
    }
}

/// config pointing at the mock REST server, without compression
pub fn config(http: &MockHttp) -> Config {
    Config::new("Bot test")
        .with_api_base(http.url())
        .with_compress(false)
        .with_hello_timeout(Duration::from_secs(2))
}

/// every event kind the bot dispatches, in arrival order
pub fn record_events(bot: &Bot) -> mpsc::UnboundedReceiver<EventKind> {
    let (tx, rx) = mpsc::unbounded_channel();

    bot.subscribers().subscribe(move |event: Arc<Event>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event.kind());
        }
    });

    rx
}

/// wait for an event of `kind`, dropping others
pub async fn wait_event(events: &mut mpsc::UnboundedReceiver<EventKind>, kind: EventKind) {
    tokio::time::timeout(WAIT, async {
        while let Some(received) = events.recv().await {
            if received == kind {
                return;
            }
        }
        panic!("event channel closed");
    })
    .await
    .expect("event not received in time")
}

/// events received so far
pub fn drain_events(events: &mut mpsc::UnboundedReceiver<EventKind>) -> Vec<EventKind> {
    let mut received = Vec::new();
    while let Ok(kind) = events.try_recv() {
        received.push(kind);
    }
    received
}
