//! In-process WebSocket peer standing in for the analysis service in tests.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

pub(crate) struct MockServer {
    pub endpoint: String,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Accept one connection and run `script` against it
    pub async fn spawn<F, Fut>(script: F) -> Self
    where
        F: FnOnce(MockPeer) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // A client that gives up mid-handshake leaves nothing to script
            let Ok(ws) = accept_async(stream).await else {
                return;
            };
            script(MockPeer { ws }).await;
        });

        Self {
            endpoint: format!("ws://{}/ws", addr),
            handle,
        }
    }

    /// Wait for the script to finish, surfacing its assertion failures
    pub async fn finish(self) {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("mock server script timed out")
            .expect("mock server script panicked");
    }
}

pub(crate) struct MockPeer {
    ws: WebSocketStream<TcpStream>,
}

impl MockPeer {
    /// Next JSON text message, or `None` once the client closes
    pub async fn recv(&mut self) -> Option<Value> {
        while let Some(message) = self.ws.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    }

    /// Next message whose `type` is not `frame`
    pub async fn recv_control(&mut self) -> Option<Value> {
        loop {
            let message = self.recv().await?;
            if message["type"] != "frame" {
                return Some(message);
            }
        }
    }

    pub async fn send(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    pub async fn send_raw(&mut self, message: Message) {
        self.ws.send(message).await.unwrap();
    }

    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Drain until the client hangs up
    pub async fn wait_closed(&mut self) {
        while self.recv().await.is_some() {}
    }
}

pub(crate) fn status_frame(completed: u32, feedback: &str) -> Value {
    let scores: serde_json::Map<String, Value> = (1..=completed)
        .map(|rep| (rep.to_string(), Value::from(0.5 + rep as f64 / 100.0)))
        .collect();

    serde_json::json!({
        "type": "frame",
        "frame": "data:image/jpeg;base64,AAEC",
        "status": {
            "is_running": true,
            "is_warmup": false,
            "rep_count": completed,
            "rep_scores": scores,
            "total_score": 0.5,
            "feedback_ko": feedback,
            "state": "down"
        }
    })
}
