use super::messages::{ClientMessage, InitMessage, ServerMessage};
use super::stats::{TransportStats, TransportStatsSnapshot};
use crate::config::ServerConfig;
use crate::error::{ConnectionError, FormcoachError, ProtocolError, Result};
use crate::frame::EncodedFrame;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the reader task hands to the session actor, in arrival order
#[derive(Debug)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// The peer closed the socket or the stream ended
    Closed { reason: Option<String> },
    /// The socket failed or the peer broke protocol
    Failed(FormcoachError),
}

/// Owns the one persistent connection of a session.
///
/// Outbound messages go through a writer task so `send_frame` never blocks the
/// caller. At most one frame is in flight: the slot is taken on send and freed by
/// the next inbound `frame` message; sends while it is taken are dropped.
pub struct SessionTransport {
    endpoint: String,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    frame_in_flight: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    stop_sent: bool,
    cancellation_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<TransportStats>,
}

impl SessionTransport {
    /// Connect, send the init message and wait for `init_success`.
    ///
    /// Returns the transport, the inbound event stream and the server's greeting.
    pub async fn connect(
        config: &ServerConfig,
        init: &InitMessage,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>, String)> {
        let endpoint = config.endpoint.clone();
        info!("Connecting to analysis service at {}", endpoint);

        let (mut ws, _) = timeout(config.connect_timeout(), connect_async(endpoint.as_str()))
            .await
            .map_err(|_| ConnectionError::Timeout {
                endpoint: endpoint.clone(),
                seconds: config.connect_timeout_secs,
            })?
            .map_err(|e| ConnectionError::Connect {
                endpoint: endpoint.clone(),
                details: e.to_string(),
            })?;

        let init_json = serde_json::to_string(init)?;
        debug!("Sending init: {}", init_json);
        ws.send(Message::Text(init_json))
            .await
            .map_err(|e| ConnectionError::Send {
                details: e.to_string(),
            })?;

        let greeting = match timeout(config.handshake_timeout(), Self::await_init_success(&mut ws)).await
        {
            Ok(Ok(greeting)) => greeting,
            Ok(Err(e)) => {
                let _ = ws.close(None).await;
                return Err(e);
            }
            Err(_) => {
                let _ = ws.close(None).await;
                return Err(ConnectionError::Timeout {
                    endpoint,
                    seconds: config.handshake_timeout_secs,
                }
                .into());
            }
        };

        info!("Session initialised by service: {}", greeting);

        let (sink, stream) = ws.split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let frame_in_flight = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicBool::new(true));
        let cancellation_token = CancellationToken::new();
        let stats = Arc::new(TransportStats::new());

        let writer = tokio::spawn(run_writer(
            sink,
            outbound_rx,
            event_tx.clone(),
            cancellation_token.clone(),
            Arc::clone(&open),
        ));
        let reader = tokio::spawn(run_reader(
            stream,
            event_tx,
            Arc::clone(&frame_in_flight),
            cancellation_token.clone(),
            Arc::clone(&stats),
        ));

        Ok((
            Self {
                endpoint,
                outbound: Some(outbound_tx),
                frame_in_flight,
                open,
                stop_sent: false,
                cancellation_token,
                tasks: vec![writer, reader],
                stats,
            },
            event_rx,
            greeting,
        ))
    }

    async fn await_init_success(ws: &mut WsStream) -> Result<String> {
        loop {
            let message = match ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    return Err(ConnectionError::Dropped {
                        details: e.to_string(),
                    }
                    .into())
                }
                None => {
                    return Err(ConnectionError::Dropped {
                        details: "closed before init_success".to_string(),
                    }
                    .into())
                }
            };

            match message {
                Message::Text(text) => {
                    return match ServerMessage::parse(&text)? {
                        Some(ServerMessage::InitSuccess { message }) => Ok(message),
                        Some(ServerMessage::Error { message }) => {
                            Err(ProtocolError::UnexpectedFirstMessage {
                                kind: format!("error ({})", message),
                            }
                            .into())
                        }
                        Some(other) => Err(ProtocolError::UnexpectedFirstMessage {
                            kind: other.kind().to_string(),
                        }
                        .into()),
                        None => Err(ProtocolError::UnexpectedFirstMessage {
                            kind: "unknown message type".to_string(),
                        }
                        .into()),
                    };
                }
                Message::Binary(_) => return Err(ProtocolError::BinaryMessage.into()),
                Message::Close(frame) => {
                    return Err(ConnectionError::Dropped {
                        details: frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed before init_success".to_string()),
                    }
                    .into())
                }
                // Control frames are answered by tungstenite itself
                _ => continue,
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn frame_in_flight(&self) -> bool {
        self.frame_in_flight.load(Ordering::SeqCst)
    }

    /// Whether a frame sent now would be accepted rather than dropped
    pub fn can_send_frame(&self) -> bool {
        self.is_open() && !self.stop_sent && !self.frame_in_flight()
    }

    /// Queue one frame. Returns `false` when it was dropped.
    pub fn send_frame(&self, frame: &EncodedFrame) -> bool {
        if !self.is_open() || self.stop_sent {
            self.stats.record_dropped();
            return false;
        }

        if self
            .frame_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("Frame {} dropped: previous frame not yet answered", frame.id);
            self.stats.record_dropped();
            return false;
        }

        let message = ClientMessage::Frame {
            frame: frame.to_data_url(),
        };

        if self.enqueue(&message) {
            self.stats.record_sent(frame.len());
            trace!("Frame {} queued ({} bytes)", frame.id, frame.len());
            true
        } else {
            self.frame_in_flight.store(false, Ordering::SeqCst);
            self.stats.record_dropped();
            false
        }
    }

    /// Ask the service to stop. Does not close the socket.
    pub fn request_stop(&mut self) -> bool {
        if self.stop_sent {
            debug!("Stop already requested");
            return false;
        }
        if !self.is_open() {
            debug!("Stop not sent: connection is not open");
            return false;
        }

        self.stop_sent = self.enqueue(&ClientMessage::Stop);
        if self.stop_sent {
            info!("Stop requested from analysis service");
        }
        self.stop_sent
    }

    pub fn stop_sent(&self) -> bool {
        self.stop_sent
    }

    /// Close the connection. Safe to call any number of times.
    pub fn close(&mut self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        // Dropping the sender lets the writer flush and send a close frame
        self.outbound = None;
        self.cancellation_token.cancel();

        if was_open {
            info!("Closed connection to {}", self.endpoint);
        }
    }

    /// Wait for the reader and writer tasks to exit after `close`
    pub async fn join(&mut self, limit: Duration) {
        for task in self.tasks.drain(..) {
            match timeout(limit, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Transport task failed: {}", e),
                Err(_) => warn!("Transport task did not finish within {:?}", limit),
            }
        }
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }

    fn enqueue(&self, message: &ClientMessage) -> bool {
        let Some(outbound) = self.outbound.as_ref() else {
            return false;
        };

        match serde_json::to_string(message) {
            Ok(text) => outbound.send(Message::Text(text)).is_ok(),
            Err(e) => {
                error!("Failed to serialize outbound message: {}", e);
                false
            }
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_writer(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancellation_token: CancellationToken,
    open: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = sink.send(message).await {
                    if open.load(Ordering::SeqCst) {
                        error!("WebSocket send failed: {}", e);
                        let _ = events.send(TransportEvent::Failed(
                            ConnectionError::Send { details: e.to_string() }.into(),
                        ));
                    }
                    break;
                }
            }
            _ = cancellation_token.cancelled() => break,
        }
    }

    if let Err(e) = sink.close().await {
        debug!("WebSocket close handshake: {}", e);
    }
    debug!("Transport writer stopped");
}

async fn run_reader(
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    frame_in_flight: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
    stats: Arc<TransportStats>,
) {
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = cancellation_token.cancelled() => break,
        };

        let event = match next {
            Some(Ok(Message::Text(text))) => match ServerMessage::parse(&text) {
                Ok(Some(message)) => {
                    if matches!(message, ServerMessage::Frame { .. }) {
                        stats.record_received();
                        frame_in_flight.store(false, Ordering::SeqCst);
                    }
                    TransportEvent::Message(message)
                }
                Ok(None) => {
                    warn!("Ignoring message with unknown type: {:.120}", text);
                    continue;
                }
                Err(e) => TransportEvent::Failed(e.into()),
            },
            Some(Ok(Message::Binary(_))) => TransportEvent::Failed(ProtocolError::BinaryMessage.into()),
            Some(Ok(Message::Close(frame))) => TransportEvent::Closed {
                reason: frame.map(|f| f.reason.to_string()),
            },
            Some(Ok(_)) => continue,
            Some(Err(e)) => TransportEvent::Failed(
                ConnectionError::Dropped {
                    details: e.to_string(),
                }
                .into(),
            ),
            None => TransportEvent::Closed { reason: None },
        };

        let terminal = !matches!(event, TransportEvent::Message(_));
        if events.send(event).is_err() || terminal {
            break;
        }
    }

    debug!("Transport reader stopped");
}
