use super::mock::{status_frame, MockServer};
use super::*;
use crate::config::FormcoachConfig;
use crate::error::{ConnectionError, FormcoachError, ProtocolError};
use crate::frame::{FrameData, FrameEncoder, FrameFormat};
use serde_json::json;
use std::time::{Duration, SystemTime};
use tokio::time::timeout;

fn server_config(endpoint: &str) -> crate::config::ServerConfig {
    let mut config = FormcoachConfig::default().server;
    config.endpoint = endpoint.to_string();
    config.connect_timeout_secs = 2;
    config.handshake_timeout_secs = 2;
    config
}

fn init_for(exercise: &str) -> InitMessage {
    InitMessage {
        exercise: exercise.to_string(),
        is_video_mode: false,
        target_reps: Some(3),
        target_time: None,
    }
}

fn test_frame() -> crate::frame::EncodedFrame {
    let frame = FrameData::new(1, SystemTime::now(), vec![90; 8 * 8 * 3], 8, 8, FrameFormat::Rgb24);
    FrameEncoder::new(8, 8, 50).encode(&frame).unwrap()
}

#[test]
fn test_init_message_uses_null_for_missing_target() {
    let init = InitMessage {
        exercise: "plank".to_string(),
        is_video_mode: true,
        target_reps: None,
        target_time: Some(30),
    };

    let value = serde_json::to_value(&init).unwrap();
    assert_eq!(
        value,
        json!({"exercise": "plank", "is_video_mode": true, "target_reps": null, "target_time": 30})
    );
    assert!(value.get("type").is_none());
}

#[test]
fn test_client_message_shapes() {
    let frame = serde_json::to_value(ClientMessage::Frame {
        frame: "data:image/jpeg;base64,AA==".to_string(),
    })
    .unwrap();
    assert_eq!(frame, json!({"type": "frame", "frame": "data:image/jpeg;base64,AA=="}));

    let stop = serde_json::to_value(ClientMessage::Stop).unwrap();
    assert_eq!(stop, json!({"type": "stop"}));
}

#[test]
fn test_parse_server_messages() {
    let warmup = ServerMessage::parse(r#"{"type":"warmup_end"}"#).unwrap();
    assert_eq!(warmup, Some(ServerMessage::WarmupEnd));

    let error = ServerMessage::parse(r#"{"type":"error","message":"camera blocked"}"#).unwrap();
    assert_eq!(
        error,
        Some(ServerMessage::Error {
            message: "camera blocked".to_string()
        })
    );

    let stopped =
        ServerMessage::parse(r#"{"type":"stopped","result":{"rep_count":3,"total_score":0.8,"final_rank":"A"}}"#)
            .unwrap();
    match stopped {
        Some(ServerMessage::Stopped { result: Some(result) }) => {
            assert_eq!(result.rep_count, Some(3));
            assert_eq!(result.total_score, Some(0.8));
            assert_eq!(result.final_rank, Some(json!("A")));
        }
        other => panic!("unexpected parse: {:?}", other),
    }
}

#[test]
fn test_parse_unknown_and_malformed() {
    assert_eq!(ServerMessage::parse(r#"{"type":"heartbeat"}"#).unwrap(), None);
    assert!(matches!(
        ServerMessage::parse("not json"),
        Err(ProtocolError::Malformed { .. })
    ));
    assert!(matches!(
        ServerMessage::parse(r#"{"message":"no type"}"#),
        Err(ProtocolError::Malformed { .. })
    ));
    assert!(matches!(
        ServerMessage::parse(r#"{"type":"frame","status":"three"}"#),
        Err(ProtocolError::Malformed { .. })
    ));
}

#[test]
fn test_rep_count_read_leniently() {
    let count_of = |text: &str| match ServerMessage::parse(text).unwrap() {
        Some(ServerMessage::Frame { status: Some(status), .. }) => status.rep_count,
        other => panic!("expected frame, got {:?}", other),
    };

    assert_eq!(count_of(r#"{"type":"frame","status":{"rep_count":3.0}}"#), Some(3));
    assert_eq!(count_of(r#"{"type":"frame","status":{"rep_count":-1}}"#), None);
    assert_eq!(count_of(r#"{"type":"frame","status":{"rep_count":"three"}}"#), None);
    assert_eq!(count_of(r#"{"type":"frame","status":{"rep_count":null}}"#), None);

    let stopped = ServerMessage::parse(r#"{"type":"stopped","result":{"rep_count":2.0}}"#).unwrap();
    match stopped {
        Some(ServerMessage::Stopped { result: Some(result) }) => assert_eq!(result.rep_count, Some(2)),
        other => panic!("expected stopped, got {:?}", other),
    }

    let status: FrameStatus = serde_json::from_value(json!({"counters": {"reps": 5.0}})).unwrap();
    assert_eq!(status.counter_reps(), Some(5));
}

#[test]
fn test_status_score_and_counter_views() {
    let status: FrameStatus = serde_json::from_value(json!({
        "rep_scores": {"1": 0.9, "2": 0.7, "x": 0.1, "3": null},
        "counters": {"reps": 4}
    }))
    .unwrap();

    let scores = status.scores();
    assert_eq!(scores.len(), 2);
    assert_eq!(scores.get(&2), Some(&0.7));
    assert_eq!(status.counter_reps(), Some(4));
}

#[tokio::test]
async fn test_handshake_sends_init_and_waits_for_success() {
    let server = MockServer::spawn(|mut peer| async move {
        let init = peer.recv().await.unwrap();
        assert_eq!(init["exercise"], "squat");
        assert_eq!(init["is_video_mode"], false);
        assert_eq!(init["target_reps"], 3);
        assert!(init["target_time"].is_null());
        peer.send(json!({"type": "init_success", "message": "ready"})).await;
        peer.wait_closed().await;
    })
    .await;

    let (mut transport, _events, greeting) =
        SessionTransport::connect(&server_config(&server.endpoint), &init_for("squat"))
            .await
            .unwrap();
    assert_eq!(greeting, "ready");
    assert!(transport.is_open());

    transport.close();
    transport.join(Duration::from_secs(2)).await;
    server.finish().await;
}

#[tokio::test]
async fn test_unexpected_first_message_is_protocol_error() {
    let server = MockServer::spawn(|mut peer| async move {
        let _ = peer.recv().await;
        peer.send(json!({"type": "warmup_end"})).await;
        peer.wait_closed().await;
    })
    .await;

    let result = SessionTransport::connect(&server_config(&server.endpoint), &init_for("squat")).await;
    assert!(matches!(
        result,
        Err(FormcoachError::Protocol(ProtocolError::UnexpectedFirstMessage { .. }))
    ));
    server.finish().await;
}

#[tokio::test]
async fn test_connect_refused_is_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let result = SessionTransport::connect(&server_config(&endpoint), &init_for("squat")).await;
    assert!(matches!(result, Err(FormcoachError::Connection(_))));
}

#[tokio::test]
async fn test_secure_endpoint_attempts_tls_handshake() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("wss://{}/ws", listener.local_addr().unwrap());
    let accept = tokio::spawn(async move {
        // Hang up without answering the client hello
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let result = SessionTransport::connect(&server_config(&endpoint), &init_for("squat")).await;
    match result {
        Err(FormcoachError::Connection(ConnectionError::Connect { details, .. })) => {
            assert!(!details.contains("not compiled in"), "{}", details);
        }
        other => panic!("expected connect error, got {:?}", other.map(|_| ())),
    }
    accept.await.unwrap();
}

#[tokio::test]
async fn test_one_frame_in_flight_and_drops_the_rest() {
    let server = MockServer::spawn(|mut peer| async move {
        let _ = peer.recv().await;
        peer.send(json!({"type": "init_success", "message": "ok"})).await;

        let first = peer.recv().await.unwrap();
        assert_eq!(first["type"], "frame");
        assert!(first["frame"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
        peer.send(status_frame(0, "")).await;

        let second = peer.recv().await.unwrap();
        assert_eq!(second["type"], "frame");
        peer.wait_closed().await;
    })
    .await;

    let (mut transport, mut events, _) =
        SessionTransport::connect(&server_config(&server.endpoint), &init_for("squat"))
            .await
            .unwrap();

    let frame = test_frame();
    assert!(transport.send_frame(&frame));
    assert!(!transport.can_send_frame());
    assert!(!transport.send_frame(&frame));
    assert!(!transport.send_frame(&frame));

    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, TransportEvent::Message(ServerMessage::Frame { .. })));
    assert!(transport.can_send_frame());
    assert!(transport.send_frame(&frame));

    let stats = transport.stats();
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.frames_dropped, 2);
    assert_eq!(stats.frames_received, 1);

    transport.close();
    transport.join(Duration::from_secs(2)).await;
    server.finish().await;
}

#[tokio::test]
async fn test_request_stop_keeps_connection_open() {
    let server = MockServer::spawn(|mut peer| async move {
        let _ = peer.recv().await;
        peer.send(json!({"type": "init_success", "message": "ok"})).await;

        let stop = peer.recv_control().await.unwrap();
        assert_eq!(stop, json!({"type": "stop"}));
        peer.send(json!({"type": "stopped", "result": {"rep_count": 2}})).await;
        peer.wait_closed().await;
    })
    .await;

    let (mut transport, mut events, _) =
        SessionTransport::connect(&server_config(&server.endpoint), &init_for("squat"))
            .await
            .unwrap();

    assert!(transport.request_stop());
    assert!(!transport.request_stop());
    assert!(transport.stop_sent());
    assert!(transport.is_open());
    assert!(!transport.send_frame(&test_frame()));

    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    match event {
        TransportEvent::Message(ServerMessage::Stopped { result }) => {
            assert_eq!(result.unwrap().rep_count, Some(2));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    transport.close();
    transport.close();
    assert!(!transport.is_open());
    assert!(!transport.request_stop());
    transport.join(Duration::from_secs(2)).await;
    server.finish().await;
}

#[tokio::test]
async fn test_peer_hangup_is_reported() {
    let server = MockServer::spawn(|mut peer| async move {
        let _ = peer.recv().await;
        peer.send(json!({"type": "init_success", "message": "ok"})).await;
        peer.close().await;
    })
    .await;

    let (mut transport, mut events, _) =
        SessionTransport::connect(&server_config(&server.endpoint), &init_for("squat"))
            .await
            .unwrap();

    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert!(matches!(
        event,
        TransportEvent::Closed { .. } | TransportEvent::Failed(_)
    ));

    transport.close();
    transport.join(Duration::from_secs(2)).await;
    server.finish().await;
}
