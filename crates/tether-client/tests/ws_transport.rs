#![cfg(feature = "websocket")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tether_client::{ConnectionPhase, ReconnectPolicy, SessionError, SessionManager, SessionSnapshot};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

const DEADLINE: Duration = Duration::from_secs(5);

type ServerStream = WebSocketStream<TcpStream>;

/// Accept one upgrade and return the stream with the request's `Authorization` header
async fn accept(listener: &TcpListener) -> (ServerStream, Option<String>) {
    let (stream, _) = listener.accept().await.unwrap();
    let authorization = Arc::new(Mutex::new(None));
    let captured = authorization.clone();

    let ws = tokio_tungstenite::accept_hdr_async(stream, move |request: &Request, response: Response| {
        *captured.lock().unwrap() = request
            .headers()
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Ok(response)
    })
    .await
    .unwrap();

    let authorization = authorization.lock().unwrap().take();
    (ws, authorization)
}

async fn next_frame(ws: &mut ServerStream) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn wait_for<F>(session: &SessionManager, condition: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    tokio::time::timeout(DEADLINE, session.wait_for(condition))
        .await
        .unwrap()
}

fn manager(port: u16, policy: ReconnectPolicy) -> SessionManager {
    SessionManager::builder(format!("http://127.0.0.1:{port}"))
        .credential("secret")
        .policy(policy)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_session_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let session = manager(
        port,
        ReconnectPolicy::new().reconnect_interval(Duration::from_millis(100)),
    );

    session.connect().unwrap();
    let (mut ws, authorization) = accept(&listener).await;
    assert_eq!(authorization.as_deref(), Some("Bearer secret"));
    assert_eq!(next_frame(&mut ws).await, json!(["auth", {"token": "secret"}]));

    wait_for(&session, |s| s.phase == ConnectionPhase::Connected).await;

    ws.send(Message::Text(json!(["greeting", {"msg": "hi"}]).to_string()))
        .await
        .unwrap();
    let snapshot = wait_for(&session, |s| s.last_message.is_some()).await;
    let message = snapshot.last_message.unwrap();
    assert_eq!(message.event, "greeting");
    assert_eq!(message.payload, vec![json!({"msg": "hi"})]);

    session.send("ping", json!({"n": 1})).unwrap();
    assert_eq!(next_frame(&mut ws).await, json!(["ping", {"n": 1}]));

    // a server-side close is unexpected and earns a retry
    ws.close(None).await.unwrap();
    let snapshot = wait_for(&session, |s| s.attempt_count == 1).await;
    assert!(snapshot.retry_pending || snapshot.phase == ConnectionPhase::Connecting);

    let (mut ws, _) = accept(&listener).await;
    assert_eq!(next_frame(&mut ws).await, json!(["auth", {"token": "secret"}]));
    let snapshot = wait_for(&session, |s| s.phase == ConnectionPhase::Connected).await;
    assert_eq!(snapshot.attempt_count, 0);

    session.disconnect();
    assert_eq!(
        session.send("ping", json!({})),
        Err(SessionError::NotConnected)
    );
}

#[tokio::test]
async fn test_auth_error_frame_stops_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let session = manager(
        port,
        ReconnectPolicy::new().reconnect_interval(Duration::from_millis(100)),
    );

    session.connect().unwrap();
    let (mut ws, _) = accept(&listener).await;
    next_frame(&mut ws).await;
    wait_for(&session, |s| s.phase == ConnectionPhase::Connected).await;

    ws.send(Message::Text(json!(["auth_error", "bad token"]).to_string()))
        .await
        .unwrap();
    ws.close(None).await.unwrap();

    let snapshot = wait_for(&session, |s| s.phase == ConnectionPhase::Error).await;
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("Authentication failed: bad token")
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = session.snapshot();
    assert!(!snapshot.retry_pending);
    assert_eq!(snapshot.attempt_count, 0);
}

#[tokio::test]
async fn test_refused_connection_schedules_retry() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let session = manager(
        port,
        ReconnectPolicy::new()
            .reconnect_interval(Duration::from_secs(60))
            .max_reconnect_attempts(3),
    );

    session.connect().unwrap();
    let snapshot = wait_for(&session, |s| s.phase == ConnectionPhase::Error).await;
    assert_eq!(snapshot.attempt_count, 1);
    assert!(snapshot.retry_pending);
    assert!(snapshot.last_error.is_some());

    session.disconnect();
    assert!(!session.snapshot().retry_pending);
}
