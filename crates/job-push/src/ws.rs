//! WebSocket push channel.
//!
//! The server sends text frames shaped `{"topic": "/topic/job/<id>", "payload": {..}}`.
//! Payloads are decoded as `JobStatus` and routed to subscribers of the topic.
//! Unclean disconnects are retried with exponential backoff; a clean close from
//! the server ends the client. Once the client has stopped for good every topic
//! subscription is ended.

use crate::TopicRouter;
use futures_util::{SinkExt, StreamExt};
use job_types::{JobStatus, PushChannel};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket protocol error: {0}")]
    Protocol(String),
    #[error("websocket connection dropped")]
    Dropped,
}

/// Connection settings for [`WsPushChannel`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Appended as `?token=` when present.
    pub token: Option<String>,
    pub max_reconnect_attempts: u32,
    /// Base delay; attempt `n` waits `2^n * reconnect_interval`.
    pub reconnect_interval: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            max_reconnect_attempts: 5,
            reconnect_interval: Duration::from_millis(3000),
        }
    }

    /// `JOB_WS_URL` (required) and `JOB_WS_TOKEN`. Returns `None` when push is not configured.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("JOB_WS_URL").ok().filter(|u| !u.is_empty())?;
        let mut config = Self::new(url);
        config.token = std::env::var("JOB_WS_TOKEN").ok().filter(|t| !t.is_empty());
        Some(config)
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_interval * 2u32.saturating_pow(attempt)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    topic: String,
    payload: serde_json::Value,
}

enum StreamEnd {
    Shutdown,
    ClosedByServer,
}

/// Push channel over a single WebSocket connection managed by a background task.
pub struct WsPushChannel {
    router: Arc<TopicRouter>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl WsPushChannel {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    pub fn spawn(config: WsConfig) -> Self {
        let router = Arc::new(TopicRouter::new());
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        tokio::spawn(run(
            config,
            Arc::clone(&router),
            Arc::clone(&connected),
            shutdown.clone(),
        ));
        Self {
            router,
            connected,
            shutdown,
        }
    }

    /// Close the connection with a normal close frame and stop reconnecting.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for WsPushChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl PushChannel for WsPushChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<JobStatus> {
        self.router.subscribe(topic)
    }
}

/// Append the auth token as a query parameter.
pub fn with_token(url: &str, token: Option<&str>) -> String {
    match token {
        Some(t) if url.contains('?') => format!("{}&token={}", url, t),
        Some(t) => format!("{}?token={}", url, t),
        None => url.to_string(),
    }
}

async fn run(
    config: WsConfig,
    router: Arc<TopicRouter>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let url = with_token(&config.url, config.token.as_deref());
    let mut attempts: u32 = 0;
    loop {
        let result = connect_and_stream(&url, &router, &connected, &shutdown, &mut attempts).await;
        connected.store(false, Ordering::SeqCst);
        match result {
            Ok(StreamEnd::Shutdown) => {
                info!("push channel closed by client");
                break;
            }
            Ok(StreamEnd::ClosedByServer) => {
                info!("push channel closed cleanly by server");
                break;
            }
            Err(e) => warn!("push channel connection failed: {e}"),
        }
        if attempts >= config.max_reconnect_attempts {
            error!(
                attempts,
                "maximum push channel reconnect attempts reached; push updates disabled"
            );
            break;
        }
        let delay = config.reconnect_delay(attempts);
        info!(
            attempt = attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "reconnecting push channel"
        );
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        attempts += 1;
    }
    router.close();
}

async fn connect_and_stream(
    url: &str,
    router: &TopicRouter,
    connected: &AtomicBool,
    shutdown: &CancellationToken,
    attempts: &mut u32,
) -> Result<StreamEnd, PushError> {
    let (ws_stream, _) = tokio::select! {
        _ = shutdown.cancelled() => return Ok(StreamEnd::Shutdown),
        res = connect_async(url) => res.map_err(|e| PushError::Connect(e.to_string()))?,
    };
    info!("push channel connected");
    connected.store(true, Ordering::SeqCst);
    *attempts = 0;

    let (mut sink, mut stream) = ws_stream.split();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "Client initiated disconnect".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return Ok(StreamEnd::Shutdown);
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_frame(router, text.as_str()),
                Some(Ok(Message::Close(_))) => return Ok(StreamEnd::ClosedByServer),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(PushError::Protocol(e.to_string())),
                None => return Err(PushError::Dropped),
            }
        }
    }
}

fn handle_frame(router: &TopicRouter, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            warn!("failed to parse push message: {e}");
            return;
        }
    };
    match serde_json::from_value::<JobStatus>(envelope.payload) {
        Ok(status) => {
            let delivered = router.dispatch(&envelope.topic, &status);
            debug!(topic = %envelope.topic, delivered, "push status routed");
        }
        Err(e) => debug!(topic = %envelope.topic, "ignoring non-status payload: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_types::JobState;

    #[test]
    fn token_is_appended_as_query() {
        assert_eq!(with_token("ws://h/ws", None), "ws://h/ws");
        assert_eq!(with_token("ws://h/ws", Some("abc")), "ws://h/ws?token=abc");
        assert_eq!(with_token("ws://h/ws?x=1", Some("abc")), "ws://h/ws?x=1&token=abc");
    }

    #[test]
    fn reconnect_delay_doubles() {
        let c = WsConfig::new("ws://h");
        assert_eq!(c.reconnect_delay(0), Duration::from_millis(3000));
        assert_eq!(c.reconnect_delay(1), Duration::from_millis(6000));
        assert_eq!(c.reconnect_delay(4), Duration::from_millis(48000));
    }

    #[tokio::test]
    async fn frames_are_routed_by_topic() {
        let router = TopicRouter::new();
        let mut rx = router.subscribe("/topic/job/j1");
        handle_frame(&router, "not json");
        handle_frame(&router, r#"{"topic":"/topic/job/j1","payload":{"chat":"hi"}}"#);
        handle_frame(
            &router,
            r#"{"topic":"/topic/job/j1","payload":{"jobId":"j1","state":"FAILED","updatedAt":"t"}}"#,
        );
        let s = rx.recv().await.unwrap();
        assert_eq!(s.state, JobState::Failed);
        assert!(rx.try_recv().is_err());
    }
}
