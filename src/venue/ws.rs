//! WebSocket transport.
//!
//! Each connection runs in its own task: it dials, reports `Opened`, then
//! pumps frames both ways until either side closes, and always finishes by
//! reporting `Closed` with a reason. The engine never awaits the socket.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::protocol::Request;
use super::{ConnId, Connection, Connector, Inbound};
use crate::error::EngineError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

enum Outbound {
    Text(String),
    Close,
}

/// Dials the venue with tokio-tungstenite.
pub struct WsConnector {
    url: String,
    events: mpsc::UnboundedSender<Inbound>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, events: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            url: url.into(),
            events,
        }
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, conn: ConnId) -> Result<Box<dyn Connection>, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(self.url.clone(), conn, rx, self.events.clone()));
        Ok(Box::new(WsConnection { conn, tx }))
    }
}

struct WsConnection {
    conn: ConnId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Connection for WsConnection {
    fn send(&mut self, req_id: u64, request: &Request) -> Result<(), EngineError> {
        self.tx
            .send(Outbound::Text(request.to_text(req_id)))
            .map_err(|_| EngineError::Transport(format!("connection {} writer is gone", self.conn)))
    }

    fn close(&mut self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

async fn run_socket(
    url: String,
    conn: ConnId,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<Inbound>,
) {
    let reason = pump(&url, conn, &mut outbound, &events).await;
    debug!(conn, %reason, "Socket task finished");
    let _ = events.send(Inbound::Closed { conn, reason });
}

/// Runs one socket to completion and returns why it ended.
async fn pump(
    url: &str,
    conn: ConnId,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<Inbound>,
) -> String {
    let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url)).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => return format!("connect failed: {e}"),
        Err(_) => return "connect timed out".to_string(),
    };
    info!(conn, "WebSocket connected");
    if events.send(Inbound::Opened { conn }).is_err() {
        return "engine gone".to_string();
    }

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return format!("write failed: {e}");
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return "closed by client".to_string();
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if events.send(Inbound::Message { conn, text }).is_err() {
                        return "engine gone".to_string();
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    return frame
                        .map(|f| format!("closed by venue: {}", f.reason))
                        .unwrap_or_else(|| "closed by venue".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn, error = %e, "WebSocket error");
                    return format!("read failed: {e}");
                }
                None => return "stream ended".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_venue_reports_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new("ws://127.0.0.1:1", tx);
        let _connection = connector.connect(7).unwrap();
        match rx.recv().await {
            Some(Inbound::Closed { conn, reason }) => {
                assert_eq!(conn, 7);
                assert!(reason.starts_with("connect"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
