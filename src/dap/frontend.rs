//! Front-end connection
//!
//! Owns the outgoing `seq` counter and turns requests, responses and events
//! into framed DAP messages.

use serde::Serialize;
use serde_json::Value;
use tracing::{Level, debug, warn};

use crate::dap::framing::ContentLengthFormat;
use crate::dap::protocol::{DapEvent, DapRequest, DapResponse};
use crate::io::framing::{Framed, FramingError};
use crate::io::transport::Transport;
use crate::log_dap_message;

/// Identifies the request a deferred response answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub seq: i64,
    pub command: String,
}

impl From<&DapRequest> for RequestTicket {
    fn from(request: &DapRequest) -> Self {
        Self {
            seq: request.seq,
            command: request.command.clone(),
        }
    }
}

pub struct FrontEnd<T: Transport> {
    connection: Framed<T, ContentLengthFormat>,
    next_seq: i64,
}

impl<T: Transport> FrontEnd<T> {
    pub fn new(transport: T) -> Self {
        Self {
            connection: Framed::new(transport),
            next_seq: 1,
        }
    }

    /// Next request from the front end; malformed messages are skipped
    ///
    /// Cancel-safe. Returns an error only once the connection is gone.
    pub async fn next_request(&mut self) -> Result<DapRequest, FramingError> {
        loop {
            let text = match self.connection.receive_message().await {
                Ok(text) => text,
                Err(e) if e.is_disconnect() => return Err(e),
                Err(e) => {
                    warn!("Skipping malformed front-end frame: {}", e);
                    continue;
                }
            };

            match serde_json::from_str::<DapRequest>(&text) {
                Ok(request) => {
                    log_dap_message!(Level::DEBUG, "incoming", request.command.as_str(), text);
                    return Ok(request);
                }
                Err(e) => warn!("Discarding unparseable front-end message: {}", e),
            }
        }
    }

    /// Answer `ticket`: `Ok(body)` succeeds, `Err(message)` fails
    pub async fn respond(&mut self, ticket: &RequestTicket, outcome: Result<Option<Value>, String>) {
        let (success, message, body) = match outcome {
            Ok(body) => (true, None, body),
            Err(message) => (false, Some(message), None),
        };
        let response = DapResponse {
            seq: self.take_seq(),
            r#type: "response",
            request_seq: ticket.seq,
            success,
            command: ticket.command.clone(),
            message,
            body,
        };
        self.write(ticket.command.as_str(), &response).await;
    }

    pub async fn emit(&mut self, event: &'static str, body: Option<Value>) {
        let event = DapEvent {
            seq: self.take_seq(),
            r#type: "event",
            event,
            body,
        };
        self.write(event.event, &event).await;
    }

    /// Emit `event` with a typed body
    pub async fn emit_body<B: Serialize>(&mut self, event: &'static str, body: &B) {
        match serde_json::to_value(body) {
            Ok(body) => self.emit(event, Some(body)).await,
            Err(e) => warn!("Failed to serialize {} event body: {}", event, e),
        }
    }

    pub async fn close(&mut self) {
        if !self.connection.is_connected() {
            return;
        }
        if let Err(e) = self.connection.close().await {
            warn!("Error while closing front-end connection: {}", e);
        }
    }

    fn take_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    async fn write<M: Serialize>(&mut self, label: &str, message: &M) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize {} message: {}", label, e);
                return;
            }
        };
        log_dap_message!(Level::DEBUG, "outgoing", label, text);
        if !self.connection.is_connected() {
            debug!("Front end is gone, dropping {}", label);
            return;
        }
        if let Err(e) = self.connection.send(&text).await {
            warn!("Failed to send {} to front end: {}", label, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::framing::FrameFormat;
    use crate::io::transport::{MockPeer, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    async fn next_message(peer: &mut MockPeer) -> Value {
        let mut frame = peer.next_sent().await.unwrap();
        let payload = ContentLengthFormat::decode(&mut frame).unwrap().unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_responses_and_events_share_seq() {
        let (transport, mut peer) = MockTransport::pair();
        let mut front_end = FrontEnd::new(transport);
        let ticket = RequestTicket {
            seq: 10,
            command: "threads".to_string(),
        };

        front_end
            .respond(&ticket, Ok(Some(json!({"threads": []}))))
            .await;
        front_end.emit("initialized", None).await;
        front_end.respond(&ticket, Err("nope".to_string())).await;

        let first = next_message(&mut peer).await;
        assert_eq!(first["seq"], 1);
        assert_eq!(first["type"], "response");
        assert_eq!(first["request_seq"], 10);
        assert_eq!(first["success"], true);
        assert_eq!(first["body"], json!({"threads": []}));

        let second = next_message(&mut peer).await;
        assert_eq!(second, json!({"seq": 2, "type": "event", "event": "initialized"}));

        let third = next_message(&mut peer).await;
        assert_eq!(third["seq"], 3);
        assert_eq!(third["success"], false);
        assert_eq!(third["message"], "nope");
        assert!(third.get("body").is_none());
    }

    #[tokio::test]
    async fn test_garbage_is_skipped() {
        let (transport, mut peer) = MockTransport::pair();
        let mut front_end = FrontEnd::new(transport);

        peer.push(ContentLengthFormat::encode("not json"));
        peer.push(ContentLengthFormat::encode(
            r#"{"seq":1,"type":"request","command":"initialize","arguments":{}}"#,
        ));

        let request = front_end.next_request().await.unwrap();
        assert_eq!(request.command, "initialize");

        peer.hang_up();
        assert!(front_end.next_request().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_is_written_after_hang_up() {
        let (transport, mut peer) = MockTransport::pair();
        let mut front_end = FrontEnd::new(transport);

        peer.hang_up();
        assert!(front_end.next_request().await.is_err());

        front_end.emit("terminated", None).await;
        front_end.close().await;
        let sent = tokio::time::timeout(Duration::from_secs(1), peer.next_sent()).await;
        assert!(sent.is_err());
    }
}
