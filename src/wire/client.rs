//! Debuggee client
//!
//! Owns the TCP connection to the ikp3db debuggee. Commands are written
//! immediately (or queued until the connection opens); replies are matched
//! to their continuation by `_id`, in whatever order they arrive. Everything
//! the connection produces is surfaced through [`DebuggeeClient::next_event`]
//! so a single select loop can drive it.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};

use crate::io::framing::Framed;
use crate::io::transport::{BoxedTransport, StreamTransport, Transport, TransportError};
use crate::log_wire_message;
use crate::wire::error::WireError;
use crate::wire::framing::WireFormat;
use crate::wire::message::{Command, DebuggeeMessage, WireRequest};
use crate::wire::pending::PendingRequests;

// ============================================================================
// Connection settings
// ============================================================================

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 15470;

/// Retries after a refused connection
const DEFAULT_MAX_RETRIES: u32 = 10;

/// Pause between connection attempts
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How persistently to retry a refused connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Address of a listening debuggee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Run `attempt` until it succeeds, retrying only refused connections
///
/// Gives up after `policy.max_retries` retries, on any other error, or as
/// soon as `cancel` fires.
pub async fn connect_with_retry<T, F, Fut>(
    endpoint: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, WireError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut retries = 0;
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(WireError::Cancelled),
            outcome = attempt() => outcome,
        };

        match outcome {
            Ok(connection) => {
                info!("Connected to debuggee at {}", endpoint);
                return Ok(connection);
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused && retries < policy.max_retries => {
                retries += 1;
                warn!(
                    "Failed to connect to debuggee at {}: {} (retry {}/{})",
                    endpoint, e, retries, policy.max_retries
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WireError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
                debug!("Retrying connection to {}", endpoint);
            }
            Err(source) => {
                error!("Debuggee connection error: {}", source);
                return Err(WireError::Connect {
                    endpoint: endpoint.to_string(),
                    attempts: retries + 1,
                    source,
                });
            }
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// What the connection has to report
#[derive(Debug)]
pub enum ClientEvent<C> {
    /// The connection is established; fired once
    Open,
    /// Reply for a request; `None` when the request was aborted
    Response(C, Option<DebuggeeMessage>),
    /// Message that answers no pending request
    Event(DebuggeeMessage),
    /// Connecting failed for good
    Error(WireError),
    /// The connection is gone; every pending request was aborted before this
    Closed,
}

type WireConnection = Framed<BoxedTransport, WireFormat>;

enum Connection {
    Connecting(oneshot::Receiver<Result<BoxedTransport, WireError>>),
    Open(WireConnection),
    Closed,
}

/// Request/response client for the debuggee, generic over the continuation
/// type parked with each request
pub struct DebuggeeClient<C> {
    connection: Connection,
    pending: PendingRequests<C>,
    /// Frames written before the connection opened
    queued: Vec<String>,
    /// Events ready to be returned by `next_event`
    backlog: VecDeque<ClientEvent<C>>,
    cancel: CancellationToken,
}

impl<C> DebuggeeClient<C> {
    /// Start connecting to `endpoint` in the background
    pub fn connect(endpoint: Endpoint, policy: RetryPolicy) -> Self {
        let cancel = CancellationToken::new();
        let (result_sender, result_receiver) = oneshot::channel();
        let token = cancel.clone();

        tokio::spawn(async move {
            let address = endpoint.to_string();
            info!("Connecting to debuggee at {}", address);
            let result = connect_with_retry(&address, policy, &token, || {
                TcpStream::connect(address.clone())
            })
            .await
            .map(|stream| Box::new(StreamTransport::from_tcp(stream)) as BoxedTransport);
            let _ = result_sender.send(result);
        });

        Self::with_connection(Connection::Connecting(result_receiver), cancel)
    }

    /// Wrap an already established transport
    #[cfg(test)]
    pub fn from_transport(transport: BoxedTransport) -> Self {
        let mut client = Self::with_connection(
            Connection::Open(Framed::new(transport)),
            CancellationToken::new(),
        );
        client.backlog.push_back(ClientEvent::Open);
        client
    }

    fn with_connection(connection: Connection, cancel: CancellationToken) -> Self {
        Self {
            connection,
            pending: PendingRequests::new(),
            queued: Vec::new(),
            backlog: VecDeque::new(),
            cancel,
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        matches!(self.connection, Connection::Open(_))
    }

    /// Send a command and park `continuation` until its reply arrives
    ///
    /// If the command cannot be written the continuation comes back from
    /// `next_event` with no reply.
    pub async fn request(&mut self, command: Command, continuation: C) {
        let id = self.pending.register(continuation);
        if let Err(e) = self.write(id, &command).await {
            warn!("Failed to send {} to debuggee: {}", command.name(), e);
            if let Some(continuation) = self.pending.complete(id) {
                self.backlog
                    .push_back(ClientEvent::Response(continuation, None));
            }
        }
    }

    async fn write(&mut self, id: u64, command: &Command) -> Result<(), WireError> {
        let payload = serde_json::to_string(&WireRequest::new(id, command))?;
        log_wire_message!(Level::DEBUG, "outgoing", command.name(), payload);

        match &mut self.connection {
            Connection::Connecting(_) => {
                self.queued.push(payload);
                Ok(())
            }
            Connection::Open(connection) => Ok(connection.send(&payload).await?),
            Connection::Closed => Err(WireError::Transport(TransportError::Disconnected)),
        }
    }

    /// Wait for the next thing the connection has to report
    ///
    /// Cancel-safe. Once the connection is closed and the backlog is empty
    /// this never resolves.
    pub async fn next_event(&mut self) -> ClientEvent<C> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return event;
            }

            match &mut self.connection {
                Connection::Connecting(result) => {
                    let outcome = result.await.unwrap_or(Err(WireError::Cancelled));
                    match outcome {
                        Ok(transport) => {
                            let mut connection: WireConnection = Framed::new(transport);
                            for payload in self.queued.drain(..) {
                                if let Err(e) = connection.send(&payload).await {
                                    warn!("Failed to flush queued command: {}", e);
                                }
                            }
                            self.connection = Connection::Open(connection);
                            return ClientEvent::Open;
                        }
                        Err(error) => {
                            self.connection = Connection::Closed;
                            self.abort_pending();
                            self.backlog.push_back(ClientEvent::Error(error));
                        }
                    }
                }
                Connection::Open(connection) => match connection.receive_message().await {
                    Ok(text) => {
                        if let Some(event) = self.dispatch(&text) {
                            return event;
                        }
                    }
                    Err(e) if e.is_disconnect() => {
                        debug!("Debuggee connection closed: {}", e);
                        self.shutdown();
                    }
                    Err(e) => warn!("Skipping malformed debuggee frame: {}", e),
                },
                Connection::Closed => std::future::pending::<()>().await,
            }
        }
    }

    /// Close the connection, or stop trying to open it
    pub async fn close(&mut self) {
        self.cancel.cancel();
        match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Open(mut connection) => {
                if let Err(e) = connection.close().await {
                    debug!("Error while closing debuggee connection: {}", e);
                }
                self.abort_pending();
                self.backlog.push_back(ClientEvent::Closed);
            }
            Connection::Connecting(_) => {
                self.abort_pending();
                self.backlog.push_back(ClientEvent::Closed);
            }
            Connection::Closed => {}
        }
    }

    /// Take every event that is ready without waiting, e.g. the aborted
    /// requests left behind by [`close`](Self::close)
    pub fn drain_events(&mut self) -> Vec<ClientEvent<C>> {
        self.backlog.drain(..).collect()
    }

    fn dispatch(&mut self, text: &str) -> Option<ClientEvent<C>> {
        let raw: Value = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Discarding unparseable debuggee message: {}", e);
                return None;
            }
        };
        let id = raw.get("_id").and_then(Value::as_u64);
        let command = raw
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        log_wire_message!(Level::DEBUG, "incoming", command.as_str(), text);

        let message: DebuggeeMessage = match serde_json::from_value(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed debuggee message '{}': {}", command, e);
                // A pending request still gets an answer
                let continuation = id.and_then(|id| self.pending.complete(id))?;
                return Some(ClientEvent::Response(
                    continuation,
                    Some(DebuggeeMessage::malformed(command, &e)),
                ));
            }
        };

        for warning in &message.warning_messages {
            warn!("Debuggee warning ({}): {}", message.command, warning);
        }

        match message.request_id().and_then(|id| self.pending.complete(id)) {
            Some(continuation) => Some(ClientEvent::Response(continuation, Some(message))),
            None => Some(ClientEvent::Event(message)),
        }
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        self.connection = Connection::Closed;
        self.abort_pending();
        self.backlog.push_back(ClientEvent::Closed);
    }

    fn abort_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!("Aborting {} pending debuggee request(s)", self.pending.len());
        }
        for continuation in self.pending.drain() {
            self.backlog
                .push_back(ClientEvent::Response(continuation, None));
        }
        self.queued.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::framing::FrameFormat;
    use crate::io::transport::{MockPeer, MockTransport};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    fn mock_client() -> (DebuggeeClient<&'static str>, MockPeer) {
        let (transport, peer) = MockTransport::pair();
        (DebuggeeClient::from_transport(Box::new(transport)), peer)
    }

    async fn next_request(peer: &mut MockPeer) -> Value {
        let mut frame = peer.next_sent().await.unwrap();
        let payload = WireFormat::decode(&mut frame).unwrap().unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    fn reply(peer: &MockPeer, body: Value) {
        peer.push(WireFormat::encode(&body.to_string()));
    }

    #[tokio::test]
    async fn test_out_of_order_replies_reach_their_own_continuation() {
        let (mut client, mut peer) = mock_client();
        assert!(matches!(client.next_event().await, ClientEvent::Open));

        client.request(Command::GetThreads, "threads").await;
        client.request(Command::GetStackTrace, "stack").await;
        client.request(Command::Resume, "resume").await;

        let mut ids = Vec::new();
        for expected in ["getThreads", "getStackTrace", "resume"] {
            let request = next_request(&mut peer).await;
            assert_eq!(request["command"], expected);
            ids.push((request["_id"].as_u64().unwrap(), expected));
        }
        assert_eq!(ids.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![0, 1, 2]);

        for (id, command) in ids.iter().rev() {
            reply(&peer, json!({"_id": id, "command": command, "commandExecStatus": "ok"}));
        }

        for expected in ["resume", "stack", "threads"] {
            match client.next_event().await {
                ClientEvent::Response(continuation, Some(message)) => {
                    assert_eq!(continuation, expected);
                    let command = match continuation {
                        "threads" => "getThreads",
                        "stack" => "getStackTrace",
                        _ => "resume",
                    };
                    assert_eq!(message.command, command);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_reply_still_answers_its_request() {
        let (mut client, mut peer) = mock_client();
        client.next_event().await;

        client.request(Command::GetThreads, "threads").await;
        let request = next_request(&mut peer).await;
        reply(
            &peer,
            json!({
                "_id": request["_id"],
                "command": "getThreads",
                "commandExecStatus": "ok",
                "thread_ident": "MainThread",
                "result": {}
            }),
        );

        match client.next_event().await {
            ClientEvent::Response("threads", Some(message)) => {
                assert_eq!(message.command, "getThreads");
                assert!(!message.is_ok());
                assert!(message.error_text().contains("Malformed reply"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Without a waiting request the message is dropped
        reply(&peer, json!({"command": "paused", "thread_ident": "MainThread"}));
        reply(&peer, json!({"command": "programEnd"}));
        match client.next_event().await {
            ClientEvent::Event(message) => assert_eq!(message.command, "programEnd"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_message_is_an_event() {
        let (mut client, peer) = mock_client();
        client.next_event().await;

        reply(&peer, json!({"_id": 99, "command": "programBreak"}));
        reply(&peer, json!({"command": "programEnd"}));

        match client.next_event().await {
            ClientEvent::Event(message) => assert_eq!(message.command, "programBreak"),
            other => panic!("unexpected event: {other:?}"),
        }
        match client.next_event().await {
            ClientEvent::Event(message) => assert_eq!(message.command, "programEnd"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reply_to_completed_id_is_an_event() {
        let (mut client, mut peer) = mock_client();
        client.next_event().await;
        client.request(Command::ClearBreakpoints { file_name: "a.py".to_string() }, "clear").await;
        client.request(Command::RunScript, "run").await;

        assert_eq!(next_request(&mut peer).await["_id"], 0);
        assert_eq!(next_request(&mut peer).await["_id"], 1);

        reply(&peer, json!({"_id": 0, "command": "clearBreakpoints", "commandExecStatus": "ok"}));
        assert!(matches!(client.next_event().await, ClientEvent::Response("clear", Some(_))));

        // The id is spent, a second reply cannot complete anything
        reply(&peer, json!({"_id": 0, "command": "clearBreakpoints"}));
        assert!(matches!(client.next_event().await, ClientEvent::Event(_)));
    }

    #[tokio::test]
    async fn test_hang_up_aborts_pending_before_closed() {
        let (mut client, mut peer) = mock_client();
        client.next_event().await;

        for name in ["a", "b", "c"] {
            client.request(Command::GetThreads, name).await;
        }
        peer.hang_up();

        let mut aborted = Vec::new();
        loop {
            match client.next_event().await {
                ClientEvent::Response(continuation, None) => aborted.push(continuation),
                ClientEvent::Closed => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(aborted, vec!["a", "b", "c"]);
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_explicit_close_and_send_after_close() {
        let (mut client, _peer) = mock_client();
        client.next_event().await;

        client.request(Command::StepOver, "step").await;
        client.close().await;
        assert!(matches!(client.next_event().await, ClientEvent::Response("step", None)));
        assert!(matches!(client.next_event().await, ClientEvent::Closed));

        client.request(Command::StepInto, "late").await;
        assert!(matches!(client.next_event().await, ClientEvent::Response("late", None)));

        // Second close is a no-op
        client.close().await;
        let idle = tokio::time::timeout(Duration::from_millis(20), client.next_event()).await;
        assert!(idle.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_spacing() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let started = tokio::time::Instant::now();

        let result: Result<(), WireError> = connect_with_retry(
            "127.0.0.1:1",
            RetryPolicy::default(),
            &CancellationToken::new(),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) }
            },
        )
        .await;

        match result {
            Err(WireError::Connect { attempts: reported, .. }) => assert_eq!(reported, 11),
            other => panic!("unexpected result: {other:?}"),
        }
        // First attempt plus exactly ten retries
        assert_eq!(attempts.load(Ordering::SeqCst), 11);
        assert_eq!(started.elapsed(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_when_cancelled() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            trigger.cancel();
        });

        let result: Result<(), WireError> =
            connect_with_retry("127.0.0.1:1", RetryPolicy::default(), &cancel, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) }
            })
            .await;

        assert!(matches!(result, Err(WireError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), WireError> = connect_with_retry(
            "127.0.0.1:1",
            RetryPolicy::default(),
            &CancellationToken::new(),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::from(io::ErrorKind::ConnectionReset)) }
            },
        )
        .await;

        assert!(matches!(result, Err(WireError::Connect { attempts: 1, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commands_queued_until_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client: DebuggeeClient<&'static str> = DebuggeeClient::connect(
            Endpoint {
                host: "127.0.0.1".to_string(),
                port,
            },
            RetryPolicy::default(),
        );
        client.request(Command::GetThreads, "threads").await;

        let (socket, _) = listener.accept().await.unwrap();
        let mut server: Framed<StreamTransport, WireFormat> =
            Framed::new(StreamTransport::from_tcp(socket));

        assert!(matches!(client.next_event().await, ClientEvent::Open));
        let request: Value = serde_json::from_str(&server.receive_message().await.unwrap()).unwrap();
        assert_eq!(request["command"], "getThreads");
        assert_eq!(request["_id"], 0);

        server
            .send(&json!({"_id": 0, "command": "getThreads", "result": {}}).to_string())
            .await
            .unwrap();
        assert!(matches!(
            client.next_event().await,
            ClientEvent::Response("threads", Some(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client: DebuggeeClient<&'static str> = DebuggeeClient::connect(
            Endpoint {
                host: "127.0.0.1".to_string(),
                port,
            },
            RetryPolicy {
                max_retries: 2,
                delay: Duration::from_millis(10),
            },
        );
        client.request(Command::RunScript, "run").await;

        assert!(matches!(client.next_event().await, ClientEvent::Response("run", None)));
        match client.next_event().await {
            ClientEvent::Error(WireError::Connect { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
