//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and a scripted stand-in
//! for the ikp3db debuggee.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, defaulting to debug for this crate and info for
    /// tokio.
    ///
    /// ```bash
    /// RUST_LOG=ikpdb_dap=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// Global test logging setup
///
/// Add this to any test module where you want automatic logging initialization.
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// A fake debuggee listening on a loopback port
#[cfg(test)]
pub mod debuggee {
    use serde_json::Value;
    use std::time::Duration;
    use tokio::net::TcpListener;

    use crate::io::framing::Framed;
    use crate::io::transport::{StreamTransport, Transport};
    use crate::wire::framing::WireFormat;

    const TIMEOUT: Duration = Duration::from_secs(5);

    pub struct FakeDebuggee {
        listener: TcpListener,
        connection: Option<Framed<StreamTransport, WireFormat>>,
    }

    impl FakeDebuggee {
        pub async fn bind() -> Self {
            Self {
                listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
                connection: None,
            }
        }

        pub fn port(&self) -> u16 {
            self.listener.local_addr().unwrap().port()
        }

        /// Wait for the adapter to connect
        pub async fn accept(&mut self) {
            let (socket, _) = tokio::time::timeout(TIMEOUT, self.listener.accept())
                .await
                .expect("adapter never connected")
                .unwrap();
            self.connection = Some(Framed::new(StreamTransport::from_tcp(socket)));
        }

        /// Next command sent by the adapter, as parsed JSON
        pub async fn next_command(&mut self) -> Value {
            let connection = self.connection.as_mut().expect("not connected");
            let text = tokio::time::timeout(TIMEOUT, connection.receive_message())
                .await
                .expect("no command from adapter")
                .unwrap();
            serde_json::from_str(&text).unwrap()
        }

        /// Next command, asserting its name
        pub async fn expect_command(&mut self, name: &str) -> Value {
            let command = self.next_command().await;
            assert_eq!(command["command"], name, "unexpected command {command}");
            command
        }

        /// Answer `command` with a successful reply carrying `result`
        pub async fn reply_ok(&mut self, command: &Value, result: Value) {
            let reply = serde_json::json!({
                "_id": command["_id"],
                "command": command["command"],
                "result": result,
                "commandExecStatus": "ok",
            });
            self.push(reply).await;
        }

        /// Send an arbitrary message to the adapter
        pub async fn push(&mut self, message: Value) {
            let connection = self.connection.as_mut().expect("not connected");
            connection.send(&message.to_string()).await.unwrap();
        }

        /// Drop the connection
        pub async fn hang_up(&mut self) {
            if let Some(mut connection) = self.connection.take() {
                connection.close().await.unwrap();
            }
        }
    }
}

/// A scripted front end talking to a session over a [`MockTransport`]
///
/// [`MockTransport`]: crate::io::transport::MockTransport
#[cfg(test)]
pub mod front_end {
    use serde_json::{Value, json};
    use std::time::Duration;

    use crate::dap::framing::ContentLengthFormat;
    use crate::io::framing::FrameFormat;
    use crate::io::transport::{MockPeer, MockTransport};

    const TIMEOUT: Duration = Duration::from_secs(5);

    pub struct TestFrontEnd {
        peer: MockPeer,
        next_seq: i64,
    }

    impl TestFrontEnd {
        /// The transport to hand to the session, and the front end driving it
        pub fn pair() -> (MockTransport, Self) {
            let (transport, peer) = MockTransport::pair();
            (transport, Self { peer, next_seq: 1 })
        }

        /// Send a request; returns its `seq`
        pub fn request(&mut self, command: &str, arguments: Value) -> i64 {
            let seq = self.next_seq;
            self.next_seq += 1;
            let request = json!({
                "seq": seq,
                "type": "request",
                "command": command,
                "arguments": arguments,
            });
            self.peer
                .push(ContentLengthFormat::encode(&request.to_string()));
            seq
        }

        /// Next message written by the session
        pub async fn next_message(&mut self) -> Value {
            let mut frame = tokio::time::timeout(TIMEOUT, self.peer.next_sent())
                .await
                .expect("no message from session")
                .expect("session closed the front end");
            let payload = ContentLengthFormat::decode(&mut frame).unwrap().unwrap();
            serde_json::from_str(&payload).unwrap()
        }

        /// Next message, asserting it answers request `seq`
        pub async fn expect_response(&mut self, seq: i64) -> Value {
            let message = self.next_message().await;
            assert_eq!(message["type"], "response", "unexpected message {message}");
            assert_eq!(message["request_seq"], seq, "unexpected response {message}");
            message
        }

        /// Next message, asserting it is `event`
        pub async fn expect_event(&mut self, event: &str) -> Value {
            let message = self.next_message().await;
            assert_eq!(message["type"], "event", "unexpected message {message}");
            assert_eq!(message["event"], event, "unexpected event {message}");
            message
        }

        /// Send a request and wait for its response
        pub async fn call(&mut self, command: &str, arguments: Value) -> Value {
            let seq = self.request(command, arguments);
            self.expect_response(seq).await
        }

        pub fn hang_up(&mut self) {
            self.peer.hang_up();
        }
    }
}
