//! Mock receiver speaking the control protocol over TCP.
//!
//! [`MockDeviceServer`] listens on a random localhost port, accepts a single
//! client, and acknowledges every command frame it reads using the default
//! frame codec. It records the decoded commands so tests can assert on the
//! exact exchange, and can be scripted to reject an opcode, push an
//! unsolicited status frame, or hang up after a number of commands.
//!
//! # Example
//!
//! ```
//! use rxlink_test_harness::MockDeviceServer;
//!
//! # async fn example() -> rxlink_core::Result<()> {
//! let mut server = MockDeviceServer::new().await?;
//! server.start();
//! let addr = server.addr();
//! // ... connect a TcpControlChannel to `addr` and drive a session ...
//! let commands = server.wait().await.expect("server failed");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;

use rxlink_core::error::{Error, Result};
use rxlink_protocol::FrameDecoder;
use rxlink_protocol::codec::{self, Command, STATUS_OK};

/// Script applied by the server task.
#[derive(Debug, Clone, Default)]
struct DeviceScript {
    /// Status byte to answer per opcode; anything absent is accepted.
    rejections: HashMap<u8, u8>,
    /// Status frame pushed immediately after accepting the client.
    greeting: Option<Bytes>,
    /// Hang up (without acknowledging) on this 1-based command number.
    hang_up_on: Option<usize>,
}

/// A mock receiver for testing the TCP control channel end to end.
pub struct MockDeviceServer {
    /// The address the server is listening on (e.g., "127.0.0.1:54321").
    addr: String,
    /// Listener held until [`start`](MockDeviceServer::start) moves it into the task.
    listener: Option<TcpListener>,
    script: DeviceScript,
    /// Handle to the server task once started.
    server_handle: Option<JoinHandle<std::result::Result<Vec<Command>, String>>>,
}

impl MockDeviceServer {
    /// Bind a new server on a random localhost port.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Connection(format!("failed to bind mock device: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();

        Ok(Self {
            addr,
            listener: Some(listener),
            script: DeviceScript::default(),
            server_handle: None,
        })
    }

    /// Get the address the server is listening on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Answer every command with `opcode` using `status` instead of `0x00`.
    pub fn reject(&mut self, opcode: u8, status: u8) {
        self.script.rejections.insert(opcode, status);
    }

    /// Push a status frame with `payload` as soon as the client connects.
    pub fn greet_with_status(&mut self, payload: &[u8]) {
        self.script.greeting = Some(codec::encode_status(payload));
    }

    /// Close the connection instead of answering the `n`th command (1-based).
    pub fn hang_up_on(&mut self, n: usize) {
        self.script.hang_up_on = Some(n);
    }

    /// Start serving a single client in a background task.
    ///
    /// The task finishes when the client closes its end, and yields the
    /// commands it received in order.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            tracing::warn!(addr = %self.addr, "Mock device already started");
            return;
        };
        let script = self.script.clone();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;

            if let Some(greeting) = &script.greeting {
                stream
                    .write_all(greeting)
                    .await
                    .map_err(|e| format!("greeting write error: {}", e))?;
            }

            let mut decoder = FrameDecoder::new();
            let mut buf = BytesMut::with_capacity(1024);
            let mut received = Vec::new();

            loop {
                while let Some(frame) = decoder
                    .decode(&mut buf)
                    .map_err(|e| format!("decode error: {}", e))?
                {
                    let command = codec::decode_command(&frame)
                        .map_err(|e| format!("command {}: {}", received.len() + 1, e))?;
                    received.push(command);

                    if script.hang_up_on == Some(received.len()) {
                        return Ok(received);
                    }

                    let status = script
                        .rejections
                        .get(&command.opcode())
                        .copied()
                        .unwrap_or(STATUS_OK);
                    let ack = codec::encode_ack(&frame, status).map_err(|e| e.to_string())?;
                    stream
                        .write_all(&ack)
                        .await
                        .map_err(|e| format!("ack write error: {}", e))?;
                    stream
                        .flush()
                        .await
                        .map_err(|e| format!("flush error: {}", e))?;
                }

                let n = stream
                    .read_buf(&mut buf)
                    .await
                    .map_err(|e| format!("read error: {}", e))?;
                if n == 0 {
                    return Ok(received);
                }
            }
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to finish and return the commands it saw.
    pub async fn wait(self) -> std::result::Result<Vec<Command>, String> {
        match self.server_handle {
            Some(handle) => handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?,
            None => Ok(Vec::new()),
        }
    }
}
