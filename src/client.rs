//! Programmatic chat client.
//!
//! Wraps one TCP connection in the same shape the server uses per session: a
//! writer task that owns the socket's write half and the keepalive cadence,
//! and a reader task that decodes responses into an event stream. The
//! terminal front-end in `main.rs` and the end-to-end tests both drive this
//! type.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::protocol::{ProtocolError, Request, Response, PROTOCOL_VERSION};

/// Responses buffered from the reader before it blocks.
const EVENT_QUEUE_DEPTH: usize = 32;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Display name to connect under.
    pub name: String,
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Keepalive cadence, 1 to 30 seconds.
    pub keepalive: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "localhost".to_string(),
            port: 5555,
            keepalive: Duration::from_secs(15),
        }
    }
}

impl ClientConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(' ') {
            return Err(ChatError::config(
                "display name must be non-empty and contain no spaces",
            ));
        }
        let secs = self.keepalive.as_secs();
        if !(1..=30).contains(&secs) {
            return Err(ChatError::config(format!(
                "keepalive must be between 1 and 30 seconds, got {}",
                secs
            )));
        }
        Ok(())
    }
}

/// Handle to a live connection.
///
/// Dropping the handle (or calling [`ChatClient::disconnect`]) ends the
/// writer task; the event receiver closes once the server hangs up.
pub struct ChatClient {
    requests: mpsc::Sender<Request>,
}

impl ChatClient {
    /// Dial the server, send the Connect handshake, and spawn the reader and
    /// writer tasks. Responses — including any `FatalError` rejecting the
    /// handshake — arrive on the returned receiver.
    pub async fn connect(config: ClientConfig) -> Result<(ChatClient, mpsc::Receiver<Response>)> {
        config.validate()?;

        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|err| {
                ChatError::connection(format!(
                    "failed to dial {}:{}: {}",
                    config.host, config.port, err
                ))
            })?;
        let (read_half, write_half) = stream.into_split();

        let (requests, request_rx) = mpsc::channel(1);
        let (event_tx, events) = mpsc::channel(EVENT_QUEUE_DEPTH);

        tokio::spawn(write_requests(write_half, request_rx, config));
        tokio::spawn(read_responses(read_half, event_tx));

        Ok((ChatClient { requests }, events))
    }

    /// Send one request.
    pub async fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ChatError::connection("connection closed"))
    }

    /// List all rooms, or the rooms containing `user` when non-empty.
    pub async fn list_rooms(&self, user: String) -> Result<()> {
        self.send(Request::ListRooms { user }).await
    }

    /// List all connected users, or the members of `room` when non-empty.
    pub async fn list_users(&self, room: String) -> Result<()> {
        self.send(Request::ListUsers { room }).await
    }

    /// Broadcast text to a room.
    pub async fn message_room(&self, room: String, text: String) -> Result<()> {
        self.send(Request::MessageRoom { room, text }).await
    }

    /// Send text directly to one user.
    pub async fn message_user(&self, user: String, text: String) -> Result<()> {
        self.send(Request::MessageUser { user, text }).await
    }

    /// Create an empty room.
    pub async fn create_room(&self, room: String) -> Result<()> {
        self.send(Request::CreateRoom { room }).await
    }

    /// Join an existing room.
    pub async fn join_room(&self, room: String) -> Result<()> {
        self.send(Request::JoinRoom { room }).await
    }

    /// Leave a room.
    pub async fn leave_room(&self, room: String) -> Result<()> {
        self.send(Request::LeaveRoom { room }).await
    }

    /// Ask the server to end the session. The writer flushes the request and
    /// exits; the event receiver closes once the server hangs up.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(Request::Disconnect).await
    }
}

/// Writer task: the only place the socket is written. Sends the handshake
/// first, then multiplexes caller requests with the keepalive ticker.
async fn write_requests(
    mut socket: OwnedWriteHalf,
    mut requests: mpsc::Receiver<Request>,
    config: ClientConfig,
) {
    let mut buf = BytesMut::with_capacity(256);
    let connect = Request::Connect {
        version: PROTOCOL_VERSION,
        name: config.name,
    };
    if !write_request(&mut socket, &mut buf, &connect).await {
        return;
    }

    let start = Instant::now() + config.keepalive;
    let mut keepalive = interval_at(start, config.keepalive);
    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                let disconnect = matches!(request, Request::Disconnect);
                if !write_request(&mut socket, &mut buf, &request).await || disconnect {
                    break;
                }
            }
            _ = keepalive.tick() => {
                if !write_request(&mut socket, &mut buf, &Request::Keepalive).await {
                    break;
                }
            }
        }
    }
}

async fn write_request(socket: &mut OwnedWriteHalf, buf: &mut BytesMut, request: &Request) -> bool {
    debug!(?request, "sending request");
    buf.clear();
    request.encode(buf);
    if let Err(err) = socket.write_all(buf).await {
        warn!("request write failed: {}", err);
        return false;
    }
    true
}

/// Reader task: decode responses into the event stream. A fatal response is
/// forwarded and then ends the reader; so does EOF or a decode failure.
async fn read_responses(read_half: OwnedReadHalf, events: mpsc::Sender<Response>) {
    let mut reader = BufReader::new(read_half);
    loop {
        match Response::decode(&mut reader).await {
            Ok(response) => {
                let fatal = response.is_fatal();
                if events.send(response).await.is_err() || fatal {
                    return;
                }
            }
            Err(ProtocolError::Closed) => return,
            Err(err) => {
                warn!("error receiving response: {}", err);
                return;
            }
        }
    }
}
