//! Per-connection session engine.
//!
//! Each accepted connection gets one session task. The session owns the
//! socket's write half and the user's outbound queue; a spawned reader task
//! owns the read half and decodes requests into the inbound queue. The
//! multiplexer is the only place the socket is written, and requests are
//! dispatched in decode order, one at a time, fan-out included.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::protocol::{ErrorCode, ProtocolError, Request, Response, PROTOCOL_VERSION};
use crate::server::registry::User;
use crate::server::ServerState;

/// Requests buffered between the reader task and the multiplexer.
const INBOUND_QUEUE_DEPTH: usize = 1;

/// What the multiplexer does after dispatching a request.
enum Outcome {
    /// Nothing to write; keep going.
    Continue,
    /// Write one response to the peer, then keep going.
    Reply(Response),
    /// Write one response, then terminate the session.
    Fatal(Response),
    /// Terminate without writing (Disconnect).
    Shutdown,
}

fn fatal(code: ErrorCode, info: &str) -> Outcome {
    Outcome::Fatal(Response::FatalError {
        code,
        info: info.to_string(),
    })
}

fn missing_room(room: String) -> Outcome {
    Outcome::Reply(Response::Error {
        code: ErrorCode::MissingRoom,
        info: room,
    })
}

pub(crate) struct Session {
    state: Arc<ServerState>,
    user: Arc<User>,
    peer: SocketAddr,
}

impl Session {
    /// Drive one connection from accept to teardown.
    pub(crate) async fn run(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
        let (read_half, mut write_half) = stream.into_split();
        let (user, mut outgoing) = User::new();
        let session = Session { state, user, peer };

        let (inbound_tx, mut inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let idle_timeout = session.state.idle_timeout;
        let reader = tokio::spawn(read_requests(read_half, inbound_tx, idle_timeout));

        let mut buf = BytesMut::with_capacity(256);
        loop {
            tokio::select! {
                response = outgoing.recv() => {
                    let Some(response) = response else { break };
                    if !session.write(&mut write_half, &mut buf, response).await {
                        break;
                    }
                }
                event = inbound.recv() => {
                    match event {
                        Some(Ok(request)) => {
                            debug!(user = session.display_name(), ?request, "received request");
                            match session.dispatch(request).await {
                                Outcome::Continue => {}
                                Outcome::Reply(response) => {
                                    if !session.write(&mut write_half, &mut buf, response).await {
                                        break;
                                    }
                                }
                                Outcome::Fatal(response) => {
                                    session.write(&mut write_half, &mut buf, response).await;
                                    break;
                                }
                                Outcome::Shutdown => break,
                            }
                        }
                        Some(Err(err)) => {
                            session.fail(&mut write_half, &mut buf, err).await;
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        reader.abort();
        session.teardown().await;
    }

    fn display_name(&self) -> &str {
        self.user.name().unwrap_or("")
    }

    /// Encode and write one response; false terminates the session.
    async fn write(
        &self,
        socket: &mut OwnedWriteHalf,
        buf: &mut BytesMut,
        response: Response,
    ) -> bool {
        debug!(user = self.display_name(), ?response, "sending response");
        buf.clear();
        response.encode(buf);
        if let Err(err) = socket.write_all(buf).await {
            warn!(peer = %self.peer, "response write failed: {}", err);
            return false;
        }
        true
    }

    /// Report a reader failure. Without a per-message length prefix a decode
    /// error loses framing, so every path here ends the session; malformed
    /// input gets a best-effort error response first.
    async fn fail(&self, socket: &mut OwnedWriteHalf, buf: &mut BytesMut, err: ProtocolError) {
        match err {
            ProtocolError::Closed => {}
            ProtocolError::Io(err) => {
                warn!(peer = %self.peer, "error receiving request: {}", err);
            }
            err => {
                warn!(peer = %self.peer, "malformed request: {}", err);
                let response = Response::Error {
                    code: ErrorCode::MalformedRequest,
                    info: String::new(),
                };
                self.write(socket, buf, response).await;
            }
        }
    }

    /// Process one request against server state. Fan-out enqueues happen
    /// here; direct replies are returned for the multiplexer to write.
    async fn dispatch(&self, request: Request) -> Outcome {
        // Pending sessions may only complete the handshake or keep alive.
        if !self.user.connected()
            && !matches!(request, Request::Keepalive | Request::Connect { .. })
        {
            return fatal(ErrorCode::NotConnected, "");
        }

        match request {
            Request::Keepalive => Outcome::Continue,
            Request::Connect { version, name } => self.connect(version, name).await,
            Request::Disconnect => Outcome::Shutdown,
            Request::ListRooms { user } => self.list_rooms(user).await,
            Request::ListUsers { room } => self.list_users(room).await,
            Request::MessageRoom { room, text } => self.message_room(room, text).await,
            Request::MessageUser { user, text } => self.message_user(user, text).await,
            Request::CreateRoom { room } => self.create_room(room).await,
            Request::JoinRoom { room } => self.join_room(room).await,
            Request::LeaveRoom { room } => self.leave_room(room).await,
        }
    }

    async fn connect(&self, version: u32, name: String) -> Outcome {
        if self.user.connected() {
            return fatal(ErrorCode::AlreadyConnected, "");
        }
        if version != PROTOCOL_VERSION {
            return fatal(ErrorCode::UnsupportedVersion, "expected version 1");
        }
        if name.is_empty() || name.contains(' ') {
            return fatal(
                ErrorCode::InvalidUser,
                "username must be non-empty and contain no spaces",
            );
        }
        if !self.state.users.insert(&name, &self.user).await {
            return fatal(ErrorCode::ExistingUser, "username already exists");
        }

        self.state
            .rooms
            .general()
            .insert(&name, Arc::clone(&self.user))
            .await;
        info!(user = %name, peer = %self.peer, "user connected");
        Outcome::Continue
    }

    async fn list_rooms(&self, user: String) -> Outcome {
        let rooms = self.state.rooms.list(&user).await;
        Outcome::Reply(Response::RoomList { user, rooms })
    }

    async fn list_users(&self, room: String) -> Outcome {
        let users = if room.is_empty() {
            self.state.users.names().await
        } else {
            match self.state.rooms.get(&room).await {
                Some(target) => target.member_names().await,
                None => return missing_room(room),
            }
        };
        Outcome::Reply(Response::UserList { room, users })
    }

    async fn message_room(&self, room: String, text: String) -> Outcome {
        if text.is_empty() {
            return Outcome::Reply(Response::Error {
                code: ErrorCode::InvalidText,
                info: room,
            });
        }
        let Some(target) = self.state.rooms.get(&room).await else {
            return missing_room(room);
        };

        let sender = self.display_name().to_string();
        let message = Response::RoomMessage {
            room,
            sender: sender.clone(),
            text,
        };
        target.broadcast(&sender, &message).await;
        Outcome::Continue
    }

    async fn message_user(&self, user: String, text: String) -> Outcome {
        if text.is_empty() {
            return Outcome::Reply(Response::Error {
                code: ErrorCode::InvalidText,
                info: user,
            });
        }
        let Some(recipient) = self.state.users.get(&user).await else {
            return Outcome::Reply(Response::Error {
                code: ErrorCode::MissingUser,
                info: user,
            });
        };

        let message = Response::UserMessage {
            sender: self.display_name().to_string(),
            text,
        };
        if user == self.display_name() {
            // Enqueueing on our own queue from the serialized dispatcher
            // could block against ourselves; reply directly instead.
            return Outcome::Reply(message);
        }
        recipient.send(message).await;
        Outcome::Continue
    }

    async fn create_room(&self, room: String) -> Outcome {
        if room.is_empty() || room.contains(' ') {
            return Outcome::Reply(Response::Error {
                code: ErrorCode::InvalidRoom,
                info: room,
            });
        }
        if !self.state.rooms.create(&room).await {
            return Outcome::Reply(Response::Error {
                code: ErrorCode::ExistingRoom,
                info: room,
            });
        }
        debug!(user = self.display_name(), room = %room, "room created");
        Outcome::Continue
    }

    async fn join_room(&self, room: String) -> Outcome {
        let Some(target) = self.state.rooms.get(&room).await else {
            return missing_room(room);
        };
        target
            .insert(self.display_name(), Arc::clone(&self.user))
            .await;
        Outcome::Continue
    }

    async fn leave_room(&self, room: String) -> Outcome {
        if !self.state.rooms.leave(&room, self.display_name()).await {
            return missing_room(room);
        }
        Outcome::Continue
    }

    /// Remove every trace of the user; runs exactly once, on the session
    /// task's exit path.
    async fn teardown(&self) {
        let Some(name) = self.user.name() else {
            debug!(peer = %self.peer, "connection closed before handshake");
            return;
        };
        self.state.users.remove(name).await;
        self.state.rooms.remove_everywhere(name).await;
        info!(user = %name, "user removed");
    }
}

/// Reader task: decode requests off the socket into the inbound queue until
/// an error, EOF, or the configured idle deadline.
async fn read_requests(
    read_half: OwnedReadHalf,
    inbound: mpsc::Sender<Result<Request, ProtocolError>>,
    idle_timeout: Option<Duration>,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        let next = match idle_timeout {
            Some(limit) => match timeout(limit, Request::decode(&mut reader)).await {
                Ok(decoded) => decoded,
                Err(_) => Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "idle timeout expired",
                ))),
            },
            None => Request::decode(&mut reader).await,
        };

        match next {
            Ok(request) => {
                if inbound.send(Ok(request)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = inbound.send(Err(err)).await;
                return;
            }
        }
    }
}
