//! TCP acceptor and shared server state.

mod registry;
mod session;

pub use registry::{Room, RoomRegistry, User, UserRegistry, GENERAL_ROOM, OUTBOUND_QUEUE_DEPTH};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use session::Session;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hostname or address to bind.
    pub host: String,
    /// TCP port to bind. Port 0 picks an ephemeral port.
    pub port: u16,
    /// Drop sessions that send nothing for this long; `None` disables the
    /// deadline. Clients keep idle sessions alive with keepalives.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5555,
            idle_timeout: None,
        }
    }
}

/// State shared by every session: the registries and the session knobs.
pub(crate) struct ServerState {
    pub(crate) users: UserRegistry,
    pub(crate) rooms: RoomRegistry,
    pub(crate) idle_timeout: Option<Duration>,
}

/// The chat broker: accepts connections and spawns one session task each.
pub struct ChatServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl ChatServer {
    /// Bind the listening socket and bootstrap the registries: no users, and
    /// a room registry holding exactly the empty general room.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|err| {
                ChatError::network(format!(
                    "failed to bind {}:{}: {}",
                    config.host, config.port, err
                ))
            })?;

        let state = Arc::new(ServerState {
            users: UserRegistry::new(),
            rooms: RoomRegistry::new(),
            idle_timeout: config.idle_timeout,
        });

        Ok(ChatServer { listener, state })
    }

    /// The bound listening address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped. Individual accept
    /// failures are logged and do not stop the server.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "serving");
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "connection accepted");
                    let state = Arc::clone(&self.state);
                    tokio::spawn(Session::run(state, stream, peer));
                }
                Err(err) => {
                    warn!("error accepting connection: {}", err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::client::{ChatClient, ClientConfig};
    use crate::protocol::{ErrorCode, ProtocolError, Request, Response};

    async fn spawn_server() -> SocketAddr {
        let server = ChatServer::bind(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            idle_timeout: None,
        })
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    async fn connect(addr: SocketAddr, name: &str) -> (ChatClient, mpsc::Receiver<Response>) {
        let config = ClientConfig {
            name: name.to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        };
        ChatClient::connect(config).await.unwrap()
    }

    async fn recv(events: &mut mpsc::Receiver<Response>) -> Response {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for response")
            .expect("connection closed")
    }

    /// Round-trip one request so everything sent before it has been
    /// dispatched; Connect itself sends no success response.
    async fn sync(client: &ChatClient, events: &mut mpsc::Receiver<Response>) {
        client.list_rooms(String::new()).await.unwrap();
        match recv(events).await {
            Response::RoomList { .. } => {}
            other => panic!("expected RoomList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_and_broadcast() {
        let addr = spawn_server().await;
        let (alice, mut alice_events) = connect(addr, "alice").await;
        sync(&alice, &mut alice_events).await;
        let (bob, mut bob_events) = connect(addr, "bob").await;
        sync(&bob, &mut bob_events).await;

        alice
            .message_room(GENERAL_ROOM.to_string(), "hi".to_string())
            .await
            .unwrap();

        let message = recv(&mut bob_events).await;
        assert_eq!(
            message,
            Response::RoomMessage {
                room: GENERAL_ROOM.to_string(),
                sender: "alice".to_string(),
                text: "hi".to_string(),
            }
        );

        // The sender hears nothing back.
        let silence = timeout(Duration::from_millis(200), alice_events.recv()).await;
        assert!(silence.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_fatal() {
        let addr = spawn_server().await;
        let (alice, mut alice_events) = connect(addr, "alice").await;
        sync(&alice, &mut alice_events).await;

        let (_imposter, mut imposter_events) = connect(addr, "alice").await;
        match recv(&mut imposter_events).await {
            Response::FatalError { code, .. } => assert_eq!(code, ErrorCode::ExistingUser),
            other => panic!("expected FatalError, got {:?}", other),
        }
        assert!(imposter_events.recv().await.is_none());

        // The first session is unaffected.
        alice.list_users(GENERAL_ROOM.to_string()).await.unwrap();
        match recv(&mut alice_events).await {
            Response::UserList { users, .. } => assert_eq!(users, vec!["alice".to_string()]),
            other => panic!("expected UserList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_room_lifecycle() {
        let addr = spawn_server().await;
        let (alice, mut events) = connect(addr, "alice").await;

        alice.create_room("r1".to_string()).await.unwrap();
        alice.join_room("r1".to_string()).await.unwrap();
        alice.leave_room("r1".to_string()).await.unwrap();

        alice.list_rooms(String::new()).await.unwrap();
        match recv(&mut events).await {
            Response::RoomList { rooms, .. } => {
                assert!(rooms.contains(&GENERAL_ROOM.to_string()));
                assert!(!rooms.contains(&"r1".to_string()));
            }
            other => panic!("expected RoomList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_general_survives_empty() {
        let addr = spawn_server().await;
        let (alice, mut alice_events) = connect(addr, "alice").await;
        sync(&alice, &mut alice_events).await;

        alice.disconnect().await.unwrap();
        assert!(alice_events.recv().await.is_none());

        let (bob, mut bob_events) = connect(addr, "bob").await;
        bob.list_users(GENERAL_ROOM.to_string()).await.unwrap();
        match recv(&mut bob_events).await {
            Response::UserList { users, .. } => assert_eq!(users, vec!["bob".to_string()]),
            other => panic!("expected UserList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_room_name() {
        let addr = spawn_server().await;
        let (alice, mut events) = connect(addr, "alice").await;

        alice.create_room("bad name".to_string()).await.unwrap();
        assert_eq!(
            recv(&mut events).await,
            Response::Error {
                code: ErrorCode::InvalidRoom,
                info: "bad name".to_string(),
            }
        );

        alice.list_rooms(String::new()).await.unwrap();
        match recv(&mut events).await {
            Response::RoomList { rooms, .. } => {
                assert_eq!(rooms, vec![GENERAL_ROOM.to_string()]);
            }
            other => panic!("expected RoomList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_teardown() {
        let addr = spawn_server().await;
        let (alice, mut alice_events) = connect(addr, "alice").await;

        alice.create_room("r1".to_string()).await.unwrap();
        alice.join_room("r1".to_string()).await.unwrap();
        sync(&alice, &mut alice_events).await;

        alice.disconnect().await.unwrap();
        assert!(alice_events.recv().await.is_none());

        let (bob, mut bob_events) = connect(addr, "bob").await;

        bob.list_rooms(String::new()).await.unwrap();
        match recv(&mut bob_events).await {
            Response::RoomList { rooms, .. } => {
                assert!(!rooms.contains(&"r1".to_string()));
            }
            other => panic!("expected RoomList, got {:?}", other),
        }

        bob.list_users(String::new()).await.unwrap();
        match recv(&mut bob_events).await {
            Response::UserList { users, .. } => assert_eq!(users, vec!["bob".to_string()]),
            other => panic!("expected UserList, got {:?}", other),
        }

        bob.list_users(GENERAL_ROOM.to_string()).await.unwrap();
        match recv(&mut bob_events).await {
            Response::UserList { users, .. } => assert_eq!(users, vec!["bob".to_string()]),
            other => panic!("expected UserList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_direct_messages() {
        let addr = spawn_server().await;
        let (alice, mut alice_events) = connect(addr, "alice").await;
        sync(&alice, &mut alice_events).await;
        let (bob, mut bob_events) = connect(addr, "bob").await;
        sync(&bob, &mut bob_events).await;

        bob.message_user("alice".to_string(), "psst".to_string())
            .await
            .unwrap();
        assert_eq!(
            recv(&mut alice_events).await,
            Response::UserMessage {
                sender: "bob".to_string(),
                text: "psst".to_string(),
            }
        );

        // A user may message themselves.
        bob.message_user("bob".to_string(), "note to self".to_string())
            .await
            .unwrap();
        assert_eq!(
            recv(&mut bob_events).await,
            Response::UserMessage {
                sender: "bob".to_string(),
                text: "note to self".to_string(),
            }
        );

        bob.message_user("carol".to_string(), "anyone there?".to_string())
            .await
            .unwrap();
        assert_eq!(
            recv(&mut bob_events).await,
            Response::Error {
                code: ErrorCode::MissingUser,
                info: "carol".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_request_before_connect_is_fatal() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut buf = BytesMut::new();
        Request::ListRooms {
            user: String::new(),
        }
        .encode(&mut buf);
        stream.write_all(&buf).await.unwrap();

        let response = Response::decode(&mut stream).await.unwrap();
        assert_eq!(
            response,
            Response::FatalError {
                code: ErrorCode::NotConnected,
                info: String::new(),
            }
        );
        assert!(matches!(
            Response::decode(&mut stream).await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_unsupported_version_is_fatal() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut buf = BytesMut::new();
        Request::Connect {
            version: 2,
            name: "alice".to_string(),
        }
        .encode(&mut buf);
        stream.write_all(&buf).await.unwrap();

        match Response::decode(&mut stream).await.unwrap() {
            Response::FatalError { code, .. } => assert_eq!(code, ErrorCode::UnsupportedVersion),
            other => panic!("expected FatalError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_double_connect_is_fatal() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut buf = BytesMut::new();
        Request::Connect {
            version: 1,
            name: "alice".to_string(),
        }
        .encode(&mut buf);
        Request::Connect {
            version: 1,
            name: "alice2".to_string(),
        }
        .encode(&mut buf);
        stream.write_all(&buf).await.unwrap();

        match Response::decode(&mut stream).await.unwrap() {
            Response::FatalError { code, .. } => assert_eq!(code, ErrorCode::AlreadyConnected),
            other => panic!("expected FatalError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keepalive_is_silent() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // Keepalives are accepted both before and after the handshake.
        let mut buf = BytesMut::new();
        Request::Keepalive.encode(&mut buf);
        Request::Connect {
            version: 1,
            name: "kiki".to_string(),
        }
        .encode(&mut buf);
        Request::Keepalive.encode(&mut buf);
        Request::ListUsers {
            room: String::new(),
        }
        .encode(&mut buf);
        stream.write_all(&buf).await.unwrap();

        match Response::decode(&mut stream).await.unwrap() {
            Response::UserList { users, .. } => assert_eq!(users, vec!["kiki".to_string()]),
            other => panic!("expected UserList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_request_terminates() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();

        assert_eq!(
            Response::decode(&mut stream).await.unwrap(),
            Response::Error {
                code: ErrorCode::MalformedRequest,
                info: String::new(),
            }
        );
        assert!(matches!(
            Response::decode(&mut stream).await,
            Err(ProtocolError::Closed)
        ));
    }
}
