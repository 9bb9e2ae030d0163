//! Client session: one outbound connection plus cached session state.
//!
//! A session wraps a packet pump and exposes the four coordination
//! operations (authenticate, create room, join room, leave room). Room
//! membership snapshots, whether returned as a direct reply or pushed by
//! the server because another member acted, all pass through one
//! idempotent apply procedure that publishes changes on a watch channel.

use log::debug;
use shared::{NetError, PacketBody, PacketPump, PROTOCOL_VERSION};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Upper bound on the best-effort Disconnect send during shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Membership snapshot of the room the session currently occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub players: Vec<String>,
}

#[derive(Default)]
struct SessionState {
    client_id: Option<String>,
    client_name: Option<String>,
    room: Option<RoomSnapshot>,
}

/// A connected client session.
pub struct Session {
    pump: Arc<PacketPump>,
    state: Arc<Mutex<SessionState>>,
    room_tx: Arc<watch::Sender<Option<RoomSnapshot>>>,
}

impl Session {
    /// Opens the transport and starts the pump. Unsolicited `RoomDetails`
    /// notifications are applied to the cached snapshot as they arrive;
    /// any other notification kind is ignored.
    pub async fn connect(host: &str, port: u16) -> Result<Self, NetError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        let (pump, mut notify_rx) = PacketPump::start(stream);
        let pump = Arc::new(pump);
        let state = Arc::new(Mutex::new(SessionState::default()));
        let (room_tx, _room_rx) = watch::channel(None);
        let room_tx = Arc::new(room_tx);

        let task_state = Arc::clone(&state);
        let task_tx = Arc::clone(&room_tx);
        tokio::spawn(async move {
            while let Some(packet) = notify_rx.recv().await {
                match packet.body {
                    PacketBody::RoomDetails { room_id, players } => {
                        apply_snapshot(
                            &task_state,
                            &task_tx,
                            Some(RoomSnapshot { room_id, players }),
                        );
                    }
                    other => debug!("Ignoring notification: {:?}", other),
                }
            }
        });

        Ok(Session {
            pump,
            state,
            room_tx,
        })
    }

    /// Exchanges names and protocol versions with the server.
    ///
    /// An `Error` reply surfaces as [`NetError::Application`] carrying the
    /// server's message; a reply of any other unexpected kind is a
    /// protocol violation.
    pub async fn authenticate(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), NetError> {
        let reply = self
            .pump
            .send_receive(
                PacketBody::Authenticate {
                    client_name: name.to_string(),
                    client_version: PROTOCOL_VERSION,
                },
                cancel,
            )
            .await?;

        match reply.body {
            PacketBody::Authenticated {
                client_id,
                client_name,
                ..
            } => {
                let mut state = self.state.lock().unwrap();
                state.client_id = Some(client_id);
                state.client_name = Some(client_name);
                Ok(())
            }
            other => Err(unexpected_reply(other)),
        }
    }

    /// Creates a fresh room with this session as its only member.
    ///
    /// The returned snapshot is cached but not published on the
    /// room-updated channel; the caller initiated the change and holds the
    /// result in hand.
    pub async fn create_room(&self, cancel: &CancellationToken) -> Result<RoomSnapshot, NetError> {
        let reply = self.pump.send_receive(PacketBody::CreateRoom, cancel).await?;
        let snapshot = into_snapshot(reply.body)?;
        self.state.lock().unwrap().room = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Joins an existing room by id. The reply snapshot goes through the
    /// same apply procedure as asynchronous updates.
    pub async fn join_room(
        &self,
        room_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RoomSnapshot, NetError> {
        let reply = self
            .pump
            .send_receive(
                PacketBody::JoinRoom {
                    room_id: room_id.to_string(),
                },
                cancel,
            )
            .await?;
        let snapshot = into_snapshot(reply.body)?;
        apply_snapshot(&self.state, &self.room_tx, Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// Leaves the current room. The server produces no reply for this
    /// request, so nothing is awaited; the cached room is cleared locally.
    pub async fn leave_room(&self) -> Result<(), NetError> {
        self.pump.send(PacketBody::LeaveRoom).await?;
        apply_snapshot(&self.state, &self.room_tx, None);
        Ok(())
    }

    /// Subscribes to the room-updated signal. The receiver observes every
    /// distinct snapshot application, including the clear on leave.
    pub fn subscribe(&self) -> watch::Receiver<Option<RoomSnapshot>> {
        self.room_tx.subscribe()
    }

    pub fn client_id(&self) -> Option<String> {
        self.state.lock().unwrap().client_id.clone()
    }

    pub fn client_name(&self) -> Option<String> {
        self.state.lock().unwrap().client_name.clone()
    }

    pub fn room(&self) -> Option<RoomSnapshot> {
        self.state.lock().unwrap().room.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.pump.is_open()
    }

    /// Best-effort goodbye, then transport teardown. The pump is closed
    /// whether or not the Disconnect send got through.
    pub async fn shutdown(&self) {
        let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, self.pump.send(PacketBody::Disconnect))
            .await;
        self.pump.close().await;
    }
}

/// The snapshot procedure: applying an identical snapshot twice changes
/// nothing and signals nothing; a distinct snapshot is cached and
/// published once. Returns whether anything changed.
fn apply_snapshot(
    state: &Mutex<SessionState>,
    room_tx: &watch::Sender<Option<RoomSnapshot>>,
    snapshot: Option<RoomSnapshot>,
) -> bool {
    {
        let mut state = state.lock().unwrap();
        if state.room == snapshot {
            return false;
        }
        state.room = snapshot.clone();
    }
    let _ = room_tx.send(snapshot);
    true
}

fn into_snapshot(body: PacketBody) -> Result<RoomSnapshot, NetError> {
    match body {
        PacketBody::RoomDetails { room_id, players } => Ok(RoomSnapshot { room_id, players }),
        other => Err(unexpected_reply(other)),
    }
}

fn unexpected_reply(body: PacketBody) -> NetError {
    match body {
        PacketBody::Error { message } => NetError::Application(message),
        _ => NetError::Protocol("Incorrect response packet".to_string()),
    }
}
