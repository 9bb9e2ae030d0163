//! Server network layer: connection accept, request dispatch and the
//! maintenance sweep.
//!
//! All registry mutation happens on the single `run` loop. Each accepted
//! connection gets its own packet pump; a small forwarder task pushes that
//! player's inbound packets into the server channel, so concurrent
//! connections never touch the registries directly.

use crate::registry::Registry;
use log::{debug, error, info, warn};
use shared::{Packet, PacketBody, PacketPump, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::interval;

/// Fixed interval between maintenance sweeps (disconnect detection and
/// empty-room cleanup).
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Messages sent from per-connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { player_id: String, packet: Packet },
    Shutdown,
}

/// Stops a running server loop from another task.
#[derive(Clone)]
pub struct ShutdownHandle(mpsc::UnboundedSender<ServerMessage>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(ServerMessage::Shutdown);
    }
}

/// Main server owning the listener and the authoritative registries.
pub struct Server {
    listener: TcpListener,
    registry: Registry,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            registry: Registry::new(),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.server_tx.clone())
    }

    /// Main server loop: accept connections, dispatch requests, sweep.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut sweep_interval = interval(SWEEP_INTERVAL);

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept_connection(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { player_id, packet }) => {
                            self.handle_packet(&player_id, packet).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = sweep_interval.tick() => {
                    self.maintenance_sweep().await;
                },
            }
        }

        Ok(())
    }

    /// Registers a freshly accepted connection: mints a player, starts its
    /// pump, and forwards its inbound packets into the server channel.
    fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let (pump, mut notify_rx) = PacketPump::start(stream);
        let pump = Arc::new(pump);
        let player_id = self.registry.add_player(Arc::clone(&pump));
        info!("Accepted connection from {} as {}", addr, player_id);

        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            while let Some(packet) = notify_rx.recv().await {
                let message = ServerMessage::PacketReceived {
                    player_id: player_id.clone(),
                    packet,
                };
                if server_tx.send(message).is_err() {
                    break;
                }
            }
        });
    }

    /// Runs one request through the dispatch table and sends the direct
    /// reply, if the request warrants one.
    async fn handle_packet(&mut self, player_id: &str, packet: Packet) {
        let request_id = packet.packet_id;
        let reply = self.dispatch(player_id, packet.body).await;

        if let Some(body) = reply {
            let Some(player) = self.registry.player(player_id) else {
                return;
            };
            let pump = Arc::clone(&player.pump);
            if let Err(e) = pump.send_reply(body, request_id).await {
                warn!("Failed to reply to {}: {}", player_id, e);
            }
        }
    }

    /// The dispatch table. Every request yields at most one reply;
    /// LeaveRoom and Disconnect deliberately yield none.
    async fn dispatch(&mut self, player_id: &str, body: PacketBody) -> Option<PacketBody> {
        match body {
            PacketBody::Authenticate {
                client_name,
                client_version,
            } => {
                if client_version < PROTOCOL_VERSION {
                    warn!(
                        "Rejecting {}: client version {} below server version {}",
                        player_id, client_version, PROTOCOL_VERSION
                    );
                    return Some(PacketBody::error("Incompatible version with server"));
                }
                self.registry.set_player_name(player_id, &client_name);
                info!("Player {} authenticated as {}", player_id, client_name);
                Some(PacketBody::Authenticated {
                    client_id: player_id.to_string(),
                    client_name,
                    server_version: PROTOCOL_VERSION,
                })
            }

            PacketBody::CreateRoom => {
                self.remove_from_room(player_id).await;
                let room_id = self.registry.create_room(player_id)?;
                let (room_id, players) = self.registry.room_details(&room_id)?;
                Some(PacketBody::RoomDetails { room_id, players })
            }

            PacketBody::JoinRoom { room_id } => {
                if self.registry.room_details(&room_id).is_none() {
                    return Some(PacketBody::error("No room found with this ID."));
                }
                self.remove_from_room(player_id).await;
                self.registry.join_room(player_id, &room_id);
                // Existing members learn about the joiner asynchronously;
                // the joiner gets the same snapshot as the direct reply.
                self.broadcast_room(&room_id, Some(player_id)).await;
                let (room_id, players) = self.registry.room_details(&room_id)?;
                Some(PacketBody::RoomDetails { room_id, players })
            }

            PacketBody::LeaveRoom => {
                self.remove_from_room(player_id).await;
                None
            }

            PacketBody::Disconnect => {
                self.remove_from_room(player_id).await;
                if let Some(player) = self.registry.player(player_id) {
                    player.pump.close().await;
                }
                None
            }

            _ => Some(PacketBody::error("Unsupported packet type")),
        }
    }

    /// The idempotent leave procedure: removing a roomless player is a
    /// silent no-op; otherwise the vacated room's remaining members get a
    /// fresh snapshot.
    async fn remove_from_room(&mut self, player_id: &str) {
        if let Some(room_id) = self.registry.leave_room(player_id) {
            self.broadcast_room(&room_id, None).await;
        }
    }

    /// Sends the room's current snapshot to every member except `except`.
    /// Delivery failures to individual members are swallowed; the
    /// broadcast continues to the rest.
    async fn broadcast_room(&self, room_id: &str, except: Option<&str>) {
        let Some((room_id, players)) = self.registry.room_details(room_id) else {
            return;
        };
        let body = PacketBody::RoomDetails {
            room_id: room_id.clone(),
            players,
        };

        for (member_id, pump) in self.registry.room_member_pumps(&room_id, except) {
            if let Err(e) = pump.send(body.clone()).await {
                warn!("Failed to send room update to {}: {}", member_id, e);
            }
        }
    }

    /// Periodic maintenance: treat dead transports as implicit disconnects
    /// (room removal, broadcast, registry removal), then delete empty
    /// rooms.
    async fn maintenance_sweep(&mut self) {
        for player_id in self.registry.dead_player_ids() {
            debug!("Player {} transport is gone, disconnecting", player_id);
            self.remove_from_room(&player_id).await;
            if let Some(player) = self.registry.remove_player(&player_id) {
                player.pump.close().await;
            }
        }

        self.registry.drop_empty_rooms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener as RawListener, TcpStream};

    async fn test_server() -> Server {
        Server::bind("127.0.0.1:0").await.unwrap()
    }

    /// Registers a player backed by a loopback socket pair, as the accept
    /// path would. The peer end must stay alive for the pump to remain open.
    async fn register_player(server: &mut Server) -> (String, Arc<PacketPump>, TcpStream) {
        let listener = RawListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        let (pump, _rx) = PacketPump::start(client);
        let pump = Arc::new(pump);
        let id = server.registry.add_player(Arc::clone(&pump));
        (id, pump, peer)
    }

    #[tokio::test]
    async fn test_authenticate_rejects_old_client_version() {
        let mut server = test_server().await;
        let (player_id, _pump, _peer) = register_player(&mut server).await;

        let reply = server
            .dispatch(
                &player_id,
                PacketBody::Authenticate {
                    client_name: "Alice".to_string(),
                    client_version: 0,
                },
            )
            .await;

        match reply {
            Some(PacketBody::Error { message }) => {
                assert_eq!(message, "Incompatible version with server");
            }
            other => panic!("Expected Error reply, got {:?}", other),
        }
        // No name was bound; the connection stays registered.
        assert!(server.registry.player(&player_id).unwrap().name.is_none());
    }

    #[tokio::test]
    async fn test_authenticate_binds_name() {
        let mut server = test_server().await;
        let (player_id, _pump, _peer) = register_player(&mut server).await;

        let reply = server
            .dispatch(
                &player_id,
                PacketBody::Authenticate {
                    client_name: "Alice".to_string(),
                    client_version: PROTOCOL_VERSION,
                },
            )
            .await;

        match reply {
            Some(PacketBody::Authenticated {
                client_id,
                client_name,
                server_version,
            }) => {
                assert_eq!(client_id, player_id);
                assert_eq!(client_name, "Alice");
                assert_eq!(server_version, PROTOCOL_VERSION);
            }
            other => panic!("Expected Authenticated reply, got {:?}", other),
        }
        assert_eq!(
            server.registry.player(&player_id).unwrap().name.as_deref(),
            Some("Alice")
        );
    }

    #[tokio::test]
    async fn test_create_room_replies_with_details() {
        let mut server = test_server().await;
        let (player_id, _pump, _peer) = register_player(&mut server).await;
        server.registry.set_player_name(&player_id, "Alice");

        let reply = server.dispatch(&player_id, PacketBody::CreateRoom).await;
        match reply {
            Some(PacketBody::RoomDetails { room_id, players }) => {
                assert!(room_id.starts_with("ROOM-"));
                assert_eq!(players, vec!["Alice".to_string()]);
            }
            other => panic!("Expected RoomDetails reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_room_implicitly_leaves_previous() {
        let mut server = test_server().await;
        let (player_id, _pump, _peer) = register_player(&mut server).await;

        let first = match server.dispatch(&player_id, PacketBody::CreateRoom).await {
            Some(PacketBody::RoomDetails { room_id, .. }) => room_id,
            other => panic!("Expected RoomDetails reply, got {:?}", other),
        };
        let second = match server.dispatch(&player_id, PacketBody::CreateRoom).await {
            Some(PacketBody::RoomDetails { room_id, .. }) => room_id,
            other => panic!("Expected RoomDetails reply, got {:?}", other),
        };
        assert_ne!(first, second);

        // The first room is now empty and dies at the next sweep.
        server.maintenance_sweep().await;
        assert!(server.registry.room_details(&first).is_none());
        assert!(server.registry.room_details(&second).is_some());
    }

    #[tokio::test]
    async fn test_join_unknown_room_does_not_move_player() {
        let mut server = test_server().await;
        let (player_id, _pump, _peer) = register_player(&mut server).await;
        let home = match server.dispatch(&player_id, PacketBody::CreateRoom).await {
            Some(PacketBody::RoomDetails { room_id, .. }) => room_id,
            other => panic!("Expected RoomDetails reply, got {:?}", other),
        };

        let reply = server
            .dispatch(
                &player_id,
                PacketBody::JoinRoom {
                    room_id: "ROOM-99999".to_string(),
                },
            )
            .await;

        match reply {
            Some(PacketBody::Error { message }) => {
                assert_eq!(message, "No room found with this ID.");
            }
            other => panic!("Expected Error reply, got {:?}", other),
        }
        // Membership untouched by the failed join.
        assert_eq!(
            server.registry.player(&player_id).unwrap().room_id.as_deref(),
            Some(home.as_str())
        );
    }

    #[tokio::test]
    async fn test_leave_room_yields_no_reply() {
        let mut server = test_server().await;
        let (player_id, _pump, _peer) = register_player(&mut server).await;
        server.dispatch(&player_id, PacketBody::CreateRoom).await;

        let reply = server.dispatch(&player_id, PacketBody::LeaveRoom).await;
        assert!(reply.is_none());

        // Leaving while roomless is also a silent no-op.
        let reply = server.dispatch(&player_id, PacketBody::LeaveRoom).await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_packet_kind() {
        let mut server = test_server().await;
        let (player_id, _pump, _peer) = register_player(&mut server).await;

        // A server-to-client kind arriving as a request is unsupported.
        let reply = server
            .dispatch(
                &player_id,
                PacketBody::RoomDetails {
                    room_id: "ROOM-10000".to_string(),
                    players: vec![],
                },
            )
            .await;

        match reply {
            Some(PacketBody::Error { message }) => {
                assert_eq!(message, "Unsupported packet type");
            }
            other => panic!("Expected Error reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_dead_player_and_empty_room() {
        let mut server = test_server().await;
        let (player_id, pump, _peer) = register_player(&mut server).await;
        let room_id = match server.dispatch(&player_id, PacketBody::CreateRoom).await {
            Some(PacketBody::RoomDetails { room_id, .. }) => room_id,
            other => panic!("Expected RoomDetails reply, got {:?}", other),
        };

        pump.close().await;
        server.maintenance_sweep().await;

        assert!(server.registry.player(&player_id).is_none());
        assert!(server.registry.room_details(&room_id).is_none());
        assert_eq!(server.registry.player_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_closes_connection_and_leaves_room() {
        let mut server = test_server().await;
        let (player_id, pump, _peer) = register_player(&mut server).await;
        server.dispatch(&player_id, PacketBody::CreateRoom).await;

        let reply = server.dispatch(&player_id, PacketBody::Disconnect).await;
        assert!(reply.is_none());
        assert!(!pump.is_open());
        assert!(server.registry.player(&player_id).unwrap().room_id.is_none());

        // The closed transport is reaped on the next sweep.
        server.maintenance_sweep().await;
        assert!(server.registry.player(&player_id).is_none());
    }
}
