//! Per-connection packet pump.
//!
//! A pump owns one TCP connection. A spawned read task continuously drains
//! inbound frames and classifies each decoded packet: replies (those with a
//! `replyId`) are parked in a lock-guarded pending list for the caller that
//! sent the matching request, while notifications are forwarded in arrival
//! order to the single channel handed out at construction. A connection has
//! exactly one reader, so per-connection delivery order equals wire order.
//!
//! Frames that fail to decode (malformed payloads, unknown kinds) are
//! dropped with a warning; they never stop the pump.

use crate::codec::{self, FRAME_HEADER_LEN};
use crate::error::NetError;
use crate::packet::{Packet, PacketBody};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// How long an idle wait sleeps between checks of the pending-reply list.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long an unclaimed reply may sit in the pending list before it is
/// evicted. Bounds the growth left behind by cancelled waits.
pub const REPLY_TTL: Duration = Duration::from_secs(30);

/// A reply waiting for the caller that requested it, stamped with its
/// arrival time for TTL eviction.
#[derive(Debug)]
struct PendingReply {
    received: Instant,
    packet: Packet,
}

/// Receive/dispatch engine for one open connection.
pub struct PacketPump {
    writer: Mutex<OwnedWriteHalf>,
    next_packet_id: AtomicU32,
    pending: Arc<Mutex<Vec<PendingReply>>>,
    open: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl PacketPump {
    /// Takes ownership of the connection and starts the read task.
    ///
    /// The returned receiver yields every notification (packet without a
    /// `replyId`) in wire arrival order. It closes when the peer hangs up
    /// or [`PacketPump::close`] is called.
    pub fn start(stream: TcpStream) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (read_half, write_half) = stream.into_split();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(Vec::new()));
        let open = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();

        tokio::spawn(read_loop(
            read_half,
            notify_tx,
            Arc::clone(&pending),
            Arc::clone(&open),
            shutdown.clone(),
        ));

        let pump = PacketPump {
            writer: Mutex::new(write_half),
            next_packet_id: AtomicU32::new(0),
            pending,
            open,
            shutdown,
        };
        (pump, notify_rx)
    }

    /// True until the read task observes EOF or an error, or `close` runs.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Assigns the next packet id, frames the packet and writes it.
    /// Returns the assigned id so the caller can correlate a reply.
    pub async fn send(&self, body: PacketBody) -> Result<u32, NetError> {
        self.send_packet(body, None).await
    }

    /// Sends a direct answer to a previously received packet.
    pub async fn send_reply(&self, body: PacketBody, reply_to: u32) -> Result<u32, NetError> {
        self.send_packet(body, Some(reply_to)).await
    }

    async fn send_packet(
        &self,
        body: PacketBody,
        reply_id: Option<u32>,
    ) -> Result<u32, NetError> {
        if !self.is_open() {
            return Err(NetError::closed());
        }

        // Ids are 1-based and strictly increasing per connection.
        let packet_id = self.next_packet_id.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = codec::encode_frame(&Packet {
            packet_id,
            reply_id,
            body,
        })?;

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(&frame).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        if let Err(e) = writer.flush().await {
            self.open.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(packet_id)
    }

    /// Sends a request and waits for the packet answering it.
    ///
    /// The wait polls the pending list on a fixed short tick, so interleaved
    /// notifications or replies to other concurrent callers never satisfy
    /// it. Cancelling aborts the wait with [`NetError::Cancelled`] and
    /// leaves any late-arriving reply in the list, where the TTL sweep
    /// eventually reclaims it.
    pub async fn send_receive(
        &self,
        body: PacketBody,
        cancel: &CancellationToken,
    ) -> Result<Packet, NetError> {
        let packet_id = self.send_packet(body, None).await?;

        loop {
            if let Some(reply) = self.take_reply(packet_id).await {
                return Ok(reply);
            }
            if !self.is_open() {
                return Err(NetError::closed());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Removes and returns the pending reply correlated to `packet_id`,
    /// evicting stale entries along the way.
    async fn take_reply(&self, packet_id: u32) -> Option<Packet> {
        let mut pending = self.pending.lock().await;
        let now = Instant::now();
        evict_stale(&mut pending, now, REPLY_TTL);

        let index = pending
            .iter()
            .position(|entry| entry.packet.reply_id == Some(packet_id))?;
        Some(pending.remove(index).packet)
    }

    /// Stops the read task and releases the transport. In-flight waits are
    /// abandoned, not satisfied.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.open.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

fn evict_stale(pending: &mut Vec<PendingReply>, now: Instant, ttl: Duration) {
    pending.retain(|entry| now.duration_since(entry.received) <= ttl);
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    notify_tx: mpsc::UnboundedSender<Packet>,
    pending: Arc<Mutex<Vec<PendingReply>>>,
    open: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = read_frame(&mut reader) => result,
        };

        match frame {
            Ok(payload) => match codec::decode_payload(&payload) {
                Ok(packet) => {
                    if packet.is_notification() {
                        if notify_tx.send(packet).is_err() {
                            debug!("Notification receiver dropped, discarding packet");
                        }
                    } else {
                        let mut pending = pending.lock().await;
                        let now = Instant::now();
                        evict_stale(&mut pending, now, REPLY_TTL);
                        pending.push(PendingReply {
                            received: now,
                            packet,
                        });
                    }
                }
                Err(e) => warn!("Dropping undecodable frame: {}", e),
            },
            Err(e) => {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    debug!("Connection read failed: {}", e);
                }
                break;
            }
        }
    }
    open.store(false, Ordering::SeqCst);
}

/// Reads one length-prefixed frame and returns its payload bytes.
async fn read_frame(reader: &mut OwnedReadHalf) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = u16::from_le_bytes(header) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Connects a pump to an in-test raw peer, returning both ends.
    async fn pump_with_peer() -> (PacketPump, mpsc::UnboundedReceiver<Packet>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        let (pump, notify_rx) = PacketPump::start(client);
        (pump, notify_rx, peer)
    }

    async fn peer_read_packet(peer: &mut OwnedReadHalf) -> Packet {
        let payload = read_frame(peer).await.unwrap();
        codec::decode_payload(&payload).unwrap()
    }

    async fn peer_write_packet(peer: &mut OwnedWriteHalf, packet: &Packet) {
        let frame = codec::encode_frame(packet).unwrap();
        peer.write_all(&frame).await.unwrap();
        peer.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_packet_ids_are_sequential_from_one() {
        let (pump, _notify_rx, peer) = pump_with_peer().await;
        let (mut peer_read, _peer_write) = peer.into_split();

        for expected in 1u32..=5 {
            let sent = pump.send(PacketBody::CreateRoom).await.unwrap();
            assert_eq!(sent, expected);

            let observed = peer_read_packet(&mut peer_read).await;
            assert_eq!(observed.packet_id, expected);
            assert!(observed.is_notification());
        }
    }

    #[tokio::test]
    async fn test_send_receive_matches_reply_despite_notifications() {
        let (pump, mut notify_rx, peer) = pump_with_peer().await;
        let (mut peer_read, mut peer_write) = peer.into_split();

        let peer_task = tokio::spawn(async move {
            let request = peer_read_packet(&mut peer_read).await;

            // An unrelated notification lands first.
            peer_write_packet(
                &mut peer_write,
                &Packet {
                    packet_id: 1,
                    reply_id: None,
                    body: PacketBody::RoomDetails {
                        room_id: "ROOM-10000".to_string(),
                        players: vec!["Alice".to_string()],
                    },
                },
            )
            .await;

            peer_write_packet(
                &mut peer_write,
                &Packet {
                    packet_id: 2,
                    reply_id: Some(request.packet_id),
                    body: PacketBody::Authenticated {
                        client_id: "PL-100001".to_string(),
                        client_name: "Alice".to_string(),
                        server_version: 1,
                    },
                },
            )
            .await;
            peer_write
        });

        let cancel = CancellationToken::new();
        let reply = pump
            .send_receive(
                PacketBody::Authenticate {
                    client_name: "Alice".to_string(),
                    client_version: 1,
                },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(reply.reply_id, Some(1));
        match reply.body {
            PacketBody::Authenticated { client_id, .. } => {
                assert_eq!(client_id, "PL-100001");
            }
            _ => panic!("Wrong reply kind"),
        }

        // The interleaved notification went down the notification path.
        let notification = notify_rx.recv().await.unwrap();
        assert!(matches!(notification.body, PacketBody::RoomDetails { .. }));

        let _ = peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_wait_leaves_late_reply_pending() {
        let (pump, _notify_rx, peer) = pump_with_peer().await;
        let (mut peer_read, mut peer_write) = peer.into_split();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pump.send_receive(PacketBody::CreateRoom, &cancel).await;
        assert!(matches!(result, Err(NetError::Cancelled)));

        // The reply arrives after the wait was abandoned.
        let request = peer_read_packet(&mut peer_read).await;
        peer_write_packet(
            &mut peer_write,
            &Packet {
                packet_id: 1,
                reply_id: Some(request.packet_id),
                body: PacketBody::RoomDetails {
                    room_id: "ROOM-10000".to_string(),
                    players: vec![],
                },
            },
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // It sits in the pending list rather than being lost.
        let parked = pump.take_reply(request.packet_id).await;
        assert!(parked.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_frames_are_dropped() {
        let (pump, mut notify_rx, peer) = pump_with_peer().await;
        let (_peer_read, mut peer_write) = peer.into_split();

        // Garbage frame, then an unknown kind, then a valid notification.
        let garbage = b"\x03\x00abc";
        peer_write.write_all(garbage).await.unwrap();

        let unknown = br#"{"kind":"ItemBox","packetId":1}"#;
        peer_write
            .write_all(&(unknown.len() as u16).to_le_bytes())
            .await
            .unwrap();
        peer_write.write_all(unknown).await.unwrap();

        peer_write_packet(
            &mut peer_write,
            &Packet {
                packet_id: 2,
                reply_id: None,
                body: PacketBody::LeaveRoom,
            },
        )
        .await;

        let survivor = notify_rx.recv().await.unwrap();
        assert_eq!(survivor.body, PacketBody::LeaveRoom);
        assert!(pump.is_open());
    }

    #[tokio::test]
    async fn test_close_fails_send_and_marks_closed() {
        let (pump, _notify_rx, _peer) = pump_with_peer().await;
        assert!(pump.is_open());

        pump.close().await;
        assert!(!pump.is_open());

        let result = pump.send(PacketBody::Disconnect).await;
        assert!(matches!(result, Err(NetError::Transport(_))));
    }

    #[tokio::test]
    async fn test_peer_hangup_closes_pump() {
        let (pump, mut notify_rx, peer) = pump_with_peer().await;
        drop(peer);

        // Channel closing signals the read task has exited.
        assert!(notify_rx.recv().await.is_none());
        assert!(!pump.is_open());
    }

    #[test]
    fn test_evict_stale_honors_ttl() {
        let now = Instant::now();
        let mut pending = vec![
            PendingReply {
                received: now - Duration::from_secs(60),
                packet: Packet {
                    packet_id: 1,
                    reply_id: Some(1),
                    body: PacketBody::LeaveRoom,
                },
            },
            PendingReply {
                received: now,
                packet: Packet {
                    packet_id: 2,
                    reply_id: Some(2),
                    body: PacketBody::LeaveRoom,
                },
            },
        ];

        evict_stale(&mut pending, now, REPLY_TTL);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].packet.reply_id, Some(2));
    }
}
