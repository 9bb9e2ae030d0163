//! # Shared Protocol Library
//!
//! Wire protocol shared by the room coordination server and client:
//!
//! - [`packet`]: the tagged packet schema and correlation envelope
//! - [`codec`]: length-prefixed framing over a byte stream
//! - [`pump`]: the per-connection receive/dispatch engine
//! - [`error`]: the protocol failure taxonomy
//!
//! The protocol is request/reply over a single TCP connection per client.
//! Every packet carries a `packetId` assigned by its sender; a packet
//! answering an earlier one echoes that id in `replyId`. Packets without a
//! `replyId` are unsolicited notifications (for example room membership
//! snapshots pushed by the server).

pub mod codec;
pub mod error;
pub mod packet;
pub mod pump;

pub use error::NetError;
pub use packet::{Packet, PacketBody, DEFAULT_PORT, PROTOCOL_VERSION};
pub use pump::PacketPump;
