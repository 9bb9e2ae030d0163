//! Packet schema for the room coordination protocol.
//!
//! Every frame on the wire is a JSON object carrying a string `kind`
//! discriminator, an envelope (`packetId`, optional `replyId`) and the
//! kind-specific fields. A packet with `replyId` set answers the packet
//! whose `packetId` it names; without it the packet is an unsolicited
//! notification.

use serde::{Deserialize, Serialize};

/// Protocol version exchanged in `Authenticate`. The server rejects any
/// client reporting a lower version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 31070;

/// One protocol packet: correlation envelope plus tagged body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Positive, unique per sending connection, assigned at send time.
    #[serde(rename = "packetId", default)]
    pub packet_id: u32,
    /// Set iff this packet answers a previously received packet.
    #[serde(rename = "replyId", default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<u32>,
    #[serde(flatten)]
    pub body: PacketBody,
}

impl Packet {
    /// True when the packet is an unsolicited notification rather than a
    /// reply to an earlier request.
    pub fn is_notification(&self) -> bool {
        self.reply_id.is_none()
    }
}

/// The closed set of packet kinds. Decoding an unlisted `kind` fails, and
/// the pump drops such frames without acting on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PacketBody {
    Error {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Authenticate {
        client_name: String,
        client_version: u32,
    },
    #[serde(rename_all = "camelCase")]
    Authenticated {
        client_id: String,
        client_name: String,
        server_version: u32,
    },
    Disconnect,
    CreateRoom,
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
    },
    LeaveRoom,
    #[serde(rename_all = "camelCase")]
    RoomDetails {
        room_id: String,
        players: Vec<String>,
    },
}

impl PacketBody {
    /// Shorthand for an `Error` body carrying a server-supplied message.
    pub fn error(message: impl Into<String>) -> Self {
        PacketBody::Error {
            message: message.into(),
        }
    }
}
