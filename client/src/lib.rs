//! # Room Coordination Client Library
//!
//! Client-side session for the multiplayer room coordination service. A
//! [`session::Session`] owns one connection to the server and exposes the
//! four coordination operations (authenticate, create room, join room,
//! leave room) plus a watch-channel signal that fires whenever the cached
//! room membership snapshot changes, regardless of whether the change came
//! from this session's own action or another member's.
//!
//! Richer tooling (content generation, process inspection, editors) builds
//! on these operations and the signal; it never touches the wire format.

pub mod session;

pub use session::{RoomSnapshot, Session};
