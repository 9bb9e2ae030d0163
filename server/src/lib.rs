//! # Room Coordination Server Library
//!
//! The authoritative server for the multiplayer room coordination service.
//! Game clients connect over TCP, authenticate with a display name, and
//! create or join rooms; the server pushes a fresh membership snapshot to
//! every member whenever a room changes.
//!
//! ## Architecture
//!
//! All shared state (the player and room registries) is owned by a single
//! `select!` loop in [`network::Server::run`]. Per-connection packet pumps
//! run on their own tasks but only ever talk to the loop through a message
//! channel, so registry mutation is serialized by construction rather than
//! by locking convention.
//!
//! The loop has three arms:
//! - **accept**: new connections get a minted player identity and a pump
//! - **dispatch**: inbound requests run through the dispatch table and
//!   yield at most one direct reply (LeaveRoom and Disconnect yield none)
//! - **sweep**: a fixed-interval pass that disconnects players whose
//!   transport died and deletes empty rooms
//!
//! ## Module Organization
//!
//! - [`registry`]: player/room state and identity minting
//! - [`network`]: the listener, dispatch table and maintenance sweep

pub mod network;
pub mod registry;
