//! Player and room registries for the coordination server
//!
//! This module owns the authoritative server-side state:
//! - Player lifecycle (created at accept, named at authenticate, removed
//!   at disconnect)
//! - Room lifecycle (created on demand, deleted once empty)
//! - Human-readable identity minting for both
//!
//! Both registries are mutated exclusively from the server's single run
//! loop; nothing in here is shared across tasks.

use log::info;
use rand::Rng;
use shared::PacketPump;
use std::collections::HashMap;
use std::sync::Arc;

/// A connected player bound to one live connection.
///
/// The `room_id` back-reference is a lookup key only; the room's member
/// list is authoritative over membership.
pub struct Player {
    /// Opaque identity minted at accept time, never reused while the
    /// connection lives.
    pub id: String,
    /// Unset until the player authenticates.
    pub name: Option<String>,
    /// Room the player currently occupies, if any.
    pub room_id: Option<String>,
    /// Send half of the player's connection.
    pub pump: Arc<PacketPump>,
}

/// A room: an insertion-ordered set of player ids, no duplicates.
pub struct Room {
    pub id: String,
    pub player_ids: Vec<String>,
}

impl Room {
    pub fn is_empty(&self) -> bool {
        self.player_ids.is_empty()
    }
}

/// Authoritative player and room state.
pub struct Registry {
    players: HashMap<String, Player>,
    rooms: HashMap<String, Room>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    /// Registers a freshly accepted connection under a newly minted id.
    pub fn add_player(&mut self, pump: Arc<PacketPump>) -> String {
        let id = self.mint_player_id();
        info!("Player {} connected", id);
        self.players.insert(
            id.clone(),
            Player {
                id: id.clone(),
                name: None,
                room_id: None,
                pump,
            },
        );
        id
    }

    /// Drops a player from the registry. The caller is responsible for
    /// removing them from any room first.
    pub fn remove_player(&mut self, player_id: &str) -> Option<Player> {
        let player = self.players.remove(player_id);
        if player.is_some() {
            info!("Player {} removed", player_id);
        }
        player
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    /// Binds the player's display name at authentication.
    pub fn set_player_name(&mut self, player_id: &str, name: &str) -> bool {
        if let Some(player) = self.players.get_mut(player_id) {
            player.name = Some(name.to_string());
            true
        } else {
            false
        }
    }

    /// Creates a new room containing only the given player.
    ///
    /// Returns the new room id, or `None` for an unknown player.
    pub fn create_room(&mut self, player_id: &str) -> Option<String> {
        if !self.players.contains_key(player_id) {
            return None;
        }

        let room_id = self.mint_room_id();
        info!("Room {} created by {}", room_id, player_id);
        self.rooms.insert(
            room_id.clone(),
            Room {
                id: room_id.clone(),
                player_ids: vec![player_id.to_string()],
            },
        );
        if let Some(player) = self.players.get_mut(player_id) {
            player.room_id = Some(room_id.clone());
        }
        Some(room_id)
    }

    /// Adds a player to an existing room, preserving insertion order and
    /// rejecting duplicates. Returns false when the room does not exist.
    pub fn join_room(&mut self, player_id: &str, room_id: &str) -> bool {
        if !self.players.contains_key(player_id) {
            return false;
        }
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };

        if !room.player_ids.iter().any(|id| id == player_id) {
            room.player_ids.push(player_id.to_string());
        }
        if let Some(player) = self.players.get_mut(player_id) {
            player.room_id = Some(room_id.to_string());
        }
        true
    }

    /// Removes a player from whatever room they occupy.
    ///
    /// This is the single idempotent leave procedure shared by explicit
    /// LeaveRoom, the implicit leave before create/join, Disconnect, and
    /// the maintenance sweep. Returns the vacated room's id, or `None` if
    /// the player was roomless (a silent no-op).
    pub fn leave_room(&mut self, player_id: &str) -> Option<String> {
        let room_id = self.players.get_mut(player_id)?.room_id.take()?;
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.player_ids.retain(|id| id != player_id);
        }
        Some(room_id)
    }

    /// Current membership snapshot: room id plus player names in insertion
    /// order. Unauthenticated members appear as empty strings.
    pub fn room_details(&self, room_id: &str) -> Option<(String, Vec<String>)> {
        let room = self.rooms.get(room_id)?;
        let names = room
            .player_ids
            .iter()
            .map(|id| {
                self.players
                    .get(id)
                    .and_then(|p| p.name.clone())
                    .unwrap_or_default()
            })
            .collect();
        Some((room.id.clone(), names))
    }

    /// Pumps of every member of a room, skipping `except` (the player the
    /// triggering reply already goes to).
    pub fn room_member_pumps(
        &self,
        room_id: &str,
        except: Option<&str>,
    ) -> Vec<(String, Arc<PacketPump>)> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.player_ids
            .iter()
            .filter(|id| except != Some(id.as_str()))
            .filter_map(|id| {
                self.players
                    .get(id)
                    .map(|p| (id.clone(), Arc::clone(&p.pump)))
            })
            .collect()
    }

    /// Players whose transport is no longer live; candidates for implicit
    /// disconnect at the next sweep.
    pub fn dead_player_ids(&self) -> Vec<String> {
        self.players
            .values()
            .filter(|p| !p.pump.is_open())
            .map(|p| p.id.clone())
            .collect()
    }

    /// Deletes every room with zero members, returning their ids.
    pub fn drop_empty_rooms(&mut self) -> Vec<String> {
        let empty: Vec<String> = self
            .rooms
            .values()
            .filter(|room| room.is_empty())
            .map(|room| room.id.clone())
            .collect();

        for room_id in &empty {
            info!("Room {} is empty, removing", room_id);
            self.rooms.remove(room_id);
        }
        empty
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    // Identity minting returns human-readable ids, regenerating on
    // collision with a live id.

    fn mint_player_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id = format!("PL-{}", rng.gen_range(100_000..1_000_000));
            if !self.players.contains_key(&id) {
                return id;
            }
        }
    }

    fn mint_room_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id = format!("ROOM-{}", rng.gen_range(10_000..100_000));
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
