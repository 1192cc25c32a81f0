//! Room bookkeeping for the relay hub, plus the `GameConfig.json`
//! hot-reload used to list known games.
//!
//! A room here is nothing but two FIFO queues: connections that announced
//! themselves as a host waiting for a guest, and guests waiting for a host.
//! Once a host and a guest for the same room code are matched, the pairing
//! carries on peer-to-peer over a pair of channels and the room entry is no
//! longer consulted for that pair.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

/// One entry of `GameConfig.json`.
#[derive(Serialize, Deserialize)]
pub struct GameEntry {
    /// The name of the game.
    pub name: String,
    /// The maximum amount of players (0 = no limit). Informational only —
    /// the relay never enforces it; the lobby session manager on the host
    /// peer is what actually admits or rejects joiners.
    pub max_players: u16,
}

type EntryList = Vec<GameEntry>;

/// A connection waiting for its counterpart. `inbox` is where the eventual
/// peer should push outgoing text frames meant for this connection; `notify`
/// is how that peer hands back its own inbox once it shows up, so both
/// sides end up knowing how to reach each other.
pub struct Pairing {
    pub inbox: mpsc::Sender<String>,
    pub notify: oneshot::Sender<mpsc::Sender<String>>,
}

/// One room's two waiting queues.
#[derive(Default)]
pub struct Room {
    pub waiting_hosts: VecDeque<Pairing>,
    pub waiting_guests: VecDeque<Pairing>,
}

impl Room {
    /// A room with nobody left waiting in either queue is no longer useful
    /// to keep around.
    fn is_empty(&self) -> bool {
        self.waiting_hosts.is_empty() && self.waiting_guests.is_empty()
    }
}

/// The application state.
#[derive(Default)]
pub struct AppState {
    /// Rooms currently holding at least one unpaired connection.
    pub rooms: Mutex<HashMap<String, Room>>,
    /// Maps game id to the maximum amount of players allowed, as published
    /// by `GameConfig.json`.
    pub configs: RwLock<HashMap<String, u16>>,
}

impl AppState {
    /// Drops a room once both of its queues are empty, called after a
    /// pairing attempt whether or not it succeeded.
    pub async fn prune_room(&self, room_code: &str) {
        let mut rooms = self.rooms.lock().await;
        if rooms.get(room_code).is_some_and(Room::is_empty) {
            rooms.remove(room_code);
        }
    }
}

/// Reloads the configuration file that lists the games and their maximum
/// number of players per room.
pub async fn reload_config(state: &Arc<AppState>) -> Result<(), String> {
    let json_content = fs::read_to_string("GameConfig.json")
        .await
        .map_err(|e| format!("Failed to read file: {}", e))?;
    let raw_data: EntryList =
        serde_json::from_str(&json_content).map_err(|e| format!("Failed to parse JSON: {}", e))?;
    let new_configs: HashMap<String, u16> = raw_data
        .into_iter()
        .map(|entry| (entry.name, entry.max_players))
        .collect();

    {
        let mut configs = state.configs.write().await;
        *configs = new_configs; // Replace all.
    }
    Ok(())
}
