//! Pairs a freshly-upgraded WebSocket with its counterpart in the same room.
//!
//! The relay-level handshake is one JSON text frame, sent before any
//! `protocol` envelope crosses the wire:
//! `{"role":"host"|"guest","room_code":"ABCD23"}`. A host and a guest that
//! show up for the same room code are matched FIFO; everything exchanged
//! afterward is an opaque text frame the relay never parses.

use crate::lobby::{AppState, Pairing};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::lobby_code;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Bounds how many frames can queue up for a peer that is reading slower
/// than its counterpart is writing.
const CHANNEL_BUFFER_SIZE: usize = 64;

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Role {
    Host,
    Guest,
}

#[derive(Deserialize)]
struct HandshakeRequest {
    role: Role,
    room_code: String,
}

/// The channels a relay loop needs once pairing succeeds: where to push
/// frames bound for the peer, and where the peer's frames arrive.
pub struct Paired {
    pub to_peer: mpsc::Sender<String>,
    pub from_peer: mpsc::Receiver<String>,
}

async fn send_close(sender: &mut SplitSink<WebSocket, Message>, reason: String) {
    let _ = sender.send(Message::Text(reason.into())).await;
    let _ = sender.send(Message::Close(None)).await;
}

async fn read_handshake(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
) -> Option<HandshakeRequest> {
    loop {
        let Some(frame) = receiver.next().await else {
            tracing::warn!("connection closed before handshake completed");
            return None;
        };
        match frame {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<HandshakeRequest>(&text) {
                    Ok(request) => Some(request),
                    Err(err) => {
                        tracing::warn!(?err, "malformed handshake frame");
                        send_close(sender, "malformed handshake".into()).await;
                        None
                    }
                };
            }
            // Ping/pong/binary frames before the handshake are ignored.
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(?err, "transport error during handshake");
                return None;
            }
        }
    }
}

/// Reads the handshake frame, validates the room code, and either pairs
/// immediately with a counterpart already waiting in that room or queues
/// this connection and waits for one to arrive.
pub async fn pair(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    state: Arc<AppState>,
) -> Option<Paired> {
    let request = read_handshake(sender, receiver).await?;

    if !lobby_code::is_valid(&request.room_code) {
        tracing::warn!(room_code = %request.room_code, "rejected malformed room code");
        send_close(sender, "invalid room code".into()).await;
        return None;
    }
    let room_code = lobby_code::normalize(&request.room_code);

    let (my_inbox_tx, my_inbox_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

    let already_waiting = {
        let mut rooms = state.rooms.lock().await;
        let room = rooms.entry(room_code.clone()).or_default();
        let opposite = match request.role {
            Role::Host => &mut room.waiting_guests,
            Role::Guest => &mut room.waiting_hosts,
        };
        opposite.pop_front()
    };

    if let Some(peer) = already_waiting {
        state.prune_room(&room_code).await;
        let _ = peer.notify.send(my_inbox_tx);
        return Some(Paired {
            to_peer: peer.inbox,
            from_peer: my_inbox_rx,
        });
    }

    let (notify_tx, notify_rx) = oneshot::channel();
    {
        let mut rooms = state.rooms.lock().await;
        let room = rooms.entry(room_code.clone()).or_default();
        let mine = match request.role {
            Role::Host => &mut room.waiting_hosts,
            Role::Guest => &mut room.waiting_guests,
        };
        mine.push_back(Pairing {
            inbox: my_inbox_tx,
            notify: notify_tx,
        });
    }

    match notify_rx.await {
        Ok(peer_tx) => Some(Paired {
            to_peer: peer_tx,
            from_peer: my_inbox_rx,
        }),
        Err(_) => {
            tracing::warn!(room_code = %room_code, "pairing was abandoned before a counterpart arrived");
            state.prune_room(&room_code).await;
            None
        }
    }
}
