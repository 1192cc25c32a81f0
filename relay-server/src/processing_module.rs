//! The relay loop itself: once two connections are paired, pump text frames
//! between them until either side closes.

use crate::hand_shake::Paired;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

/// Pumps frames in both directions until the socket closes or the peer's
/// channel is dropped. Returns a short reason for logging, matching the
/// shape every connection handler in this server returns.
pub async fn relay(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    paired: Paired,
) -> &'static str {
    let Paired {
        to_peer,
        mut from_peer,
    } = paired;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if to_peer.send(text.to_string()).await.is_err() {
                            return "peer disconnected";
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return "connection closed";
                    }
                    Some(Ok(_)) => {} // Ping/pong/binary frames are not part of this protocol.
                    Some(Err(err)) => {
                        tracing::warn!(?err, "transport error while relaying");
                        return "transport error";
                    }
                }
            }
            outgoing = from_peer.recv() => {
                match outgoing {
                    Some(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            return "send to socket failed";
                        }
                    }
                    None => return "peer disconnected",
                }
            }
        }
    }
}
