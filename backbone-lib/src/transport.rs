//! The transport seam: one [`Transport`] per peer pair, since a star
//! topology's host holds one open channel to each guest while a guest holds
//! exactly one, to the host.

use crate::error::TransportError;
use protocol::Envelope;

/// Something a [`Transport`] reports without being asked.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Opened,
    Message(Envelope),
    Closed,
    Error(TransportError),
}

/// One bidirectional, message-framed channel to a single remote peer.
///
/// Implementations never block: `poll` drains whatever arrived since the
/// last call and returns immediately, fitting a non-async, frame-driven
/// update loop.
pub trait Transport {
    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;
    fn poll(&mut self) -> Option<TransportEvent>;
    fn is_open(&self) -> bool;
    /// Tears the channel down from this side. A no-op for transports (like
    /// `ewebsock`'s) with no explicit half-close; those rely on drop.
    fn close(&mut self) {}
}

/// Wraps a single `ewebsock` connection for the JSON envelope protocol.
pub struct WebSocketTransport {
    sender: ewebsock::WsSender,
    receiver: ewebsock::WsReceiver,
    open: bool,
}

impl WebSocketTransport {
    pub fn connect(url: &str) -> Result<Self, TransportError> {
        let (sender, receiver) = ewebsock::connect(url, ewebsock::Options::default())
            .map_err(TransportError::Fatal)?;
        Ok(WebSocketTransport {
            sender,
            receiver,
            open: false,
        })
    }
}

impl Transport for WebSocketTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let text = serde_json::to_string(envelope)
            .map_err(|e| TransportError::Fatal(e.to_string()))?;
        self.sender.send(ewebsock::WsMessage::Text(text));
        Ok(())
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        match self.receiver.try_recv()? {
            ewebsock::WsEvent::Opened => {
                self.open = true;
                Some(TransportEvent::Opened)
            }
            ewebsock::WsEvent::Message(ewebsock::WsMessage::Text(text)) => {
                match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => Some(TransportEvent::Message(envelope)),
                    Err(e) => Some(TransportEvent::Error(TransportError::Recoverable(
                        e.to_string(),
                    ))),
                }
            }
            ewebsock::WsEvent::Message(_) => None,
            ewebsock::WsEvent::Error(message) => {
                Some(TransportEvent::Error(TransportError::Recoverable(message)))
            }
            ewebsock::WsEvent::Closed => {
                self.open = false;
                Some(TransportEvent::Closed)
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// An in-memory, single-process pair of transports for tests, so multi-peer
/// scenarios can run deterministically without a real socket.
pub struct LoopbackTransport {
    outbox: std::rc::Rc<std::cell::RefCell<std::collections::VecDeque<Envelope>>>,
    inbox: std::rc::Rc<std::cell::RefCell<std::collections::VecDeque<Envelope>>>,
    open: bool,
}

impl LoopbackTransport {
    /// Builds a connected pair: messages sent on one arrive on the other.
    pub fn pair() -> (Self, Self) {
        let a_to_b = std::rc::Rc::new(std::cell::RefCell::new(std::collections::VecDeque::new()));
        let b_to_a = std::rc::Rc::new(std::cell::RefCell::new(std::collections::VecDeque::new()));
        let a = LoopbackTransport {
            outbox: a_to_b.clone(),
            inbox: b_to_a.clone(),
            open: true,
        };
        let b = LoopbackTransport {
            outbox: b_to_a,
            inbox: a_to_b,
            open: true,
        };
        (a, b)
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.outbox.borrow_mut().push_back(envelope.clone());
        Ok(())
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.inbox
            .borrow_mut()
            .pop_front()
            .map(TransportEvent::Message)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}
