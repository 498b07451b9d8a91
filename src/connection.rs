//! Connection runtime.
//!
//! A [`Connection`] owns the TCP stream, the outbound framer, and the
//! inbound reassembler, and feeds decoded packets to a [`PacketHandler`].
//! The handler replies through the [`Link`] it is handed with each packet.
//!
//! Failures travel on two channels: transport errors (the OS socket failed
//! or the peer closed) and protocol errors (malformed frames, undecodable
//! packets, or sequence violations raised by the handler). Either kind is
//! terminal and leaves the connection not alive.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::framing::{FrameEvent, FrameReceiver, FrameSender};
use crate::packet::Packet;

/// Peer-side protocol logic. One connection drives exactly one handler;
/// all callbacks run on the connection's worker.
pub trait PacketHandler {
    fn on_packet(&mut self, link: &mut Link, packet: Packet);
    /// A send or receive failed at the OS level.
    fn on_transport_error(&mut self, error: &io::Error);
    /// The peer closed the stream.
    fn on_disconnected(&mut self);
    /// The byte stream or packet sequence violated the protocol.
    fn on_protocol_error(&mut self, description: &str);
}

enum Failure {
    Transport(io::Error),
    Disconnected,
    Protocol(String),
}

/// The sending half plus liveness state, handed to the handler so it can
/// reply and flag sequence violations.
pub struct Link {
    stream: TcpStream,
    frame_sender: FrameSender,
    alive: bool,
    failure: Option<Failure>,
}

impl Link {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            frame_sender: FrameSender::new(),
            alive: true,
            failure: None,
        }
    }

    pub fn alive(&self) -> bool {
        self.alive
    }

    /// Marks the connection finished without recording a failure. Used for
    /// clean shutdown; nothing further is sent or received.
    pub fn set_not_alive(&mut self) {
        self.alive = false;
    }

    /// Terminal protocol violation raised by the handler or the runtime.
    pub fn protocol_error(&mut self, description: impl Into<String>) {
        self.fail(Failure::Protocol(description.into()));
    }

    fn transport_error(&mut self, error: io::Error) {
        self.fail(Failure::Transport(error));
    }

    fn disconnected(&mut self) {
        self.fail(Failure::Disconnected);
    }

    fn fail(&mut self, failure: Failure) {
        self.alive = false;
        // Keep the first failure; later ones are fallout.
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    /// Serializes the packet into one frame and writes it out whole. Short
    /// writes are retried by `write_all`. Returns false once the connection
    /// is no longer alive; the failure is dispatched by the runtime.
    pub fn send(&mut self, packet: &Packet) -> bool {
        if !self.alive {
            return false;
        }

        let mut writer = self.frame_sender.prepare();
        packet.encode(&mut writer);

        let frame = match self.frame_sender.finalize() {
            Ok(frame) => frame,
            Err(error) => {
                self.fail(Failure::Protocol(error.to_string()));
                return false;
            }
        };

        match self.stream.write_all(frame) {
            Ok(()) => true,
            Err(error) if is_disconnect(&error) => {
                self.disconnected();
                false
            }
            Err(error) => {
                self.transport_error(error);
                false
            }
        }
    }
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

pub struct Connection<H: PacketHandler> {
    link: Link,
    frame_receiver: FrameReceiver,
    pub handler: H,
}

impl<H: PacketHandler> Connection<H> {
    pub fn new(stream: TcpStream, handler: H) -> Self {
        Self {
            link: Link::new(stream),
            frame_receiver: FrameReceiver::new(),
            handler,
        }
    }

    pub fn alive(&self) -> bool {
        self.link.alive
    }

    pub fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    /// Borrows the handler and the link side by side, for calls that
    /// originate outside a dispatched packet (e.g. opening a handshake).
    pub fn with_link<R>(&mut self, call: impl FnOnce(&mut H, &mut Link) -> R) -> R {
        call(&mut self.handler, &mut self.link)
    }

    /// One cooperative step: a single receive into the reassembler, then
    /// drain and dispatch every complete buffered frame.
    pub fn update(&mut self) {
        if self.link.alive {
            let span = self.frame_receiver.prepare_receive_buffer();
            match self.link.stream.read(span) {
                Ok(0) => self.link.disconnected(),
                Ok(received) => self.frame_receiver.commit(received),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if is_disconnect(&error) => self.link.disconnected(),
                Err(error) => self.link.transport_error(error),
            }
        }

        while self.link.alive {
            let step = match self.frame_receiver.update() {
                FrameEvent::NeedMoreData => None,
                FrameEvent::MalformedStream => {
                    Some(Err("malformed frame header".to_string()))
                }
                FrameEvent::Frame(reader) => match Packet::decode(reader) {
                    Ok(packet) => Some(Ok(packet)),
                    Err(error) => Some(Err(error.to_string())),
                },
            };

            match step {
                None => break,
                Some(Err(description)) => {
                    self.link.protocol_error(description);
                }
                Some(Ok(packet)) => {
                    self.frame_receiver.discard_frame();
                    self.handler.on_packet(&mut self.link, packet);
                }
            }
        }

        self.dispatch_failure();
    }

    /// The per-connection worker loop: `while alive { update() }`.
    pub fn run(&mut self) {
        // A failed start() may already have recorded a failure.
        self.dispatch_failure();
        while self.link.alive {
            self.update();
        }
    }

    fn dispatch_failure(&mut self) {
        if let Some(failure) = self.link.failure.take() {
            match failure {
                Failure::Transport(error) => self.handler.on_transport_error(&error),
                Failure::Disconnected => self.handler.on_disconnected(),
                Failure::Protocol(description) => {
                    self.handler.on_protocol_error(&description)
                }
            }
        }
    }
}
