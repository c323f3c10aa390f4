//! Channel-backed [`ClientSink`] for hosts with a single-threaded update loop.
//!
//! Connection tasks run on the Tokio runtime, but game state usually lives on
//! one thread that ticks at a fixed rate.  [`HostEventQueue`] turns every
//! collaborator callback into a [`HostEvent`] on an unbounded channel;
//! the host calls [`HostEventReceiver::drain`] from its tick to handle them
//! on its own thread.
//!
//! `ClientConnected` is a rendezvous: the connection task waits on a oneshot
//! until the host's handler has produced a handle.  The wait lasts at most
//! one tick as long as the host keeps draining.  If the receiver is dropped,
//! connects fail with [`SinkError::ConsumerGone`] instead of hanging.

use std::net::IpAddr;

use async_trait::async_trait;
use couchpad_core::{ControllerInputRecord, RoomCode};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;
use tracing::debug;

use crate::application::client_sink::{ClientHandle, ClientSink, SinkError};
use crate::application::manage_clients::Fingerprint;

/// One collaborator callback, queued for the host.
#[derive(Debug)]
pub enum HostEvent {
    ServerReady {
        address: IpAddr,
        room_code: RoomCode,
    },
    ClientConnected {
        fingerprint: Fingerprint,
        reply: oneshot::Sender<Result<ClientHandle, SinkError>>,
    },
    ClientDisconnected {
        handle: ClientHandle,
    },
    RuntimeStarted,
    RuntimeStopped,
    InvalidConnection,
    Input {
        handle: ClientHandle,
        record: ControllerInputRecord,
    },
}

/// Host-side callbacks run by [`HostEventReceiver::drain`].
pub trait HostHandler {
    fn server_ready(&mut self, _address: IpAddr, _room_code: &RoomCode) {}

    /// Creates the host's representation of a new client.
    fn client_connected(&mut self, fingerprint: &Fingerprint) -> Result<ClientHandle, SinkError>;

    fn client_disconnected(&mut self, handle: ClientHandle);

    /// The game started; the lobby is closed to new players.
    fn runtime_started(&mut self) {}

    /// The game ended; new players may join again.
    fn runtime_stopped(&mut self) {}

    fn invalid_connection(&mut self) {}

    fn input(&mut self, handle: ClientHandle, record: ControllerInputRecord);
}

// ── Producer side ─────────────────────────────────────────────────────────────

/// The [`ClientSink`] handed to [`crate::Server::start`].
#[derive(Debug, Clone)]
pub struct HostEventQueue {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl HostEventQueue {
    /// Creates a connected queue and receiver pair.
    pub fn channel() -> (HostEventQueue, HostEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (HostEventQueue { tx }, HostEventReceiver { rx })
    }

    fn push(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            debug!("host event dropped: receiver is gone");
        }
    }
}

#[async_trait]
impl ClientSink for HostEventQueue {
    async fn on_server_ready(&self, address: IpAddr, room_code: &RoomCode) {
        self.push(HostEvent::ServerReady {
            address,
            room_code: room_code.clone(),
        });
    }

    async fn on_client_connect(&self, fingerprint: &Fingerprint) -> Result<ClientHandle, SinkError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(HostEvent::ClientConnected {
                fingerprint: fingerprint.clone(),
                reply,
            })
            .map_err(|_| SinkError::ConsumerGone)?;
        answer.await.map_err(|_| SinkError::ConsumerGone)?
    }

    async fn on_client_disconnect(&self, handle: ClientHandle) {
        self.push(HostEvent::ClientDisconnected { handle });
    }

    async fn on_runtime_started(&self) {
        self.push(HostEvent::RuntimeStarted);
    }

    async fn on_runtime_stopped(&self) {
        self.push(HostEvent::RuntimeStopped);
    }

    async fn on_invalid_connection_attempt(&self) {
        self.push(HostEvent::InvalidConnection);
    }

    async fn on_input_received(&self, handle: ClientHandle, record: ControllerInputRecord) {
        self.push(HostEvent::Input { handle, record });
    }
}

// ── Consumer side ─────────────────────────────────────────────────────────────

/// Consumer end of the queue, owned by the host's update loop.
#[derive(Debug)]
pub struct HostEventReceiver {
    rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl HostEventReceiver {
    /// Handles the events that were queued when the call started, without
    /// blocking.  Returns how many were handled.
    ///
    /// Events pushed while the handler runs wait for the next call, so a
    /// steady stream of input cannot keep one tick from returning.
    pub fn drain<H: HostHandler>(&mut self, handler: &mut H) -> usize {
        let budget = self.rx.len();
        let mut handled = 0;
        while handled < budget {
            match self.rx.try_recv() {
                Ok(event) => {
                    dispatch(event, handler);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        handled
    }

    /// Waits for the next event.  Returns `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<HostEvent> {
        self.rx.recv().await
    }
}

fn dispatch<H: HostHandler>(event: HostEvent, handler: &mut H) {
    match event {
        HostEvent::ServerReady { address, room_code } => handler.server_ready(address, &room_code),
        HostEvent::ClientConnected { fingerprint, reply } => {
            let result = handler.client_connected(&fingerprint);
            if let Err(Ok(orphan)) = reply.send(result) {
                // The connection went away while waiting; undo the connect so
                // the host does not keep a client nobody will disconnect.
                debug!("[{fingerprint}] gone before its handle was delivered");
                handler.client_disconnected(orphan);
            }
        }
        HostEvent::ClientDisconnected { handle } => handler.client_disconnected(handle),
        HostEvent::RuntimeStarted => handler.runtime_started(),
        HostEvent::RuntimeStopped => handler.runtime_stopped(),
        HostEvent::InvalidConnection => handler.invalid_connection(),
        HostEvent::Input { handle, record } => handler.input(handle, record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchpad_core::Vector2;
    use std::net::Ipv4Addr;

    /// Records every callback as a string.
    #[derive(Default)]
    struct RecordingHandler {
        calls: Vec<String>,
        refuse: bool,
    }

    impl HostHandler for RecordingHandler {
        fn server_ready(&mut self, address: IpAddr, room_code: &RoomCode) {
            self.calls.push(format!("ready {address} {room_code}"));
        }

        fn client_connected(&mut self, fingerprint: &Fingerprint) -> Result<ClientHandle, SinkError> {
            self.calls.push(format!("connect {fingerprint}"));
            if self.refuse {
                Err(SinkError::Refused("lobby closed".to_string()))
            } else {
                Ok(ClientHandle::new())
            }
        }

        fn client_disconnected(&mut self, _handle: ClientHandle) {
            self.calls.push("disconnect".to_string());
        }

        fn runtime_started(&mut self) {
            self.calls.push("started".to_string());
        }

        fn runtime_stopped(&mut self) {
            self.calls.push("stopped".to_string());
        }

        fn invalid_connection(&mut self) {
            self.calls.push("invalid".to_string());
        }

        fn input(&mut self, _handle: ClientHandle, record: ControllerInputRecord) {
            self.calls.push(format!("input {}", record.letter_buttons));
        }
    }

    fn record(letters: i16) -> ControllerInputRecord {
        ControllerInputRecord {
            stick_a: Vector2::ZERO,
            stick_b: Vector2::ZERO,
            letter_buttons: letters,
            direction_buttons: 0,
        }
    }

    #[tokio::test]
    async fn test_drain_dispatches_in_order() {
        // Arrange
        let (queue, mut receiver) = HostEventQueue::channel();
        let mut handler = RecordingHandler::default();
        let room = RoomCode::from_ipv4(Ipv4Addr::new(192, 168, 1, 42));
        queue
            .on_server_ready(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)), &room)
            .await;
        queue.on_invalid_connection_attempt().await;
        queue.on_input_received(ClientHandle::new(), record(8)).await;
        queue.on_client_disconnect(ClientHandle::new()).await;

        // Act
        let handled = receiver.drain(&mut handler);

        // Assert
        assert_eq!(handled, 4);
        assert_eq!(
            handler.calls,
            vec!["ready 192.168.1.42 TCQIABEC", "invalid", "input 8", "disconnect"]
        );
    }

    #[tokio::test]
    async fn test_runtime_transitions_reach_the_handler() {
        let (queue, mut receiver) = HostEventQueue::channel();
        let mut handler = RecordingHandler::default();
        queue.on_runtime_started().await;
        queue.on_runtime_stopped().await;

        receiver.drain(&mut handler);

        assert_eq!(handler.calls, vec!["started", "stopped"]);
    }

    /// Pushes one more event every time it handles one.
    struct EchoingHandler {
        queue: HostEventQueue,
        handled: usize,
    }

    impl HostHandler for EchoingHandler {
        fn client_connected(&mut self, _fingerprint: &Fingerprint) -> Result<ClientHandle, SinkError> {
            Ok(ClientHandle::new())
        }

        fn client_disconnected(&mut self, _handle: ClientHandle) {}

        fn invalid_connection(&mut self) {
            self.handled += 1;
            self.queue.push(HostEvent::InvalidConnection);
        }

        fn input(&mut self, _handle: ClientHandle, _record: ControllerInputRecord) {}
    }

    #[test]
    fn test_drain_stops_at_events_queued_before_the_call() {
        // Arrange: the handler refills the queue as fast as it empties it.
        let (queue, mut receiver) = HostEventQueue::channel();
        queue.push(HostEvent::InvalidConnection);
        queue.push(HostEvent::InvalidConnection);
        let mut handler = EchoingHandler {
            queue: queue.clone(),
            handled: 0,
        };

        // Act
        let first = receiver.drain(&mut handler);
        let second = receiver.drain(&mut handler);

        // Assert
        assert_eq!(first, 2);
        assert_eq!(second, 2);
        assert_eq!(handler.handled, 4);
    }

    #[test]
    fn test_drain_on_empty_queue_returns_zero() {
        let (_queue, mut receiver) = HostEventQueue::channel();
        let mut handler = RecordingHandler::default();
        assert_eq!(receiver.drain(&mut handler), 0);
    }

    #[tokio::test]
    async fn test_connect_waits_for_handler_reply() {
        // Arrange
        let (queue, mut receiver) = HostEventQueue::channel();
        let mut handler = RecordingHandler::default();
        let pending = tokio::spawn(async move {
            queue
                .on_client_connect(&Fingerprint::from("10.0.0.2:5000"))
                .await
        });

        // Act: keep ticking until the connect event shows up.
        while receiver.drain(&mut handler) == 0 {
            tokio::task::yield_now().await;
        }
        let result = pending.await.unwrap();

        // Assert
        assert!(result.is_ok());
        assert_eq!(handler.calls, vec!["connect 10.0.0.2:5000"]);
    }

    #[tokio::test]
    async fn test_connect_refusal_reaches_the_caller() {
        let (queue, mut receiver) = HostEventQueue::channel();
        let mut handler = RecordingHandler {
            refuse: true,
            ..RecordingHandler::default()
        };
        let pending = tokio::spawn(async move {
            queue.on_client_connect(&Fingerprint::from("a:1")).await
        });

        while receiver.drain(&mut handler) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            pending.await.unwrap(),
            Err(SinkError::Refused("lobby closed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_connect_fails_when_receiver_dropped() {
        let (queue, receiver) = HostEventQueue::channel();
        drop(receiver);
        let result = queue.on_client_connect(&Fingerprint::from("a:1")).await;
        assert_eq!(result, Err(SinkError::ConsumerGone));
    }

    #[test]
    fn test_orphaned_connect_is_undone() {
        // Arrange: the waiting side is already gone.
        let (reply, answer) = oneshot::channel();
        drop(answer);
        let mut handler = RecordingHandler::default();

        // Act
        dispatch(
            HostEvent::ClientConnected {
                fingerprint: Fingerprint::from("a:1"),
                reply,
            },
            &mut handler,
        );

        // Assert
        assert_eq!(handler.calls, vec!["connect a:1", "disconnect"]);
    }
}
