//! Shared helpers for socket-level tests.

use crate::connection::{ConnectionEvent, EventReceiver};
use crate::server::SessionHandler;
use crate::user::{Session, Sessions, UserId};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Upper bound for any single wait in tests.
pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Returns `(accepted, client)` ends of a loopback TCP connection.
pub(crate) async fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (
        accepted.expect("accept loopback").0,
        client.expect("connect loopback"),
    )
}

pub(crate) async fn next_event(rx: &mut EventReceiver) -> ConnectionEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("connection event in time")
        .expect("event channel open")
}

pub(crate) async fn next_record(rx: &mut mpsc::UnboundedReceiver<Recorded>) -> Recorded {
    timeout(WAIT, rx.recv())
        .await
        .expect("handler callback in time")
        .expect("record channel open")
}

/// One handler callback as observed by [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Connect(UserId),
    Receive(UserId, Vec<u8>),
    Close(UserId),
    Cleanup(usize),
}

/// Per-session state kept by [`RecordingHandler`].
#[derive(Debug, Default)]
pub(crate) struct Visits {
    pub(crate) received: usize,
}

/// Handler that reports every callback on a channel.
pub(crate) struct RecordingHandler {
    pub(crate) accept: bool,
    pub(crate) echo: bool,
    disconnect_on_receive: bool,
    reject_next: usize,
    log: mpsc::UnboundedSender<Recorded>,
}

impl RecordingHandler {
    pub(crate) fn new(accept: bool) -> (Self, mpsc::UnboundedReceiver<Recorded>) {
        let (log, records) = mpsc::unbounded_channel();
        (
            Self {
                accept,
                echo: false,
                disconnect_on_receive: false,
                reject_next: 0,
                log,
            },
            records,
        )
    }

    pub(crate) fn echoing(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Closes the session from inside every `on_receive`.
    pub(crate) fn disconnecting(mut self) -> Self {
        self.disconnect_on_receive = true;
        self
    }

    /// Rejects the next `count` connections regardless of `accept`.
    pub(crate) fn rejecting_first(mut self, count: usize) -> Self {
        self.reject_next = count;
        self
    }

    fn record(&self, record: Recorded) {
        let _ = self.log.send(record);
    }
}

#[async_trait]
impl SessionHandler for RecordingHandler {
    type User = Visits;

    async fn on_connect(&mut self, session: &mut Session<Visits>) -> bool {
        self.record(Recorded::Connect(session.id()));
        if self.reject_next > 0 {
            self.reject_next -= 1;
            return false;
        }
        self.accept
    }

    async fn on_receive(&mut self, session: &mut Session<Visits>, payload: &[u8]) {
        session.user_mut().received += 1;
        self.record(Recorded::Receive(session.id(), payload.to_vec()));
        if self.echo {
            let _ = session.send(payload.to_vec());
        }
        if self.disconnect_on_receive {
            session.disconnect();
        }
    }

    async fn on_close(&mut self, session: &mut Session<Visits>) {
        self.record(Recorded::Close(session.id()));
    }

    async fn on_cleanup(&mut self, sessions: &mut Sessions<Visits>) {
        self.record(Recorded::Cleanup(sessions.len()));
    }
}
