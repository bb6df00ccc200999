//! Datagram connection.
//!
//! One [`UdpConnection`] owns one bound UDP socket. There is no per-peer state:
//! receives report the sender's address with each payload, and sends name their
//! destination. One receive and one send may be outstanding at the same time;
//! each runs in its own task with its own buffer.

use super::buffer::{WriteBuffer, WriteBufferPool, MAX_DATAGRAM_SIZE};
use crate::error::ConnectionError;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// First pause after a failed receive.
const RECEIVE_RETRY_MIN: Duration = Duration::from_millis(1);

/// Longest pause between receives while the socket keeps failing.
const RECEIVE_RETRY_MAX: Duration = Duration::from_millis(100);

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender endpoint
    pub from: SocketAddr,
    /// Payload bytes, exactly as received
    pub payload: Vec<u8>,
}

/// Buffer sizing for a [`UdpConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpOptions {
    /// Bytes reserved for each receive; longer datagrams are truncated
    pub receive_buffer_size: usize,
    /// Idle write buffers kept for reuse
    pub write_buffer_pool_size: usize,
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self {
            receive_buffer_size: MAX_DATAGRAM_SIZE,
            write_buffer_pool_size: 64,
        }
    }
}

struct Outgoing {
    to: SocketAddr,
    buffer: WriteBuffer,
}

struct Inner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    buffers: Arc<WriteBufferPool>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    datagrams: mpsc::UnboundedSender<Datagram>,
    receive_buffer_size: usize,
    receiver: Mutex<Option<JoinHandle<()>>>,
    sender: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.sender.abort();
        if let Some(receiver) = self
            .receiver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            receiver.abort();
        }
    }
}

/// Handle to a bound datagram socket.
#[derive(Clone)]
pub struct UdpConnection {
    inner: Arc<Inner>,
}

impl UdpConnection {
    /// Binds a socket to `addr` and starts its send task.
    ///
    /// # Returns
    ///
    /// The connection and the channel on which received datagrams arrive once
    /// [`queue_receive_from`](Self::queue_receive_from) has been called.
    pub async fn bind(
        addr: SocketAddr,
        options: UdpOptions,
    ) -> io::Result<(Self, mpsc::UnboundedReceiver<Datagram>)> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let (outgoing, queue) = mpsc::unbounded_channel();
        let (datagrams, inbox) = mpsc::unbounded_channel();

        let sender = tokio::spawn(send_loop(Arc::clone(&socket), queue));
        debug!("📡 UDP socket bound on {}", local_addr);

        let connection = Self {
            inner: Arc::new(Inner {
                socket,
                local_addr,
                buffers: WriteBufferPool::new(options.write_buffer_pool_size),
                outgoing,
                datagrams,
                receive_buffer_size: options.receive_buffer_size.clamp(1, MAX_DATAGRAM_SIZE),
                receiver: Mutex::new(None),
                sender,
            }),
        };
        Ok((connection, inbox))
    }

    /// Arms the receive loop.
    ///
    /// The loop keeps exactly one receive outstanding and re-arms after every
    /// completion, errors included (after a growing pause), until [`unregister`](Self::unregister) is
    /// called or the datagram receiver is dropped. Calling this while the loop
    /// is running has no effect.
    pub fn queue_receive_from(&self) {
        let mut receiver = self
            .inner
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if receiver.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        *receiver = Some(tokio::spawn(receive_loop(
            Arc::clone(&self.inner.socket),
            self.inner.datagrams.clone(),
            self.inner.receive_buffer_size,
        )));
    }

    /// Stops the receive loop. Idempotent.
    ///
    /// Datagrams arriving afterwards stay in the socket buffer until the loop
    /// is armed again.
    pub fn unregister(&self) {
        if let Some(task) = self
            .inner
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!("UDP receive on {} unregistered", self.inner.local_addr);
        }
    }

    /// Queues `payload` for delivery to `endpoint`.
    ///
    /// The payload is copied into a pooled write buffer, which is returned to
    /// the pool once the send completes. Send failures are logged by the send
    /// task and do not affect the socket.
    pub fn send_to(&self, endpoint: SocketAddr, payload: &[u8]) -> Result<(), ConnectionError> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            error!(
                "Datagram of {} bytes to {} exceeds {} bytes",
                payload.len(),
                endpoint,
                MAX_DATAGRAM_SIZE
            );
            return Err(ConnectionError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_DATAGRAM_SIZE,
            });
        }

        let buffer = self.inner.buffers.acquire(payload);
        self.inner
            .outgoing
            .send(Outgoing {
                to: endpoint,
                buffer,
            })
            .map_err(|_| ConnectionError::Stopped)
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Idle buffers in the write buffer pool.
    pub fn idle_write_buffers(&self) -> usize {
        self.inner.buffers.available()
    }
}

impl fmt::Debug for UdpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpConnection")
            .field("local_addr", &self.inner.local_addr)
            .finish()
    }
}

async fn send_loop(socket: Arc<UdpSocket>, mut queue: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(Outgoing { to, buffer }) = queue.recv().await {
        match socket.send_to(&buffer, to).await {
            Ok(sent) => trace!("📤 Sent {} bytes to {}", sent, to),
            Err(e) => warn!("⚠️ UDP send_to {} failed: {}", to, e),
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    datagrams: mpsc::UnboundedSender<Datagram>,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];
    let mut retry = RECEIVE_RETRY_MIN;
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((n, from)) => {
                retry = RECEIVE_RETRY_MIN;
                trace!("📥 Received {} bytes from {}", n, from);
                let datagram = Datagram {
                    from,
                    payload: buffer[..n].to_vec(),
                };
                if datagrams.send(datagram).is_err() {
                    debug!("Datagram consumer is gone, stopping UDP receive");
                    break;
                }
            }
            Err(e) => {
                warn!("⚠️ UDP receive_from failed, retrying in {:?}: {}", retry, e);
                tokio::time::sleep(retry).await;
                retry = next_retry(retry);
            }
        }
    }
}

/// Doubles the receive retry delay up to [`RECEIVE_RETRY_MAX`].
fn next_retry(current: Duration) -> Duration {
    current.saturating_mul(2).min(RECEIVE_RETRY_MAX)
}
