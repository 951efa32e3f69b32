//! In-memory transport that plays the board server in tests.
//!
//! Bytes the client writes are captured; bytes the "server" sends are
//! delivered with [`MockTransport::deliver`] or produced by a scripted
//! responder. Unlike a socket, `recv()` on an empty inbox waits until
//! something arrives or the peer hangs up.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type Script = dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync;

/// Operation a one-shot fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The next `connect()`.
    Connect,
    /// The next `send()`.
    Send,
    /// The next `recv()`.
    Recv,
}

/// Scripted peer: called with every written chunk, returns the replies.
#[derive(Clone)]
struct Peer(Arc<Script>);

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Peer(..)")
    }
}

/// Transport double for session tests.
///
/// Clones share one connection, so a test keeps a handle while the session
/// owns another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    link: Arc<Mutex<Link>>,
    wake: Arc<Notify>,
}

#[derive(Debug, Default)]
struct Link {
    open: bool,
    hung_up: bool,
    refusing: bool,
    stalled: bool,
    connects: usize,
    endpoint: Option<String>,
    written: Vec<Vec<u8>>,
    inbox: VecDeque<Vec<u8>>,
    peer: Option<Peer>,
    faults: Vec<(Fault, String)>,
}

impl Link {
    fn take_fault(&mut self, op: Fault) -> Option<String> {
        let index = self.faults.iter().position(|(f, _)| *f == op)?;
        Some(self.faults.remove(index).1)
    }
}

impl MockTransport {
    /// Create a disconnected transport with no peer script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand bytes to the client as if the server had sent them.
    pub fn deliver(&self, data: Vec<u8>) {
        self.link.lock().unwrap().inbox.push_back(data);
        self.wake.notify_waiters();
    }

    /// Answer every write with the chunks `script` returns.
    pub fn respond_with<F>(&self, script: F)
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        self.link.lock().unwrap().peer = Some(Peer(Arc::new(script)));
    }

    /// Every chunk written so far, across reconnects.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.link.lock().unwrap().written.clone()
    }

    /// The most recent chunk written.
    pub fn last_written(&self) -> Option<Vec<u8>> {
        self.link.lock().unwrap().written.last().cloned()
    }

    /// Forget captured writes.
    pub fn clear_written(&self) {
        self.link.lock().unwrap().written.clear();
    }

    /// Endpoint of the last successful connect.
    pub fn endpoint(&self) -> Option<String> {
        self.link.lock().unwrap().endpoint.clone()
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        self.link.lock().unwrap().connects
    }

    /// Server side closes the connection.
    ///
    /// A waiting `recv()` fails with `ConnectionClosed`; undelivered bytes
    /// are lost.
    pub fn hang_up(&self) {
        let mut link = self.link.lock().unwrap();
        link.open = false;
        link.hung_up = true;
        link.inbox.clear();
        drop(link);
        self.wake.notify_waiters();
    }

    /// Refuse every connect until called again with `false`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.link.lock().unwrap().refusing = refuse;
    }

    /// Make every `send()` hang, as if the peer stopped reading.
    pub fn stall_writes(&self, stall: bool) {
        self.link.lock().unwrap().stalled = stall;
    }

    /// Fail the next `op` with `reason`.
    pub fn fail_next(&self, op: Fault, reason: &str) {
        self.link
            .lock()
            .unwrap()
            .faults
            .push((op, reason.to_string()));
        self.wake.notify_waiters();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &str) -> Result<(), TransportError> {
        let mut link = self.link.lock().unwrap();
        if let Some(reason) = link.take_fault(Fault::Connect) {
            return Err(TransportError::ConnectionFailed(reason));
        }
        if link.refusing {
            return Err(TransportError::ConnectionFailed("connection refused".into()));
        }

        link.open = true;
        link.hung_up = false;
        link.connects += 1;
        link.endpoint = Some(endpoint.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let stalled = self.link.lock().unwrap().stalled;
        if stalled {
            return std::future::pending().await;
        }

        let mut link = self.link.lock().unwrap();
        if !link.open {
            return Err(TransportError::NotConnected);
        }
        if let Some(reason) = link.take_fault(Fault::Send) {
            return Err(TransportError::SendFailed(reason));
        }

        link.written.push(data.to_vec());
        let replies = match link.peer.clone() {
            Some(peer) => (peer.0)(data),
            None => return Ok(()),
        };
        if !replies.is_empty() {
            link.inbox.extend(replies);
            drop(link);
            self.wake.notify_waiters();
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        loop {
            // Register before looking so a wake between the two is kept
            let woken = self.wake.notified();
            {
                let mut link = self.link.lock().unwrap();
                if link.hung_up {
                    return Err(TransportError::ConnectionClosed);
                }
                if !link.open {
                    return Err(TransportError::NotConnected);
                }
                if let Some(reason) = link.take_fault(Fault::Recv) {
                    return Err(TransportError::ReceiveFailed(reason));
                }
                if let Some(chunk) = link.inbox.pop_front() {
                    return Ok(chunk);
                }
            }
            woken.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.link.lock().unwrap().open
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.link.lock().unwrap().open = false;
        self.wake.notify_waiters();
        Ok(())
    }
}
