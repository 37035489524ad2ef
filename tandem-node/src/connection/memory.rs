//! In-process paired connection for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connection, ConnectionError};

#[derive(Debug)]
enum Signal {
    Frame(Vec<u8>),
    Close,
}

/// One end of an in-process connection pair.
///
/// Frames sent on one end arrive on the other in order. Every sent frame is
/// also recorded for assertions. Clones share the same end, so a test can
/// keep a handle while a node owns another.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: mpsc::UnboundedSender<Signal>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Signal>>,
    connected: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MemoryConnection {
    /// Create two linked ends.
    pub fn pair() -> (MemoryConnection, MemoryConnection) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        let end = |tx, rx| MemoryConnection {
            inner: Arc::new(Inner {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                connected: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            }),
        };
        (end(left_tx, left_rx), end(right_tx, right_rx))
    }

    /// Every frame sent on this end so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn connect(&self) -> Result<(), ConnectionError> {
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            let _ = self.inner.tx.send(Signal::Close);
        }
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        self.inner.sent.lock().unwrap().push(frame.clone());
        self.inner
            .tx
            .send(Signal::Frame(frame))
            .map_err(|_| ConnectionError::Closed)
    }

    async fn recv(&self) -> Result<Vec<u8>, ConnectionError> {
        let mut rx = self.inner.rx.lock().await;
        match rx.recv().await {
            Some(Signal::Frame(frame)) => Ok(frame),
            Some(Signal::Close) | None => {
                self.inner.connected.store(false, Ordering::SeqCst);
                Err(ConnectionError::Closed)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}
