use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::connection::DuplexConnection;
use crate::error::RSocketError;
use crate::frame::Frame;

/// In-memory transport double: records every outbound frame, lets the test
///  inject inbound frames and control the close lifecycle.
pub struct TestConnection {
    sent: Mutex<Vec<Frame>>,
    sent_wakeup: Notify,
    sent_error: Mutex<Option<RSocketError>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    disposed: AtomicBool,
    closed_wakeup: Notify,
}

impl TestConnection {
    pub fn new() -> Arc<TestConnection> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(TestConnection {
            sent: Mutex::new(Vec::new()),
            sent_wakeup: Notify::new(),
            sent_error: Mutex::new(None),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            disposed: AtomicBool::new(false),
            closed_wakeup: Notify::new(),
        })
    }

    /// A frame arriving from the peer. Dropped silently once the transport is
    ///  closed, like bytes on a dead socket.
    pub fn inject(&self, frame: Frame) {
        if let Some(inbound_tx) = &*self.inbound_tx.lock().unwrap() {
            let _ = inbound_tx.send(frame);
        }
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    /// Waits until at least `n` frames were handed to this transport, then
    ///  returns all of them in send order.
    pub async fn wait_for_sent(&self, n: usize) -> Vec<Frame> {
        loop {
            let wakeup = self.sent_wakeup.notified();
            {
                let sent = self.sent.lock().unwrap();
                if sent.len() >= n {
                    return sent.clone();
                }
            }
            wakeup.await;
        }
    }

    /// Drops the recorded outbound frames, releasing their buffers, the way a
    ///  real transport releases a frame once it is written to the socket.
    pub fn release_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Whether [TestConnection::receive] was called, i.e. whether anybody
    ///  wired this transport.
    pub fn receive_taken(&self) -> bool {
        self.inbound_rx.lock().unwrap().is_none()
    }

    /// The error this transport was closed with, if any.
    pub fn taken_error(&self) -> Option<RSocketError> {
        self.sent_error.lock().unwrap().clone()
    }
}

#[async_trait]
impl DuplexConnection for TestConnection {
    fn send_frame(&self, _stream_id: u32, frame: Frame) {
        self.sent.lock().unwrap().push(frame);
        self.sent_wakeup.notify_waiters();
    }

    fn receive(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        self.inbound_rx.lock().unwrap().take()
    }

    async fn closed(&self) {
        loop {
            let wakeup = self.closed_wakeup.notified();
            if self.disposed.load(Ordering::Acquire) {
                return;
            }
            wakeup.await;
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // ends the inbound stream, like a socket reaching EOF
        self.inbound_tx.lock().unwrap().take();
        self.closed_wakeup.notify_waiters();
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn send_error_and_close(&self, error: RSocketError) {
        *self.sent_error.lock().unwrap() = Some(error);
        self.dispose();
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(([127, 0, 0, 1], 7878).into())
    }
}
