use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::frame::Frame;
use crate::resume::frames_store::ResumableFramesStore;

/// Inbound adapter bound to a single transport attachment: filters replayed
///  duplicates through the store and forwards novel frames to the session.
///
/// A lost transport simply ends the loop without touching the session stream.
///  Transports come and go under resumption, so a transport-level error or
///  completion must never surface as a session error - only an explicit
///  dispose or error on the resumable connection may do that.
pub(crate) struct FrameReceiver {
    store: Arc<dyn ResumableFramesStore>,
    session: mpsc::UnboundedSender<Frame>,
}

impl FrameReceiver {
    pub fn new(
        store: Arc<dyn ResumableFramesStore>,
        session: mpsc::UnboundedSender<Frame>,
    ) -> FrameReceiver {
        FrameReceiver { store, session }
    }

    /// Drains the transport's inbound stream until the transport goes away or
    ///  the attachment is aborted. Connection frames (stream id 0) pass
    ///  through untouched; resumable frames are admitted through the store's
    ///  duplicate filter.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<Frame>) {
        while let Some(frame) = inbound.recv().await {
            if frame.is_resumable() && !self.store.resumable_frame_received(&frame) {
                trace!("dropping replayed duplicate: {:?}", frame);
                continue;
            }
            if self.session.send(frame).is_err() {
                // the session dropped its receive stream, so the connection is
                // on its way down and the rest of this transport's frames are
                // moot
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::resume::frames_store::MockResumableFramesStore;
    use crate::test_util::{frame, payload};

    use super::*;

    #[tokio::test]
    async fn test_connection_frames_bypass_the_store() {
        // any store call would panic: no expectations are set up
        let store = Arc::new(MockResumableFramesStore::new());
        let (session_tx, mut session_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(FrameReceiver::new(store, session_tx).run(inbound_rx));

        inbound_tx.send(frame(0, b"keepalive")).unwrap();

        let forwarded = session_rx.recv().await.unwrap();
        assert_eq!(payload(&forwarded), b"keepalive");
    }

    #[tokio::test]
    async fn test_admitted_frames_are_forwarded_and_duplicates_dropped() {
        let mut store = MockResumableFramesStore::new();
        store
            .expect_resumable_frame_received()
            .returning(|frame| payload(frame) != b"dup");
        let (session_tx, mut session_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(FrameReceiver::new(Arc::new(store), session_tx).run(inbound_rx));

        inbound_tx.send(frame(5, b"one")).unwrap();
        inbound_tx.send(frame(5, b"dup")).unwrap();
        inbound_tx.send(frame(5, b"two")).unwrap();

        assert_eq!(payload(&session_rx.recv().await.unwrap()), b"one");
        assert_eq!(payload(&session_rx.recv().await.unwrap()), b"two");
    }

    #[tokio::test]
    async fn test_transport_loss_does_not_end_the_session_stream() {
        let store = Arc::new(MockResumableFramesStore::new());
        let (session_tx, mut session_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(FrameReceiver::new(store, session_tx.clone()).run(inbound_rx));

        // the transport goes away
        drop(inbound_tx);
        receiver.await.unwrap();

        // the session stream stays open as long as the connection holds its
        // sender; the next transport attachment keeps feeding it
        assert!(matches!(
            session_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_a_dropped_session_stream_ends_the_receiver() {
        let mut store = MockResumableFramesStore::new();
        store.expect_resumable_frame_received().returning(|_| true);
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(FrameReceiver::new(Arc::new(store), session_tx).run(inbound_rx));

        drop(session_rx);
        inbound_tx.send(frame(5, b"ignored")).unwrap();

        // the receiver ends instead of spinning on a closed channel
        receiver.await.unwrap();
    }
}
