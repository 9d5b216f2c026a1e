use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::frame::Frame;

/// Allocates frames whose backing buffers report their release, so a test can
///  assert that the code under test eventually drops every buffer it was
///  handed. The ownership-transfer rules of the connection layer make leaks a
///  real hazard: a frame sits in the send queue, the replay log, a transport
///  and the session stream, and each of those must let go of it exactly once.
pub struct TrackingFrameAlloc {
    live: Arc<AtomicUsize>,
    allocated: AtomicUsize,
}

/// The tracked backing storage of one frame. All clones of the frame share it;
///  dropping the last clone drops this and decrements the live counter.
struct TrackedBuffer {
    data: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl AsRef<[u8]> for TrackedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl TrackingFrameAlloc {
    pub fn new() -> TrackingFrameAlloc {
        TrackingFrameAlloc {
            live: Arc::new(AtomicUsize::new(0)),
            allocated: AtomicUsize::new(0),
        }
    }

    /// An encoded frame with tracked backing storage: four header bytes with
    ///  the stream id, then the payload.
    pub fn frame(&self, stream_id: u32, payload: &[u8]) -> Frame {
        let mut data = stream_id.to_be_bytes().to_vec();
        data.extend_from_slice(payload);

        self.live.fetch_add(1, Ordering::AcqRel);
        self.allocated.fetch_add(1, Ordering::AcqRel);
        Frame::new(Bytes::from_owner(TrackedBuffer {
            data,
            live: self.live.clone(),
        }))
    }

    /// Buffers allocated here that have not been released yet.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Resolves once every buffer ever allocated here has been released.
    ///  Buffers held by aborted tasks are dropped asynchronously, so this
    ///  polls; wrap it in a timeout.
    pub async fn all_released(&self) {
        loop {
            if self.live() == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_counts_live_buffers_across_clones() {
        let alloc = TrackingFrameAlloc::new();
        let frame = alloc.frame(5, b"abc");
        let clone = frame.clone();
        assert_eq!(alloc.live(), 1);
        assert_eq!(alloc.allocated(), 1);

        drop(frame);
        assert_eq!(alloc.live(), 1, "a clone still holds the buffer");

        drop(clone);
        assert_eq!(alloc.live(), 0);
        assert_eq!(alloc.allocated(), 1);
    }
}
