pub mod alloc;
pub mod connection;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::frame::Frame;

/// Convenience for unit test code: an encoded frame with the given stream id
///  and payload. The total length is four header bytes plus the payload.
pub fn frame(stream_id: u32, payload: &[u8]) -> Frame {
    let mut buf = stream_id.to_be_bytes().to_vec();
    buf.extend_from_slice(payload);
    Frame::new(Bytes::from(buf))
}

/// The payload bytes of a frame built with [frame].
pub fn payload(frame: &Frame) -> Vec<u8> {
    frame.as_bytes()[4..].to_vec()
}

/// Bounds a test wait so a broken wakeup path fails the test instead of
///  hanging it.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out waiting for an event that should have happened")
}
