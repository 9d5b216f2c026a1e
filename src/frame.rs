use std::fmt::{Debug, Formatter};

use anyhow::anyhow;
use bytes::{Buf, Bytes};

/// Stream id addressing the connection itself rather than an individual stream.
///  KEEPALIVE, LEASE, ERROR and the resume handshake all travel on it, and it is
///  exempt from the resumption protocol: losing a keepalive to a dying transport
///  is fine, the successor transport sends its own.
pub const CONNECTION_STREAM_ID: u32 = 0;

/// Leading bytes every frame must have for the stream id to be readable. The
///  full frame header is bigger, but this layer never looks past the stream id.
pub const MIN_FRAME_LEN: usize = 4;

/// A single protocol frame on its way between the session layer and a transport.
///
/// Frames are opaque here except for the stream id in their header - encoding
///  and decoding is the frame codec's business. Clones share the backing buffer,
///  so keeping a frame in the replay log while handing it to a transport does
///  not copy payload bytes, and dropping the last clone releases the buffer.
///  The ownership rules of this layer are expressed in terms of those handles:
///  whoever holds the last one frees the memory.
#[derive(Clone, Eq, PartialEq)]
pub struct Frame {
    buf: Bytes,
}

impl Frame {
    /// Wraps an already encoded frame. The buffer must start with the frame
    ///  header; anything shorter cannot carry a stream id.
    pub fn new(buf: Bytes) -> Frame {
        assert!(
            buf.len() >= MIN_FRAME_LEN,
            "a {} byte buffer cannot hold a frame header",
            buf.len()
        );
        Frame { buf }
    }

    /// Fallible variant of [Frame::new] for buffers that cross a trust
    ///  boundary, e.g. blobs a transport just cut out of its byte stream.
    pub fn try_from_bytes(buf: Bytes) -> anyhow::Result<Frame> {
        if buf.len() < MIN_FRAME_LEN {
            return Err(anyhow!(
                "a {} byte buffer cannot hold a frame header",
                buf.len()
            ));
        }
        Ok(Frame { buf })
    }

    /// The stream id from the frame header: an unsigned 31 bit integer in the
    ///  first four bytes. The sign bit is reserved by the protocol and masked
    ///  out.
    pub fn stream_id(&self) -> u32 {
        let mut header = &self.buf[..MIN_FRAME_LEN];
        header.get_u32() & 0x7FFF_FFFF
    }

    /// Frames on stream 0 address the connection itself and bypass the replay
    ///  log; all others are recorded, acknowledged and replayed.
    pub fn is_resumable(&self) -> bool {
        self.stream_id() != CONNECTION_STREAM_ID
    }

    /// Total encoded length. This is the unit all resumption positions are
    ///  counted in.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame[stream:{}, {} bytes]", self.stream_id(), self.buf.len())
    }
}
