use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::frame::Frame;

/// Errors of the frames store. They are terminal for the connection the store
///  backs: a failed save or a failed replay stream tears the resumable
///  connection down, because a store that lost frames can no longer keep the
///  lossless-replay promise.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Retained frames would exceed the configured bound. The peer stopped
    ///  acknowledging, or acknowledgements are not being relayed to
    ///  `release_frames`.
    #[error("replay cache exceeds its limit of {limit} bytes")]
    CacheOverflow { limit: usize },

    #[error("frames store is closed")]
    Closed,

    /// An acknowledgement position outside the retained range. The peer
    ///  either acknowledged frames we never sent or rewound a previous
    ///  acknowledgement.
    #[error("position {position} is outside the retained range [{local_ack}, {send_position}]")]
    PositionOutOfRange {
        position: u64,
        local_ack: u64,
        send_position: u64,
    },

    /// Positions must coincide with frame boundaries; a peer acknowledging
    ///  half a frame violates the protocol.
    #[error("position {position} does not fall on a frame boundary")]
    PositionNotOnFrameBoundary { position: u64 },

    /// The peer wants to restart its outbound stream beyond what we have
    ///  received; the gap in between is lost for good and the session cannot
    ///  be resumed.
    #[error("peer resumes sending at position {position} but only {implied_position} bytes were received")]
    UnresumablePosition {
        position: u64,
        implied_position: u64,
    },
}

/// One event of a replay subscription.
#[derive(Debug)]
pub enum ReplayEvent {
    /// The next outbound frame - replayed from the log or arriving live.
    Frame(Frame),
    /// A newer subscription took over; this one must stop silently.
    Superseded,
    /// The store was disposed underneath the connection.
    Closed,
}

/// A replay subscription as handed out by
///  [ResumableFramesStore::resume_stream]: first every retained frame in
///  `[local ack, send position)` in append order, then live frames as they are
///  saved, with no gap and no overlap between the two phases.
#[async_trait]
pub trait ReplayStream: Send {
    async fn next(&mut self) -> Result<ReplayEvent, StoreError>;
}

/// The durable side of resumption: an append-only log of outbound resumable
///  frames with acknowledgement-based pruning, plus the position bookkeeping
///  for inbound duplicate detection.
///
/// Implementations must keep strict append order, advance positions
///  monotonically, release each pruned frame's buffer exactly once, and never
///  let a concurrent appender and replayer observe out-of-order offsets.
#[cfg_attr(test, automock)]
pub trait ResumableFramesStore: Send + Sync + 'static {
    /// Records an outbound frame. Resumable frames are appended to the log,
    ///  advancing the send position by their length. Connection frames
    ///  (stream id 0) are forwarded to the live replay subscription without
    ///  being recorded, jumping ahead of log entries not yet replayed.
    fn save_frame(&self, frame: Frame) -> Result<(), StoreError>;

    /// Opens a replay subscription, superseding any previous one. The store
    ///  stays open for appends while subscriptions come and go - one per
    ///  transport attachment for the lifetime of the session.
    fn resume_stream(&self) -> Box<dyn ReplayStream>;

    /// Admission decision for an inbound resumable frame: `true` advances the
    ///  implied position (first delivery, forward it to the session), `false`
    ///  marks a replayed duplicate the session has already seen.
    fn resumable_frame_received(&self, frame: &Frame) -> bool;

    /// Peer acknowledgement: advances the local ack position to
    ///  `remote_position` and releases every retained frame below it.
    fn release_frames(&self, remote_position: u64) -> Result<(), StoreError>;

    /// Declares where the peer restarts its outbound stream on a fresh
    ///  transport, as negotiated by the resume handshake. Inbound positions
    ///  are counted from here; frames at or below the implied position are
    ///  then dropped as duplicates.
    fn peer_replay_from(&self, position: u64) -> Result<(), StoreError>;

    /// Position of the first retained frame: everything before it has been
    ///  acknowledged by the peer and pruned.
    fn frame_position(&self) -> u64;

    /// Total bytes of resumable frames admitted from the peer. This is the
    ///  position reported back to the peer in acknowledgements.
    fn frame_implied_position(&self) -> u64;

    /// Releases every retained frame and fails future saves. Live replay
    ///  subscriptions observe [ReplayEvent::Closed]. Idempotent.
    fn dispose(&self);
}
