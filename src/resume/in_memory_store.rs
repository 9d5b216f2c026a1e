use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::config::ResumeConfig;
use crate::connection::ConnectionSide;
use crate::frame::Frame;
use crate::resume::frames_store::{ReplayEvent, ReplayStream, ResumableFramesStore, StoreError};
use crate::resume::token::ResumeToken;

/// Keeps the resumable frames of one session in main memory.
///
/// The log holds every resumable frame in `[local ack, send position)` and
///  nothing else: frames enter when they are saved and leave when the peer's
///  acknowledgement passes their end offset. The bound from
///  [ResumeConfig::cache_limit_bytes] caps what a non-acknowledging peer can
///  make us retain; crossing it latches the store as failed, which terminates
///  the connection on its next save or replay step.
pub struct InMemoryResumableFramesStore {
    shared: Arc<StoreShared>,
}

struct StoreShared {
    side: ConnectionSide,
    token: ResumeToken,
    cache_limit: usize,
    state: Mutex<StoreState>,
    /// Wakes replay subscriptions. `notify_waiters` plus re-checking under the
    ///  lock, with the waiter registered before the check, avoids missed
    ///  wakeups without handing out permits.
    wakeup: Notify,
}

struct StoreState {
    /// retained resumable frames, each with the stream position of its first byte
    log: VecDeque<(u64, Frame)>,
    retained_bytes: usize,
    /// position of the first retained byte, i.e. the peer-acknowledged prefix
    local_ack: u64,
    send_position: u64,
    /// bytes of inbound resumable frames admitted to the session
    implied_position: u64,
    /// position of the next inbound resumable byte on the current transport
    receive_cursor: u64,
    /// connection frames awaiting the live replay subscription; never recorded
    connection_frames: VecDeque<Frame>,
    /// bumped per subscription; stale subscriptions observe the change and stop
    epoch: u64,
    failure: Option<StoreError>,
    disposed: bool,
}

impl InMemoryResumableFramesStore {
    pub fn new(side: ConnectionSide, token: ResumeToken, config: &ResumeConfig) -> InMemoryResumableFramesStore {
        InMemoryResumableFramesStore {
            shared: Arc::new(StoreShared {
                side,
                token,
                cache_limit: config.cache_limit_bytes,
                state: Mutex::new(StoreState {
                    log: VecDeque::new(),
                    retained_bytes: 0,
                    local_ack: 0,
                    send_position: 0,
                    implied_position: 0,
                    receive_cursor: 0,
                    connection_frames: VecDeque::new(),
                    epoch: 0,
                    failure: None,
                    disposed: false,
                }),
                wakeup: Notify::new(),
            }),
        }
    }

    #[cfg(test)]
    fn retained_bytes(&self) -> usize {
        self.shared.state.lock().unwrap().retained_bytes
    }
}

impl ResumableFramesStore for InMemoryResumableFramesStore {
    fn save_frame(&self, frame: Frame) -> Result<(), StoreError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.disposed {
                return Err(StoreError::Closed);
            }
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }

            if !frame.is_resumable() {
                trace!(side = %self.shared.side, session = ?self.shared.token,
                    "forwarding connection frame without recording it");
                state.connection_frames.push_back(frame);
            } else {
                let len = frame.len();
                if state.retained_bytes + len > self.shared.cache_limit {
                    let failure = StoreError::CacheOverflow {
                        limit: self.shared.cache_limit,
                    };
                    warn!(side = %self.shared.side, session = ?self.shared.token,
                        "dropping frame and failing the store: {}", failure);
                    state.failure = Some(failure.clone());
                    drop(state);
                    self.shared.wakeup.notify_waiters();
                    return Err(failure);
                }

                let position = state.send_position;
                trace!(side = %self.shared.side, session = ?self.shared.token, position, len,
                    "recording resumable frame");
                state.log.push_back((position, frame));
                state.retained_bytes += len;
                state.send_position += len as u64;
            }
        }
        self.shared.wakeup.notify_waiters();
        Ok(())
    }

    fn resume_stream(&self) -> Box<dyn ReplayStream> {
        let (epoch, next_position) = {
            let mut state = self.shared.state.lock().unwrap();
            state.epoch += 1;
            (state.epoch, state.local_ack)
        };
        debug!(side = %self.shared.side, session = ?self.shared.token, from = next_position,
            "opening replay subscription");
        // ends a superseded subscription that is currently waiting
        self.shared.wakeup.notify_waiters();

        Box::new(InMemoryReplayStream {
            shared: self.shared.clone(),
            epoch,
            next_position,
        })
    }

    fn resumable_frame_received(&self, frame: &Frame) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if state.disposed {
            return false;
        }

        let start = state.receive_cursor;
        let end = start + frame.len() as u64;
        state.receive_cursor = end;

        if end > state.implied_position {
            if start < state.implied_position {
                // the peer restarted inside a frame we already admitted; that
                // is a protocol violation, but dropping the frame would lose
                // the bytes past the implied position for good
                warn!(side = %self.shared.side, session = ?self.shared.token, start,
                    implied_position = state.implied_position,
                    "inbound frame straddles the implied position - admitting it");
            }
            state.implied_position = end;
            true
        } else {
            trace!(side = %self.shared.side, session = ?self.shared.token, start, end,
                "dropping replayed duplicate");
            false
        }
    }

    fn release_frames(&self, remote_position: u64) -> Result<(), StoreError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.disposed {
            return Err(StoreError::Closed);
        }

        if remote_position < state.local_ack || remote_position > state.send_position {
            return Err(StoreError::PositionOutOfRange {
                position: remote_position,
                local_ack: state.local_ack,
                send_position: state.send_position,
            });
        }
        let on_boundary = remote_position == state.local_ack
            || remote_position == state.send_position
            || frame_index_at(&state.log, remote_position).is_some();
        if !on_boundary {
            return Err(StoreError::PositionNotOnFrameBoundary {
                position: remote_position,
            });
        }

        while let Some((position, frame)) = state.log.front() {
            if position + frame.len() as u64 > remote_position {
                break;
            }
            let len = frame.len();
            state.log.pop_front(); // dropping the frame releases its buffer
            state.retained_bytes -= len;
        }
        state.local_ack = remote_position;

        debug!(side = %self.shared.side, session = ?self.shared.token,
            local_ack = state.local_ack, retained_bytes = state.retained_bytes,
            "released acknowledged frames");
        Ok(())
    }

    fn peer_replay_from(&self, position: u64) -> Result<(), StoreError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.disposed {
            return Err(StoreError::Closed);
        }
        if position > state.implied_position {
            return Err(StoreError::UnresumablePosition {
                position,
                implied_position: state.implied_position,
            });
        }

        debug!(side = %self.shared.side, session = ?self.shared.token, position,
            implied_position = state.implied_position, "peer restarts its stream");
        state.receive_cursor = position;
        Ok(())
    }

    fn frame_position(&self) -> u64 {
        self.shared.state.lock().unwrap().local_ack
    }

    fn frame_implied_position(&self) -> u64 {
        self.shared.state.lock().unwrap().implied_position
    }

    fn dispose(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.disposed {
                return;
            }
            debug!(side = %self.shared.side, session = ?self.shared.token,
                retained_bytes = state.retained_bytes, "disposing frames store");
            state.disposed = true;
            state.log.clear();
            state.retained_bytes = 0;
            state.connection_frames.clear();
        }
        self.shared.wakeup.notify_waiters();
    }
}

struct InMemoryReplayStream {
    shared: Arc<StoreShared>,
    epoch: u64,
    next_position: u64,
}

#[async_trait]
impl ReplayStream for InMemoryReplayStream {
    async fn next(&mut self) -> Result<ReplayEvent, StoreError> {
        loop {
            let wakeup = self.shared.wakeup.notified();
            {
                let mut state = self.shared.state.lock().unwrap();
                if state.epoch != self.epoch {
                    return Ok(ReplayEvent::Superseded);
                }
                if let Some(failure) = &state.failure {
                    return Err(failure.clone());
                }
                if state.disposed {
                    return Ok(ReplayEvent::Closed);
                }
                if let Some(frame) = state.connection_frames.pop_front() {
                    return Ok(ReplayEvent::Frame(frame));
                }

                if self.next_position < state.local_ack {
                    // acknowledged while we were replaying: those frames are
                    // pruned and need no resend
                    self.next_position = state.local_ack;
                }
                if self.next_position < state.send_position {
                    let index = frame_index_at(&state.log, self.next_position)
                        .expect("replay positions always coincide with a retained frame start");
                    let (start, frame) = &state.log[index];
                    self.next_position = start + frame.len() as u64;
                    return Ok(ReplayEvent::Frame(frame.clone()));
                }
            }
            wakeup.await;
        }
    }
}

/// Index of the retained frame starting exactly at `position`. The log is
///  sorted by position, so this is a plain binary search.
fn frame_index_at(log: &VecDeque<(u64, Frame)>, position: u64) -> Option<usize> {
    let mut lo = 0;
    let mut hi = log.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if log[mid].0 < position {
            lo = mid + 1;
        } else if log[mid].0 > position {
            hi = mid;
        } else {
            return Some(mid);
        }
    }
    None
}
