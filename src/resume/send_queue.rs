use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::frame::Frame;

/// Unbounded handoff between `send_frame` callers and the frame saver task,
///  with a fast lane for connection frames: keepalives and error frames must
///  not queue behind application frames that are waiting to be recorded.
///
/// Pushing never blocks and never fails, matching the send contract of the
///  connection. A single consumer drains the queue; once disposed, queued
///  frames are dropped and every later push is a no-op.
pub(crate) struct SendQueue {
    inner: Mutex<SendQueueInner>,
    wakeup: Notify,
}

struct SendQueueInner {
    priority: VecDeque<Frame>,
    regular: VecDeque<Frame>,
    disposed: bool,
}

impl SendQueue {
    pub fn new() -> SendQueue {
        SendQueue {
            inner: Mutex::new(SendQueueInner {
                priority: VecDeque::new(),
                regular: VecDeque::new(),
                disposed: false,
            }),
            wakeup: Notify::new(),
        }
    }

    /// Regular lane, drained in submission order.
    pub fn push(&self, frame: Frame) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.disposed {
                return;
            }
            inner.regular.push_back(frame);
        }
        self.wakeup.notify_one();
    }

    /// Fast lane: overtakes every regular frame not yet handed to the
    ///  consumer, but keeps submission order among priority frames.
    pub fn push_priority(&self, frame: Frame) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.disposed {
                return;
            }
            inner.priority.push_back(frame);
        }
        self.wakeup.notify_one();
    }

    /// The next frame in priority-then-fifo order, or `None` once the queue
    ///  is disposed.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.disposed {
                    return None;
                }
                if let Some(frame) = inner.priority.pop_front() {
                    return Some(frame);
                }
                if let Some(frame) = inner.regular.pop_front() {
                    return Some(frame);
                }
            }
            self.wakeup.notified().await;
        }
    }

    /// Drops all queued frames, releasing their buffers, and turns every
    ///  later push into a no-op. Idempotent.
    pub fn dispose(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.disposed = true;
            inner.priority.clear();
            inner.regular.clear();
        }
        self.wakeup.notify_one();
    }
}
