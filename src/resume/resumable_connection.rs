use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::connection::{ConnectionSide, DuplexConnection};
use crate::error::{CloseCause, RSocketError};
use crate::frame::{Frame, CONNECTION_STREAM_ID};
use crate::resume::frames_store::{ReplayEvent, ReplayStream, ResumableFramesStore};
use crate::resume::receiving::FrameReceiver;
use crate::resume::send_queue::SendQueue;
use crate::resume::token::ResumeToken;

/// Subscription and wiring lifecycle: the session subscribes to the receive
///  stream, then issues its first demand, and only then is a transport wired.
///  Nothing may flow from a transport before the session is ready to consume
///  it, or the first inbound frames would be dropped on the floor.
const STATE_CREATED: u8 = 0;
const STATE_SUBSCRIBED: u8 = 1;
const STATE_WIRED: u8 = 2;

/// A duplex connection that survives the loss of its transport.
///
/// The session above sees one stable frame channel for its whole lifetime.
///  Underneath, transports are swapped in via [ResumableDuplexConnection::connect]
///  whenever the previous one is lost: outbound resumable frames are recorded
///  in a [ResumableFramesStore] until the peer acknowledges them and are
///  replayed to each successor transport, while inbound frames run through a
///  duplicate filter so the session sees every frame exactly once no matter
///  how often the peer resends.
///
/// The handle is cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ResumableDuplexConnection {
    shared: Arc<ConnectionShared>,
}

struct ConnectionShared {
    side: ConnectionSide,
    token: ResumeToken,
    store: Arc<dyn ResumableFramesStore>,
    send_queue: SendQueue,
    state: AtomicU8,
    /// counts transport attachments; the value is published on the
    ///  connection-closed stream when the corresponding transport goes away
    connection_index: AtomicU32,
    active: Mutex<ActiveConnection>,
    attachment: Mutex<Option<Attachment>>,
    session_tx: mpsc::UnboundedSender<Frame>,
    session_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    connection_closed_tx: Mutex<Option<mpsc::UnboundedSender<u32>>>,
    connection_closed_rx: Mutex<Option<mpsc::UnboundedReceiver<u32>>>,
    close_tx: watch::Sender<Option<Result<(), CloseCause>>>,
    close_rx: watch::Receiver<Option<Result<(), CloseCause>>>,
}

/// The active-connection pointer. Exactly one exists per resumable connection,
///  and once it is `Disposed` no other value ever replaces it - that is what
///  makes concurrent connect/dispose races resolve cleanly.
enum ActiveConnection {
    Live {
        connection: Arc<dyn DuplexConnection>,
        /// set once the per-attachment tasks for this transport exist; guards
        ///  against wiring the same transport twice when a reconnect races the
        ///  session's first demand
        wired: bool,
    },
    Disposed,
}

/// The tasks serving one transport attachment. The inbound receiver and the
///  replay pump die with their transport; the close watcher outlives them just
///  long enough to report the loss.
struct Attachment {
    inbound: Option<JoinHandle<()>>,
    replay: JoinHandle<()>,
    close_watch: JoinHandle<()>,
}

impl Attachment {
    fn abort(&self) {
        if let Some(inbound) = &self.inbound {
            inbound.abort();
        }
        self.replay.abort();
        self.close_watch.abort();
    }
}

impl ResumableDuplexConnection {
    /// Creates the connection on top of `initial_connection`, which must be
    ///  freshly attached and untouched. The store is expected to be started
    ///  already and to outlive the connection; it is shared with the session
    ///  layer, which feeds peer acknowledgements into it.
    ///
    /// The initial transport is not wired here - that happens on the session's
    ///  first demand, see [ResumableDuplexConnection::receive]. Must be called
    ///  from within a tokio runtime.
    pub fn new(
        side: ConnectionSide,
        token: ResumeToken,
        initial_connection: Arc<dyn DuplexConnection>,
        store: Arc<dyn ResumableFramesStore>,
    ) -> ResumableDuplexConnection {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (connection_closed_tx, connection_closed_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(None);

        let connection = ResumableDuplexConnection {
            shared: Arc::new(ConnectionShared {
                side,
                token,
                store,
                send_queue: SendQueue::new(),
                state: AtomicU8::new(STATE_CREATED),
                connection_index: AtomicU32::new(0),
                active: Mutex::new(ActiveConnection::Live {
                    connection: initial_connection,
                    wired: false,
                }),
                attachment: Mutex::new(None),
                session_tx,
                session_rx: Mutex::new(Some(session_rx)),
                connection_closed_tx: Mutex::new(Some(connection_closed_tx)),
                connection_closed_rx: Mutex::new(Some(connection_closed_rx)),
                close_tx,
                close_rx,
            }),
        };

        // the frame saver drains the send queue into the store for the
        // lifetime of the connection; it ends when the queue is disposed
        let saver = connection.clone();
        tokio::spawn(async move { saver.run_frame_saver().await });

        connection
    }

    /// Enqueues a frame for the peer. Never blocks, never fails; after the
    ///  connection is disposed the frame is silently dropped. Connection
    ///  frames (stream id 0) overtake every frame not yet handed to a
    ///  transport - keepalives and errors must not wait behind a replay.
    pub fn send_frame(&self, stream_id: u32, frame: Frame) {
        if stream_id == CONNECTION_STREAM_ID {
            self.shared.send_queue.push_priority(frame);
        } else {
            self.shared.send_queue.push(frame);
        }
    }

    /// The session-facing inbound stream. The first call hands it out and
    ///  every later call returns `None` - there is exactly one consumer. No
    ///  transport is wired, and hence no frame flows anywhere, until the
    ///  session issues its first demand on the returned stream.
    pub fn receive(&self) -> Option<SessionFrames> {
        if self
            .shared
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_SUBSCRIBED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return None;
        }

        let receiver = self
            .shared
            .session_rx
            .lock()
            .unwrap()
            .take()
            .expect("session receiver is present until the first subscription");
        Some(SessionFrames {
            receiver,
            connection: self.clone(),
        })
    }

    /// Swaps the active transport for `next`: the previous transport is
    ///  disposed, a fresh inbound receiver is attached, and the store's replay
    ///  stream starts feeding `next` everything the peer has not acknowledged
    ///  yet, in original send order, before any newly submitted frame.
    ///
    /// Returns `false` if the connection is already disposed; `next` is then
    ///  left untouched for the caller to clean up.
    pub fn connect(&self, next: Arc<dyn DuplexConnection>) -> bool {
        let previous = {
            let mut active = self.shared.active.lock().unwrap();
            if matches!(&*active, ActiveConnection::Disposed) {
                return false;
            }
            std::mem::replace(
                &mut *active,
                ActiveConnection::Live {
                    connection: next,
                    wired: false,
                },
            )
        };
        if let ActiveConnection::Live { connection, .. } = previous {
            connection.dispose();
        }

        match self.try_begin_wiring() {
            Some(connection) => self.init_connection(connection),
            None => debug!(side = %self.shared.side, session = ?self.shared.token,
                "transport attached before the session's first demand - wiring deferred"),
        }
        true
    }

    /// Disposes the current transport without giving up on the session: the
    ///  active-connection pointer stays live and a successor is expected via
    ///  [ResumableDuplexConnection::connect]. No-op once disposed.
    pub fn disconnect(&self) {
        let connection = match &*self.shared.active.lock().unwrap() {
            ActiveConnection::Live { connection, .. } => Some(connection.clone()),
            ActiveConnection::Disposed => None,
        };
        if let Some(connection) = connection {
            connection.dispose();
        }
    }

    /// Sends `error` to the peer on the active transport, waits for that
    ///  transport to finish closing, and tears the connection down for good.
    ///  [ResumableDuplexConnection::closed] resolves with the error's cause if
    ///  it has one, normally otherwise. No-op once disposed.
    pub async fn send_error_and_close(&self, error: RSocketError) {
        let previous = match self.take_active() {
            Some(previous) => previous,
            None => return,
        };
        debug!(side = %self.shared.side, session = ?self.shared.token,
            "closing with error: {}", error);

        let cause = error.cause().cloned();
        previous.send_error_and_close(error);
        previous.closed().await;

        self.teardown(cause);
    }

    /// Terminal teardown without an error frame. Idempotent.
    pub fn dispose(&self) {
        self.dispose_with(None);
    }

    fn dispose_with(&self, cause: Option<CloseCause>) {
        let previous = match self.take_active() {
            Some(previous) => previous,
            None => return,
        };
        previous.dispose();

        debug!(side = %self.shared.side, session = ?self.shared.token,
            connection = self.shared.connection_index.load(Ordering::Relaxed), "disposing");
        self.teardown(cause);
    }

    /// Resolves when the connection is terminally closed - with the cause if
    ///  it closed abnormally.
    pub async fn closed(&self) -> Result<(), CloseCause> {
        let mut close_rx = self.shared.close_rx.clone();
        let outcome = close_rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .expect("the close sender lives as long as the connection");
        outcome
            .clone()
            .expect("the predicate only accepts a published outcome")
    }

    pub fn is_disposed(&self) -> bool {
        matches!(&*self.shared.active.lock().unwrap(), ActiveConnection::Disposed)
    }

    /// Address of the peer on the currently active transport, `None` once
    ///  disposed.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        match &*self.shared.active.lock().unwrap() {
            ActiveConnection::Live { connection, .. } => connection.remote_address(),
            ActiveConnection::Disposed => None,
        }
    }

    pub fn side(&self) -> ConnectionSide {
        self.shared.side
    }

    pub fn token(&self) -> &ResumeToken {
        &self.shared.token
    }

    /// Stream of attachment indices, starting at 1, one per active transport
    ///  that closed. It never yields errors and ends when the connection is
    ///  disposed. Reconnect drivers listen on this to decide whether to
    ///  establish a successor transport. Can be taken once.
    pub fn on_active_connection_closed(&self) -> Option<mpsc::UnboundedReceiver<u32>> {
        self.shared.connection_closed_rx.lock().unwrap().take()
    }

    /// Swaps the active-connection pointer to `Disposed`, returning the live
    ///  transport if this call was the one that won the terminal transition.
    fn take_active(&self) -> Option<Arc<dyn DuplexConnection>> {
        let mut active = self.shared.active.lock().unwrap();
        match std::mem::replace(&mut *active, ActiveConnection::Disposed) {
            ActiveConnection::Live { connection, .. } => Some(connection),
            ActiveConnection::Disposed => None,
        }
    }

    /// Claims the wiring of the currently active transport, if the session has
    ///  demanded frames and nobody wired this transport yet. The flag lives
    ///  inside the pointer slot, so a concurrent connect and first-demand race
    ///  wires the transport exactly once.
    fn try_begin_wiring(&self) -> Option<Arc<dyn DuplexConnection>> {
        if self.shared.state.load(Ordering::Acquire) != STATE_WIRED {
            return None;
        }
        let mut active = self.shared.active.lock().unwrap();
        match &mut *active {
            ActiveConnection::Live { connection, wired } if !*wired => {
                *wired = true;
                Some(connection.clone())
            }
            _ => None,
        }
    }

    /// First demand from the session: moves to the wired state and attaches
    ///  whatever transport is active at that point.
    fn on_session_demand(&self) {
        if self.shared.state.load(Ordering::Acquire) == STATE_SUBSCRIBED
            && self
                .shared
                .state
                .compare_exchange(
                    STATE_SUBSCRIBED,
                    STATE_WIRED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            if let Some(connection) = self.try_begin_wiring() {
                self.init_connection(connection);
            }
        }
    }

    /// Creates the per-attachment tasks for `connection`: the inbound frame
    ///  receiver, the replay pump feeding it from the store, and the watcher
    ///  that reports the transport's eventual death.
    fn init_connection(&self, connection: Arc<dyn DuplexConnection>) {
        let index = self.shared.connection_index.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(side = %self.shared.side, session = ?self.shared.token, connection = index,
            "connecting");

        let inbound = match connection.receive() {
            Some(inbound_rx) => {
                let receiver =
                    FrameReceiver::new(self.shared.store.clone(), self.shared.session_tx.clone());
                Some(tokio::spawn(receiver.run(inbound_rx)))
            }
            None => {
                warn!(side = %self.shared.side, session = ?self.shared.token, connection = index,
                    "the transport's receive stream was already taken - inbound frames will not flow");
                None
            }
        };

        let replay = {
            let stream = self.shared.store.resume_stream();
            let this = self.clone();
            let transport = connection.clone();
            tokio::spawn(async move { this.run_replay(stream, transport).await })
        };

        let close_watch = {
            let side = self.shared.side;
            let token = self.shared.token.clone();
            let transport = connection;
            let closed_tx = self.shared.connection_closed_tx.lock().unwrap().clone();
            let inbound_abort = inbound.as_ref().map(|handle| handle.abort_handle());
            let replay_abort = replay.abort_handle();
            tokio::spawn(async move {
                transport.closed().await;
                // the attachment dies with its transport; the session-level
                // machinery lives on and waits for a successor
                if let Some(inbound_abort) = inbound_abort {
                    inbound_abort.abort();
                }
                replay_abort.abort();
                debug!(side = %side, session = ?token, connection = index, "disconnected");

                if let Some(closed_tx) = closed_tx {
                    if closed_tx.send(index).is_err() {
                        debug!(side = %side, session = ?token, connection = index,
                            "nobody listens for closed connections any more");
                    }
                }
            })
        };

        let previous = self.shared.attachment.lock().unwrap().replace(Attachment {
            inbound,
            replay,
            close_watch,
        });
        if let Some(previous) = previous {
            // the predecessor's transport was disposed before this attachment
            // was created, so its pumps are already winding down; reap
            // whatever is left except the watcher, which still has a loss to
            // report
            if let Some(inbound) = &previous.inbound {
                inbound.abort();
            }
            previous.replay.abort();
        }
    }

    /// Pumps the store's replay subscription into one transport. Ends silently
    ///  when a newer attachment supersedes the subscription; everything else
    ///  the stream can report is terminal for the whole connection, because
    ///  the store is supposed to outlive it.
    async fn run_replay(
        self,
        mut stream: Box<dyn ReplayStream>,
        transport: Arc<dyn DuplexConnection>,
    ) {
        loop {
            match stream.next().await {
                Ok(ReplayEvent::Frame(frame)) => {
                    transport.send_frame(frame.stream_id(), frame);
                }
                Ok(ReplayEvent::Superseded) => break,
                Ok(ReplayEvent::Closed) => {
                    self.send_error_and_close(RSocketError::connection_close(
                        "Connection Closed Unexpectedly",
                    ))
                    .await;
                    break;
                }
                Err(e) => {
                    self.send_error_and_close(RSocketError::connection_error(e.to_string()))
                        .await;
                    break;
                }
            }
        }
    }

    async fn run_frame_saver(self) {
        while let Some(frame) = self.shared.send_queue.pop().await {
            if let Err(e) = self.shared.store.save_frame(frame) {
                error!(side = %self.shared.side, session = ?self.shared.token,
                    "recording an outbound frame failed, closing: {}", e);
                self.dispose_with(Some(Arc::new(e)));
                break;
            }
        }
    }

    /// Releases everything the connection owns and publishes the terminal
    ///  outcome. Runs at most once - callers hold the win of the pointer swap.
    fn teardown(&self, cause: Option<CloseCause>) {
        if let Some(attachment) = self.shared.attachment.lock().unwrap().take() {
            attachment.abort();
        }
        self.shared.send_queue.dispose();
        // dropping the sender completes the connection-closed stream
        self.shared.connection_closed_tx.lock().unwrap().take();

        let outcome = match cause {
            Some(cause) => Err(cause),
            None => Ok(()),
        };
        self.shared.close_tx.send_replace(Some(outcome));
    }
}

/// The inbound frame stream handed to the session, at most one per connection.
///
/// The first [SessionFrames::recv] is the session's initial demand: it wires
///  the active transport, so no frame can flow before the session is ready to
///  consume it. Dropping the stream cancels the session's subscription, which
///  disposes the whole resumable connection.
pub struct SessionFrames {
    receiver: mpsc::UnboundedReceiver<Frame>,
    connection: ResumableDuplexConnection,
}

impl SessionFrames {
    /// The next inbound frame, or `None` once the connection is disposed and
    ///  drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.connection.on_session_demand();
        self.receiver.recv().await
    }

    /// Non-blocking variant of [SessionFrames::recv]. Like `recv`, the first
    ///  call counts as the session's initial demand and wires the transport.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.connection.on_session_demand();
        self.receiver.try_recv().ok()
    }
}

impl Drop for SessionFrames {
    fn drop(&mut self) {
        // cancelling the session's subscription disposes the connection
        self.connection.dispose();
    }
}
