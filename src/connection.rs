use std::fmt::{Display, Formatter};
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RSocketError;
use crate::frame::Frame;

/// Which role this endpoint plays in the session. Resumption is driven by the
///  client - it initiates reconnects while the server merely accepts them - but
///  the connection machinery itself is identical on both sides and uses the
///  side for logging only.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionSide {
    Client,
    Server,
}

impl Display for ConnectionSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionSide::Client => write!(f, "client"),
            ConnectionSide::Server => write!(f, "server"),
        }
    }
}

/// The seam between the resumption layer and a concrete transport (TCP,
///  WebSocket, in-memory pipe). A duplex connection moves whole frames in both
///  directions; length framing, TLS and socket lifecycle are the transport
///  implementation's business.
///
/// It is passed around as an `Arc<dyn DuplexConnection>` to keep transport
///  implementations decoupled from the machinery sitting on top of them.
#[async_trait]
pub trait DuplexConnection: Send + Sync + 'static {
    /// Hands a frame to the transport for delivery. Fire and forget: delivery
    ///  failures surface through [DuplexConnection::closed], never through
    ///  this call.
    fn send_frame(&self, stream_id: u32, frame: Frame);

    /// The inbound frame stream, yielding frames in arrival order and ending
    ///  when the transport is lost or disposed. It can be taken at most once;
    ///  later calls return `None`.
    fn receive(&self) -> Option<mpsc::UnboundedReceiver<Frame>>;

    /// Resolves once the transport is fully torn down - by
    ///  [DuplexConnection::dispose], by an error or by the peer going away.
    async fn closed(&self);

    /// Idempotent close.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;

    /// Emits the protocol's ERROR frame for `error`, then closes.
    fn send_error_and_close(&self, error: RSocketError);

    fn remote_address(&self) -> Option<SocketAddr>;
}
