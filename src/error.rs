use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// What a terminally closed connection reports as its reason. Shared because
///  several observers (the session's close future, logging, tests) may hold on
///  to it concurrently.
pub type CloseCause = Arc<dyn std::error::Error + Send + Sync>;

/// The error kinds of the protocol's ERROR frame that this layer raises or
///  forwards, together with their wire codes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RSocketErrorKind {
    /// The connection is broken and cannot be resumed.
    ConnectionError,
    /// The connection is being shut down deliberately.
    ConnectionClose,
    ApplicationError,
    Rejected,
    Canceled,
    Invalid,
}

impl RSocketErrorKind {
    /// The error code as it appears on the wire in an ERROR frame on stream 0.
    pub fn code(&self) -> u32 {
        match self {
            RSocketErrorKind::ConnectionError => 0x0101,
            RSocketErrorKind::ConnectionClose => 0x0102,
            RSocketErrorKind::ApplicationError => 0x0201,
            RSocketErrorKind::Rejected => 0x0202,
            RSocketErrorKind::Canceled => 0x0203,
            RSocketErrorKind::Invalid => 0x0204,
        }
    }
}

/// A protocol-level error, i.e. one that is (or was) visible to the peer as an
///  ERROR frame. The optional cause is for local consumption only - the peer
///  sees nothing but kind and message.
#[derive(Debug, Clone)]
pub struct RSocketError {
    kind: RSocketErrorKind,
    message: String,
    cause: Option<CloseCause>,
}

impl RSocketError {
    pub fn new(kind: RSocketErrorKind, message: impl Into<String>) -> RSocketError {
        RSocketError {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn connection_error(message: impl Into<String>) -> RSocketError {
        RSocketError::new(RSocketErrorKind::ConnectionError, message)
    }

    pub fn connection_close(message: impl Into<String>) -> RSocketError {
        RSocketError::new(RSocketErrorKind::ConnectionClose, message)
    }

    pub fn application_error(message: impl Into<String>) -> RSocketError {
        RSocketError::new(RSocketErrorKind::ApplicationError, message)
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> RSocketError {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn kind(&self) -> RSocketErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The local reason behind this error, if any. A connection that closes
    ///  with a caused error reports the cause - not the error frame - as its
    ///  termination reason.
    pub fn cause(&self) -> Option<&CloseCause> {
        self.cause.as_ref()
    }
}

impl Display for RSocketError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[0x{:04x}] {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for RSocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| &**cause as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::connection_error(RSocketErrorKind::ConnectionError, 0x0101)]
    #[case::connection_close(RSocketErrorKind::ConnectionClose, 0x0102)]
    #[case::application_error(RSocketErrorKind::ApplicationError, 0x0201)]
    #[case::rejected(RSocketErrorKind::Rejected, 0x0202)]
    #[case::canceled(RSocketErrorKind::Canceled, 0x0203)]
    #[case::invalid(RSocketErrorKind::Invalid, 0x0204)]
    fn test_wire_codes(#[case] kind: RSocketErrorKind, #[case] code: u32) {
        assert_eq!(kind.code(), code);
    }

    #[test]
    fn test_display_includes_code_and_message() {
        let error = RSocketError::connection_error("resume failed");
        assert_eq!(error.to_string(), "[0x0101] resume failed");
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let error = RSocketError::application_error("boom").with_cause(io);

        let source = std::error::Error::source(&error).expect("cause should be the source");
        assert_eq!(source.to_string(), "pipe gone");
        assert_eq!(error.cause().unwrap().to_string(), "pipe gone");
    }

    #[test]
    fn test_without_cause_there_is_no_source() {
        let error = RSocketError::connection_close("bye");
        assert!(std::error::Error::source(&error).is_none());
        assert!(error.cause().is_none());
    }
}
