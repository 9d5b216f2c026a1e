use std::fmt::{Debug, Formatter};

use bytes::Bytes;
use uuid::Uuid;

/// The opaque token identifying a resumable session. The client generates it
///  for the SETUP frame and repeats it in every RESUME frame, which is how the
///  server correlates a freshly accepted transport with the session it
///  continues. This layer never interprets the bytes, it only logs them.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ResumeToken {
    bytes: Bytes,
}

impl ResumeToken {
    pub fn new(bytes: Bytes) -> ResumeToken {
        ResumeToken { bytes }
    }

    /// 16 random bytes, the format the reference client generates by default.
    pub fn random() -> ResumeToken {
        ResumeToken {
            bytes: Bytes::copy_from_slice(Uuid::new_v4().as_bytes()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Debug for ResumeToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in self.bytes.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_random_tokens_are_unique_and_sixteen_bytes() {
        let a = ResumeToken::random();
        let b = ResumeToken::random();
        assert_eq!(a.len(), 16);
        assert_eq!(b.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_is_lowercase_hex() {
        let token = ResumeToken::new(Bytes::from_static(&[0x00, 0xab, 0xff]));
        assert_eq!(format!("{:?}", token), "00abff");
    }
}
