use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

/// The state of a record in the shared store, as seen by the coordinator.
///
/// The store itself only holds bytes. Every record written by the coordinator starts with a
/// one-byte tag, so a payload can never be mistaken for a placeholder, whatever it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEntry {
    /// No record exists, or the record could not be decoded.
    Absent,
    /// A worker claims to be computing this entry since the given time.
    Placeholder { since: SystemTime },
    /// The final formatted value.
    Ready(Bytes),
}

impl StoredEntry {
    pub(super) const PLACEHOLDER_TAG: u8 = b'P';
    pub(super) const READY_TAG: u8 = b'R';

    /// Encodes a placeholder record stamped with `since`.
    pub fn encode_placeholder(since: SystemTime) -> Bytes {
        let millis = since
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut buf = BytesMut::with_capacity(9);
        buf.put_u8(Self::PLACEHOLDER_TAG);
        buf.put_u64(millis);
        buf.freeze()
    }

    /// Encodes a ready record holding `payload`.
    pub fn encode_ready(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(payload.len() + 1);
        buf.put_u8(Self::READY_TAG);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Decodes a raw record as returned by the shared store.
    ///
    /// Records that do not carry a known tag are logged and reported as [`StoredEntry::Absent`],
    /// so that the next computation overwrites them.
    pub fn decode(raw: Option<Bytes>) -> Self {
        let Some(raw) = raw else {
            return Self::Absent;
        };
        match raw.first().copied() {
            Some(Self::READY_TAG) => Self::Ready(raw.slice(1..)),
            Some(Self::PLACEHOLDER_TAG) => match <[u8; 8]>::try_from(&raw[1..]) {
                Ok(millis) => Self::Placeholder {
                    since: UNIX_EPOCH + Duration::from_millis(u64::from_be_bytes(millis)),
                },
                Err(_) => {
                    tracing::error!(len = raw.len(), "Malformed placeholder record");
                    Self::Absent
                }
            },
            tag => {
                tracing::error!(?tag, len = raw.len(), "Unknown cache record tag");
                Self::Absent
            }
        }
    }

    /// Returns how long ago the placeholder was written, relative to `now`.
    ///
    /// Returns `None` for anything but a placeholder. A placeholder stamped in the future (clock
    /// skew between workers) has an age of zero.
    pub fn placeholder_age(&self, now: SystemTime) -> Option<Duration> {
        match self {
            Self::Placeholder { since } => Some(now.duration_since(*since).unwrap_or_default()),
            _ => None,
        }
    }

    /// Short name of the state, used in logs and metric tags.
    pub fn state(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Placeholder { .. } => "placeholder",
            Self::Ready(_) => "ready",
        }
    }
}
