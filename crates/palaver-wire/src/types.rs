//! Wire types shared by the codec and the session layer above it.

use std::fmt;

/// Message kind, carried as the first element of every frame body.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    /// A request expecting exactly one response.
    Call = 0,
    /// The response to an earlier call.
    Response = 1,
    /// Fire-and-forget; no response is ever sent.
    Notify = 2,
    /// Ask the remote to abort an in-flight served call.
    Cancel = 3,
}

impl MethodType {
    /// Interpret a decoded wire integer as a method type.
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(MethodType::Call),
            1 => Some(MethodType::Response),
            2 => Some(MethodType::Notify),
            3 => Some(MethodType::Cancel),
            _ => None,
        }
    }

    /// The wire representation of this method type.
    pub const fn raw(self) -> i64 {
        self as i64
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodType::Call => "call",
            MethodType::Response => "response",
            MethodType::Notify => "notify",
            MethodType::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Sequence number identifying one outstanding call on a connection.
///
/// Seqids are allocated monotonically starting at 0 and are never reused
/// within a connection. Notifies have no reply and carry [`SeqId::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SeqId(pub i64);

impl SeqId {
    /// Sentinel for messages that have no reply (notifies).
    pub const NONE: Self = Self(-1);

    /// Create a new seqid.
    pub const fn new(v: i64) -> Self {
        Self(v)
    }

    /// Get the raw i64 value.
    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl From<i64> for SeqId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl From<SeqId> for i64 {
    fn from(s: SeqId) -> Self {
        s.0
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_type_round_trips_through_wire_integers() {
        for ty in [
            MethodType::Call,
            MethodType::Response,
            MethodType::Notify,
            MethodType::Cancel,
        ] {
            assert_eq!(MethodType::from_i64(ty.raw()), Some(ty));
        }
        assert_eq!(MethodType::from_i64(4), None);
        assert_eq!(MethodType::from_i64(-1), None);
    }

    #[test]
    fn seqid_none_is_negative_one() {
        assert_eq!(SeqId::NONE.raw(), -1);
        assert_eq!(SeqId::new(7), SeqId::from(7));
    }
}
