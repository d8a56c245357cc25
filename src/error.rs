use crate::types::{GlobalThreadId, GroupId, PhysicalId};

pub type Result<T> = std::result::Result<T, TesseraError>;

#[derive(Debug, thiserror::Error)]
pub enum TesseraError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connect to node {node} ({addr}) failed: {reason}")]
    ConnectFailed {
        node: PhysicalId,
        addr: String,
        reason: String,
    },

    #[error("connection to node {node} lost")]
    ConnectionLost { node: PhysicalId },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown group {group}")]
    UnknownGroup { group: GroupId },

    #[error("unknown thread {thread}")]
    UnknownThread { thread: GlobalThreadId },

    #[error("no such storage: {storage}")]
    NoSuchStorage { storage: String },

    #[error("no such variable: {storage}.{name}")]
    NoSuchVariable { storage: String, name: String },

    #[error("type mismatch for {storage}.{name}: {detail}")]
    TypeMismatch {
        storage: String,
        name: String,
        detail: String,
    },

    #[error("no function registered for fn_id={fn_id}")]
    UnknownFunction { fn_id: u16 },

    #[error("remote execution failed at thread {thread}: {detail}")]
    UserException {
        thread: GlobalThreadId,
        detail: String,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TesseraError {
    /// Exit code for the launcher binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            TesseraError::Config(_) => 2,
            TesseraError::UserException { .. } => 4,
            _ => 3,
        }
    }
}

/// Failure reported by a remote handler and carried back on a reply message.
///
/// Kind codes are part of the wire format and must stay stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RemoteErrorKind {
    NoSuchStorage = 0,
    NoSuchVariable = 1,
    TypeMismatch = 2,
    UnknownGroup = 3,
    UnknownThread = 4,
    UnknownFunction = 5,
    UserException = 6,
}

impl RemoteErrorKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::NoSuchStorage),
            1 => Some(Self::NoSuchVariable),
            2 => Some(Self::TypeMismatch),
            3 => Some(Self::UnknownGroup),
            4 => Some(Self::UnknownThread),
            5 => Some(Self::UnknownFunction),
            6 => Some(Self::UserException),
            _ => None,
        }
    }
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Convert into the error a requester's future resolves with.
    ///
    /// `thread` is the remote thread the request targeted.
    pub fn into_error(self, thread: GlobalThreadId) -> TesseraError {
        match self.kind {
            RemoteErrorKind::NoSuchStorage => TesseraError::NoSuchStorage {
                storage: self.detail,
            },
            RemoteErrorKind::NoSuchVariable => {
                let (storage, name) = split_qualified(&self.detail);
                TesseraError::NoSuchVariable { storage, name }
            }
            RemoteErrorKind::TypeMismatch => {
                let (storage, name) = split_qualified(&self.detail);
                TesseraError::TypeMismatch {
                    storage,
                    name,
                    detail: "remote type mismatch".into(),
                }
            }
            RemoteErrorKind::UnknownGroup => TesseraError::UnknownGroup {
                group: self.detail.parse().unwrap_or(GroupId::MAX),
            },
            RemoteErrorKind::UnknownThread => TesseraError::UnknownThread {
                thread: self.detail.parse().unwrap_or(thread),
            },
            RemoteErrorKind::UnknownFunction => TesseraError::UnknownFunction {
                fn_id: self.detail.parse().unwrap_or(u16::MAX),
            },
            RemoteErrorKind::UserException => TesseraError::UserException {
                thread,
                detail: self.detail,
            },
        }
    }
}

/// Errors for variables travel as `"storage.name"` in the detail field.
fn split_qualified(detail: &str) -> (String, String) {
    match detail.split_once('.') {
        Some((s, n)) => (s.to_string(), n.to_string()),
        None => (detail.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = TesseraError::ConnectFailed {
            node: 3,
            addr: "10.0.0.3:9000".into(),
            reason: "refused".into(),
        };
        assert_eq!(
            e.to_string(),
            "connect to node 3 (10.0.0.3:9000) failed: refused"
        );
    }

    #[test]
    fn remote_error_kind_codes_are_stable() {
        for v in 0..=6u8 {
            let kind = RemoteErrorKind::from_u8(v).unwrap();
            assert_eq!(kind as u8, v);
        }
        assert!(RemoteErrorKind::from_u8(7).is_none());
    }

    #[test]
    fn remote_variable_error_resolves_to_typed_error() {
        let remote = RemoteError::new(RemoteErrorKind::NoSuchVariable, "shm.y");
        match remote.into_error(0) {
            TesseraError::NoSuchVariable { storage, name } => {
                assert_eq!(storage, "shm");
                assert_eq!(name, "y");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(TesseraError::Config("x".into()).exit_code(), 2);
        assert_eq!(
            TesseraError::UserException {
                thread: 0,
                detail: "boom".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(TesseraError::ConnectionLost { node: 1 }.exit_code(), 3);
    }
}
