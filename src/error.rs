use thiserror::Error;

use crate::store::StoreError;

/// Protocol-level failures. None of these are process-fatal: malformed
/// frames and out-of-sync responses are logged and dropped with the
/// connection kept alive, and store failures abandon only the dispatch that
/// hit them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("out-of-sync: response for an unsent message (id {0})")]
    OutOfSync(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("protocol violation: {action} answered {got:?}, expected {expected:?}")]
    ProtocolViolation {
        action: String,
        expected: String,
        got: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
