// session/mod.rs - Session Instances, Registry and Conformance Engine

//! Runtime enforcement of a protocol tree.
//!
//! - `SessionInstance` - cursor into the tree for one call
//! - `SessionRegistry` - concurrent table of sessions keyed by `SessionId`
//! - `ConformanceEngine` - judges message attempts and advances sessions
//! - `SessionReaper` - background task aborting sessions past their deadline
//!
//! # Example
//!
//! ```
//! use rpc_conformance::protocol::{RpcMessage, RpcState};
//! use rpc_conformance::session::ConformanceEngine;
//!
//! let engine = ConformanceEngine::rpc().unwrap();
//! let call = engine.create_session();
//!
//! engine.attempt(&call, RpcMessage::Request.event()).unwrap();
//! engine.attempt(&call, RpcMessage::Accept.event()).unwrap();
//! let done = engine.attempt(&call, RpcMessage::Inform.event()).unwrap();
//!
//! assert_eq!(RpcState::from_snapshot(&done), Some(RpcState::Informed));
//! ```

mod engine;
mod reaper;
mod registry;
mod state_machine;

pub use engine::ConformanceEngine;
pub use reaper::SessionReaper;
pub use registry::SessionRegistry;
pub use state_machine::{
    AppliedEvent, Direction, Event, ExpectedAction, ExpectedMessage, ProtocolViolation,
    Resolution, SessionId, SessionInstance, SessionSnapshot, SessionStatus, ViolationKind,
};

use thiserror::Error;

/// Errors surfaced by the engine and registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session already exists: {0}")]
    DuplicateSession(SessionId),

    #[error(transparent)]
    Violation(#[from] ProtocolViolation),

    #[error("Session {session_id} is not terminal ({state})")]
    NotTerminal { session_id: SessionId, state: String },

    #[error("Session {session_id} cannot be aborted ({status})")]
    NotAbortable {
        session_id: SessionId,
        status: SessionStatus,
    },
}

impl EngineError {
    /// Violation kind, if this error is a protocol violation
    pub fn violation_kind(&self) -> Option<ViolationKind> {
        match self {
            EngineError::Violation(violation) => Some(violation.kind),
            _ => None,
        }
    }

    pub fn as_violation(&self) -> Option<&ProtocolViolation> {
        match self {
            EngineError::Violation(violation) => Some(violation),
            _ => None,
        }
    }
}
