// lib.rs - Session-Type Conformance Engine
//
// Enforces two-role request/response protocols at runtime: which messages
// are legal for which role, per call, across many concurrent calls.

#![doc = include_str!("../README.md")]

pub mod config;
pub mod observability;
pub mod protocol;
pub mod session;

// Re-export commonly used types
pub use crate::config::{ConfigError, EngineConfig};

pub use protocol::{
    build, project, Label, LocalType, MalformedProtocolError, ProtocolDecl, ProtocolTree, Role,
    RpcMessage, RpcRole, RpcState, Step,
};

pub use session::{
    ConformanceEngine, Direction, EngineError, Event, ProtocolViolation, SessionId,
    SessionReaper, SessionRegistry, SessionSnapshot, SessionStatus, ViolationKind,
};

pub use observability::{init_metrics, init_tracing, MetricsHandle, TracingConfig, TracingFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::protocol::{Label, Role, RpcMessage, RpcRole, RpcState};
    pub use crate::session::{
        ConformanceEngine, Direction, EngineError, Event, SessionId, SessionSnapshot,
        ViolationKind,
    };
}
