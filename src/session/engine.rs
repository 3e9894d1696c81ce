// session/engine.rs - Conformance Engine

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;
use super::state_machine::{Event, ExpectedAction, SessionId, SessionSnapshot};
use super::EngineError;
use crate::config::EngineConfig;
use crate::observability::{record_attempt, record_violation};
use crate::protocol::{build, rpc, MalformedProtocolError, ProtocolDecl, ProtocolTree, Role};

/// Gates message legality for every session of one protocol
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct ConformanceEngine {
    registry: Arc<SessionRegistry>,
}

impl ConformanceEngine {
    /// Engine with default configuration
    pub fn new(tree: ProtocolTree) -> Self {
        Self::with_config(tree, &EngineConfig::default())
    }

    pub fn with_config(tree: ProtocolTree, config: &EngineConfig) -> Self {
        let registry = SessionRegistry::new(
            Arc::new(tree),
            config.closed_retention,
            config.session_timeout(),
        );
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Build `decl` and wrap it in an engine
    pub fn from_declaration(
        decl: &ProtocolDecl,
        config: &EngineConfig,
    ) -> Result<Self, MalformedProtocolError> {
        let tree = build(decl)?;
        info!(
            protocol = %tree.name(),
            nodes = tree.node_count(),
            choices = tree.choice_count(),
            "Protocol loaded"
        );
        Ok(Self::with_config(tree, config))
    }

    /// Engine for the built-in RPC protocol
    pub fn rpc() -> Result<Self, MalformedProtocolError> {
        Self::from_declaration(&rpc::declaration(), &EngineConfig::default())
    }

    pub fn tree(&self) -> &ProtocolTree {
        self.registry.tree()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Begin a call under a fresh identifier
    pub fn create_session(&self) -> SessionId {
        self.registry.create()
    }

    /// Begin a call under a caller-supplied identifier
    pub fn create_session_with_id(&self, id: impl Into<SessionId>) -> Result<SessionId, EngineError> {
        self.registry.create_with_id(id.into())
    }

    /// Judge `event` against the session and advance it if legal
    ///
    /// Check and advance happen under the session's own lock, so concurrent
    /// attempts on one session are totally ordered and a rejected attempt
    /// leaves the session untouched. Reaching a terminal interaction retires
    /// the session from the live table.
    pub fn attempt(&self, id: &SessionId, event: Event) -> Result<SessionSnapshot, EngineError> {
        let protocol = self.registry.tree().name();

        let Some(handle) = self.registry.handle(id) else {
            // Late observers of a closed session get a full violation report.
            let violation = self
                .registry
                .with_closed(id, |instance| instance.judge(&event))
                .ok_or_else(|| EngineError::UnknownSession(id.clone()))?;
            record_violation(protocol, violation.kind.as_str());
            warn!(session = %id, kind = %violation.kind, label = %event.label, "Attempt on closed session");
            return Err(violation.into());
        };

        let mut instance = handle.lock();
        match instance.attempt(&event) {
            Ok(()) => {
                record_attempt(protocol, event.label.as_str());
                debug!(
                    session = %id,
                    label = %event.label,
                    role = %event.role,
                    step = instance.step(),
                    state = %instance.describe(),
                    "Message accepted"
                );

                if instance.is_closed() {
                    self.registry.retire(&instance);
                    info!(session = %id, status = %instance.status(), "Session completed");
                }
                Ok(instance.snapshot())
            }
            Err(violation) => {
                record_violation(protocol, violation.kind.as_str());
                warn!(
                    session = %id,
                    kind = %violation.kind,
                    label = %event.label,
                    role = %event.role,
                    state = %violation.state,
                    "Protocol violation"
                );
                Err(violation.into())
            }
        }
    }

    /// Current state of a live or retained session
    pub fn current_state(&self, id: &SessionId) -> Result<SessionSnapshot, EngineError> {
        self.registry.get(id)
    }

    /// What `role` may send or receive next
    pub fn expected_for(&self, id: &SessionId, role: &Role) -> Result<Vec<ExpectedAction>, EngineError> {
        match self.registry.handle(id) {
            Some(handle) => Ok(handle.lock().expected_for(role)),
            None => self
                .registry
                .with_closed(id, |instance| instance.expected_for(role))
                .ok_or_else(|| EngineError::UnknownSession(id.clone())),
        }
    }

    /// Cancel a call from any non-terminal state
    pub fn abort(&self, id: &SessionId, reason: &str) -> Result<SessionSnapshot, EngineError> {
        self.registry.abort(id, reason)
    }

    /// Retire a session that reached a terminal state
    pub fn complete(&self, id: &SessionId) -> Result<SessionSnapshot, EngineError> {
        self.registry.complete(id)
    }

    /// Abort sessions whose deadline has passed
    pub fn abort_expired(&self) -> Vec<SessionId> {
        self.registry.abort_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RpcMessage, RpcRole, RpcState};
    use crate::session::{Direction, SessionStatus, ViolationKind};

    fn state(engine: &ConformanceEngine, id: &SessionId) -> RpcState {
        RpcState::from_snapshot(&engine.current_state(id).unwrap()).unwrap()
    }

    #[test]
    fn test_terminal_transition_retires_session() {
        let engine = ConformanceEngine::rpc().unwrap();
        let id = engine.create_session();

        engine.attempt(&id, RpcMessage::Request.event()).unwrap();
        engine.attempt(&id, RpcMessage::Reject.event()).unwrap();

        assert!(engine.registry().is_empty());
        assert_eq!(state(&engine, &id), RpcState::Rejected);
    }

    #[test]
    fn test_expected_for_observer_follows_decider() {
        let engine = ConformanceEngine::rpc().unwrap();
        let id = engine.create_session();
        engine.attempt(&id, RpcMessage::Request.event()).unwrap();

        let provider = engine.expected_for(&id, &RpcRole::Provider.into()).unwrap();
        let requester = engine.expected_for(&id, &RpcRole::Requester.into()).unwrap();

        assert!(provider.iter().all(|a| a.direction == Direction::Send));
        let labels = |actions: &[ExpectedAction]| {
            actions.iter().map(|a| a.label.to_string()).collect::<Vec<_>>()
        };
        assert_eq!(labels(&provider), vec!["accept", "reject"]);
        assert!(requester.is_empty());

        engine.attempt(&id, RpcMessage::Accept.event()).unwrap();
        let requester = engine.expected_for(&id, &RpcRole::Requester.into()).unwrap();
        assert!(requester.is_empty());
        let provider = engine.expected_for(&id, &RpcRole::Provider.into()).unwrap();
        assert_eq!(labels(&provider), vec!["inform", "failure"]);
    }

    #[test]
    fn test_unknown_session() {
        let engine = ConformanceEngine::rpc().unwrap();
        let missing = SessionId::new("missing");
        assert_eq!(
            engine.attempt(&missing, RpcMessage::Request.event()),
            Err(EngineError::UnknownSession(missing.clone()))
        );
        assert!(engine.current_state(&missing).is_err());
    }

    #[test]
    fn test_abort_then_attempt_is_closed() {
        let engine = ConformanceEngine::rpc().unwrap();
        let id = engine.create_session();
        engine.attempt(&id, RpcMessage::Request.event()).unwrap();

        let snapshot = engine.abort(&id, "peer disconnected").unwrap();
        assert_eq!(
            snapshot.status,
            SessionStatus::Aborted {
                reason: "peer disconnected".into()
            }
        );

        let err = engine
            .attempt(&id, RpcMessage::Accept.event())
            .unwrap_err();
        assert_eq!(err.violation_kind(), Some(ViolationKind::SessionClosed));
        assert_eq!(
            err.as_violation().unwrap().state,
            "aborted: peer disconnected"
        );
    }

    #[test]
    fn test_caller_supplied_id() {
        let engine = ConformanceEngine::rpc().unwrap();
        let id = engine.create_session_with_id("call-42").unwrap();
        assert_eq!(id.as_str(), "call-42");
        assert!(matches!(
            engine.create_session_with_id("call-42"),
            Err(EngineError::DuplicateSession(_))
        ));
    }
}
