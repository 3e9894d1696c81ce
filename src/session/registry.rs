// session/registry.rs - Session Registry

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::state_machine::{SessionId, SessionInstance, SessionSnapshot, SessionStatus};
use super::EngineError;
use crate::observability::{record_session_closed, record_session_created};
use crate::protocol::ProtocolTree;

/// Process-wide table of sessions for one protocol
///
/// Each live session sits behind its own lock; the maps themselves are
/// sharded, so calls on different sessions never wait on each other.
/// Closed sessions are kept as tombstones for late observers, oldest
/// evicted first once `retention` is exceeded.
pub struct SessionRegistry {
    /// Protocol shared by every session
    tree: Arc<ProtocolTree>,

    /// Sessions still accepting messages
    live: DashMap<SessionId, Arc<Mutex<SessionInstance>>>,

    /// Completed or aborted sessions
    closed: DashMap<SessionId, SessionInstance>,

    /// Tombstone insertion order
    closed_order: Mutex<VecDeque<SessionId>>,

    /// Maximum number of tombstones kept
    retention: usize,

    /// Deadline applied to new sessions
    session_timeout: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(tree: Arc<ProtocolTree>, retention: usize, session_timeout: Option<Duration>) -> Self {
        Self {
            tree,
            live: DashMap::new(),
            closed: DashMap::new(),
            closed_order: Mutex::new(VecDeque::new()),
            retention,
            session_timeout,
        }
    }

    pub fn tree(&self) -> &Arc<ProtocolTree> {
        &self.tree
    }

    /// Create a session under a fresh identifier
    pub fn create(&self) -> SessionId {
        loop {
            if let Ok(id) = self.create_with_id(SessionId::generate()) {
                return id;
            }
        }
    }

    /// Create a session under a caller-supplied identifier
    pub fn create_with_id(&self, id: SessionId) -> Result<SessionId, EngineError> {
        match self.live.entry(id.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateSession(id)),
            // `retire` inserts the tombstone before unlinking, so a vacant
            // slot racing a retire still finds it here.
            Entry::Vacant(_) if self.closed.contains_key(&id) => {
                Err(EngineError::DuplicateSession(id))
            }
            Entry::Vacant(slot) => {
                let mut instance = SessionInstance::new(id.clone(), self.tree.clone());
                if let Some(timeout) = self.session_timeout {
                    instance = instance.with_timeout(timeout);
                }
                slot.insert(Arc::new(Mutex::new(instance)));

                record_session_created(self.tree.name());
                debug!(session = %id, protocol = %self.tree.name(), "Session created");
                Ok(id)
            }
        }
    }

    /// Live session handle; the map guard is released before returning
    pub(crate) fn handle(&self, id: &SessionId) -> Option<Arc<Mutex<SessionInstance>>> {
        self.live.get(id).map(|entry| entry.value().clone())
    }

    /// Run `f` against a retained closed session
    pub(crate) fn with_closed<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&SessionInstance) -> R,
    ) -> Option<R> {
        self.closed.get(id).map(|entry| f(entry.value()))
    }

    /// Current state of a live or retained session
    pub fn get(&self, id: &SessionId) -> Result<SessionSnapshot, EngineError> {
        if let Some(handle) = self.handle(id) {
            return Ok(handle.lock().snapshot());
        }
        self.with_closed(id, SessionInstance::snapshot)
            .ok_or_else(|| EngineError::UnknownSession(id.clone()))
    }

    /// Move a terminal session from the live table to the tombstones
    pub fn complete(&self, id: &SessionId) -> Result<SessionSnapshot, EngineError> {
        let Some(handle) = self.handle(id) else {
            return self
                .with_closed(id, SessionInstance::snapshot)
                .ok_or_else(|| EngineError::UnknownSession(id.clone()));
        };

        let instance = handle.lock();
        if !instance.is_closed() {
            return Err(EngineError::NotTerminal {
                session_id: id.clone(),
                state: instance.describe(),
            });
        }
        self.retire(&instance);
        Ok(instance.snapshot())
    }

    /// Abort a live session, keeping `reason` for late observers
    pub fn abort(&self, id: &SessionId, reason: &str) -> Result<SessionSnapshot, EngineError> {
        let Some(handle) = self.handle(id) else {
            return match self.with_closed(id, |instance| instance.status().clone()) {
                Some(status) => Err(EngineError::NotAbortable {
                    session_id: id.clone(),
                    status,
                }),
                None => Err(EngineError::UnknownSession(id.clone())),
            };
        };

        let mut instance = handle.lock();
        if !instance.abort(reason) {
            return Err(EngineError::NotAbortable {
                session_id: id.clone(),
                status: instance.status().clone(),
            });
        }
        self.retire(&instance);
        info!(session = %id, reason, "Session aborted");
        Ok(instance.snapshot())
    }

    /// Abort every live session whose deadline has passed
    pub fn abort_expired(&self) -> Vec<SessionId> {
        let now = chrono::Utc::now().timestamp_millis();

        // Collect handles first so no map guard is held while locking a session.
        let handles: Vec<(SessionId, Arc<Mutex<SessionInstance>>)> = self
            .live
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, handle) in handles {
            let mut instance = handle.lock();
            if instance.is_expired(now) && instance.abort("timeout") {
                self.retire(&instance);
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Aborted expired sessions");
        }
        expired
    }

    /// Record a closed session as a tombstone, then drop the live entry
    ///
    /// Callers hold the session's lock. The tombstone is inserted first so a
    /// concurrent lookup always finds one of the two.
    pub(crate) fn retire(&self, instance: &SessionInstance) {
        let id = instance.id().clone();

        if self.retention > 0 && self.closed.insert(id.clone(), instance.clone()).is_none() {
            let mut order = self.closed_order.lock();
            order.push_back(id.clone());
            while order.len() > self.retention {
                if let Some(oldest) = order.pop_front() {
                    self.closed.remove(&oldest);
                }
            }
        }

        if self.live.remove(&id).is_some() {
            let outcome = match instance.status() {
                SessionStatus::Completed { outcome } => outcome.as_str(),
                SessionStatus::Aborted { .. } => "aborted",
                SessionStatus::Active => "active",
            };
            record_session_closed(self.tree.name(), outcome);
            debug!(session = %id, outcome, "Session retired");
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of retained closed sessions
    pub fn closed_len(&self) -> usize {
        self.closed.len()
    }

    pub fn active_ids(&self) -> Vec<SessionId> {
        self.live.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build, rpc, RpcMessage};
    use crate::session::ViolationKind;

    fn registry(retention: usize) -> SessionRegistry {
        let tree = Arc::new(build(&rpc::declaration()).unwrap());
        SessionRegistry::new(tree, retention, None)
    }

    #[test]
    fn test_create_and_get() {
        let registry = registry(8);
        let id = registry.create();

        let snapshot = registry.get(&id).unwrap();
        assert_eq!(snapshot.session_id, id);
        assert_eq!(snapshot.step, 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = registry(8);
        let id = registry.create_with_id("call-1".into()).unwrap();
        assert_eq!(
            registry.create_with_id(id.clone()),
            Err(EngineError::DuplicateSession(id))
        );
    }

    #[test]
    fn test_unknown_session() {
        let registry = registry(8);
        let missing = SessionId::new("nope");
        assert_eq!(
            registry.get(&missing),
            Err(EngineError::UnknownSession(missing.clone()))
        );
        assert!(registry.abort(&missing, "x").is_err());
    }

    #[test]
    fn test_complete_requires_terminal() {
        let registry = registry(8);
        let id = registry.create();
        assert!(matches!(
            registry.complete(&id),
            Err(EngineError::NotTerminal { .. })
        ));

        let handle = registry.handle(&id).unwrap();
        handle.lock().attempt(&RpcMessage::Request.event()).unwrap();
        handle.lock().attempt(&RpcMessage::Reject.event()).unwrap();

        let snapshot = registry.complete(&id).unwrap();
        assert!(snapshot.is_closed());
        assert!(registry.is_empty());
        assert_eq!(registry.closed_len(), 1);

        // Idempotent once retired.
        assert!(registry.complete(&id).is_ok());
    }

    #[test]
    fn test_abort_keeps_reason() {
        let registry = registry(8);
        let id = registry.create();
        registry.abort(&id, "transport failure").unwrap();

        let snapshot = registry.get(&id).unwrap();
        assert_eq!(
            snapshot.status,
            SessionStatus::Aborted {
                reason: "transport failure".into()
            }
        );
        assert!(matches!(
            registry.abort(&id, "again"),
            Err(EngineError::NotAbortable { .. })
        ));

        let violation = registry
            .with_closed(&id, |instance| instance.judge(&RpcMessage::Request.event()))
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::SessionClosed);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let registry = registry(2);
        let ids: Vec<SessionId> = (0..3).map(|_| registry.create()).collect();
        for id in &ids {
            registry.abort(id, "shutdown").unwrap();
        }

        assert_eq!(registry.closed_len(), 2);
        assert!(matches!(
            registry.get(&ids[0]),
            Err(EngineError::UnknownSession(_))
        ));
        assert!(registry.get(&ids[2]).is_ok());
    }

    #[test]
    fn test_abort_expired() {
        let tree = Arc::new(build(&rpc::declaration()).unwrap());
        let registry = SessionRegistry::new(tree, 8, Some(Duration::ZERO));
        let id = registry.create();

        let expired = registry.abort_expired();
        assert_eq!(expired, vec![id.clone()]);
        assert_eq!(
            registry.get(&id).unwrap().status,
            SessionStatus::Aborted {
                reason: "timeout".into()
            }
        );
    }

    #[test]
    fn test_unbounded_timeout_is_not_expired() {
        let tree = Arc::new(build(&rpc::declaration()).unwrap());
        let registry = SessionRegistry::new(tree, 8, Some(Duration::from_secs(u64::MAX)));
        let id = registry.create();

        assert!(registry.abort_expired().is_empty());
        assert!(!registry.get(&id).unwrap().is_closed());
    }

    #[test]
    fn test_recreate_racing_retire_is_duplicate() {
        let tree = Arc::new(build(&rpc::declaration()).unwrap());
        let registry = Arc::new(SessionRegistry::new(tree, 1024, None));

        for n in 0..200 {
            let id = registry.create_with_id(format!("call-{n}").into()).unwrap();
            let handle = registry.handle(&id).unwrap();

            let retirer = {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let mut instance = handle.lock();
                    instance.attempt(&RpcMessage::Request.event()).unwrap();
                    instance.attempt(&RpcMessage::Reject.event()).unwrap();
                    registry.retire(&instance);
                })
            };
            let recreated = registry.create_with_id(id.clone());
            retirer.join().unwrap();

            assert_eq!(recreated, Err(EngineError::DuplicateSession(id.clone())));
            assert!(registry.handle(&id).is_none());
            assert!(registry.get(&id).unwrap().is_closed());
        }
    }
}
