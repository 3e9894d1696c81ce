// session/state_machine.rs - Session Instance State Machine

use crate::protocol::{ChoiceId, Interaction, Label, NodeId, ProtocolTree, Role};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Opaque call identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Whether the acting role is sending or receiving the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[display("sends")]
    Send,
    #[display("receives")]
    Receive,
}

/// A message attempt presented to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Message label
    pub label: Label,

    /// Role performing the send or receive
    pub role: Role,

    pub direction: Direction,

    /// Step the caller believed the session was at, if any
    pub observed_step: Option<u64>,
}

impl Event {
    /// `role` sends `label`
    pub fn send(role: impl Into<Role>, label: impl Into<Label>) -> Self {
        Self {
            label: label.into(),
            role: role.into(),
            direction: Direction::Send,
            observed_step: None,
        }
    }

    /// `role` receives `label`
    pub fn receive(role: impl Into<Role>, label: impl Into<Label>) -> Self {
        Self {
            label: label.into(),
            role: role.into(),
            direction: Direction::Receive,
            observed_step: None,
        }
    }

    /// Only apply if the session is still at `step`
    pub fn at_step(mut self, step: u64) -> Self {
        self.observed_step = Some(step);
        self
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Messages remain to be exchanged
    Active,

    /// Terminal interaction reached; `outcome` is its label
    Completed { outcome: Label },

    /// Cancelled before reaching a terminal interaction
    Aborted { reason: String },
}

impl SessionStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed { .. } => "completed",
            SessionStatus::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed { outcome } => write!(f, "completed with {outcome}"),
            SessionStatus::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

/// The branch a choice resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub choice: ChoiceId,
    pub branch: usize,
    pub label: Label,
    pub decider: Role,
}

/// A message the protocol allows next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedMessage {
    pub label: Label,
    pub sender: Role,
    pub receiver: Role,
}

/// What one role may do next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedAction {
    pub label: Label,
    pub direction: Direction,
    pub peer: Role,
}

/// An event that was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEvent {
    /// Step number before the event was applied
    pub step: u64,
    pub interaction: Interaction,
    pub acting_role: Role,
    pub direction: Direction,
    /// Unix millis
    pub at: i64,
}

/// Kind of protocol violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Session already completed or aborted
    #[display("session closed")]
    SessionClosed,

    /// Label not legal at the current state
    #[display("unexpected message")]
    UnexpectedMessage,

    /// Label legal, but not for this role and direction
    #[display("role mismatch")]
    RoleMismatch,

    /// Another attempt committed first at the observed step
    #[display("already resolved")]
    AlreadyResolved,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::SessionClosed => "session_closed",
            ViolationKind::UnexpectedMessage => "unexpected_message",
            ViolationKind::RoleMismatch => "role_mismatch",
            ViolationKind::AlreadyResolved => "already_resolved",
        }
    }
}

/// An illegal attempt, with enough context to diagnose the peer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{kind} in session {session_id} at step {step} ({state}): {acting_role} {direction} {got}, expected [{}]{}",
    join_labels(.expected),
    role_suffix(.expected_role)
)]
pub struct ProtocolViolation {
    pub session_id: SessionId,
    pub kind: ViolationKind,

    /// Labels legal at the current state
    pub expected: Vec<Label>,

    pub got: Label,
    pub acting_role: Role,
    pub direction: Direction,

    /// Role that should have performed the event, for role mismatches
    pub expected_role: Option<Role>,

    pub step: u64,

    /// Human-readable session state
    pub state: String,
}

fn join_labels(labels: &[Label]) -> String {
    labels
        .iter()
        .map(Label::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn role_suffix(role: &Option<Role>) -> String {
    match role {
        Some(role) => format!(" from {role}"),
        None => String::new(),
    }
}

/// Read-only copy of a session's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub protocol: String,
    pub step: u64,
    pub status: SessionStatus,
    pub expected: Vec<ExpectedMessage>,
    pub resolutions: Vec<Resolution>,
    pub history: Vec<AppliedEvent>,
    pub created_at: i64,
    pub deadline: Option<i64>,
}

impl SessionSnapshot {
    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub fn expected_labels(&self) -> Vec<&Label> {
        self.expected.iter().map(|m| &m.label).collect()
    }
}

/// One live execution of a protocol
///
/// The cursor only ever moves forward through the shared tree. Checks never
/// mutate; [`attempt`](Self::attempt) applies an event only after it has been
/// fully validated.
#[derive(Debug, Clone)]
pub struct SessionInstance {
    id: SessionId,
    tree: Arc<ProtocolTree>,
    cursor: NodeId,
    step: u64,
    status: SessionStatus,
    resolutions: Vec<Resolution>,
    history: Vec<AppliedEvent>,
    created_at: i64,
    deadline: Option<i64>,
}

/// A validated event, ready to apply
struct Advance {
    interaction: Interaction,
    next: NodeId,
    resolves: Option<(ChoiceId, usize)>,
}

impl SessionInstance {
    pub fn new(id: SessionId, tree: Arc<ProtocolTree>) -> Self {
        let cursor = tree.root();
        Self {
            id,
            tree,
            cursor,
            step: 0,
            status: SessionStatus::Active,
            resolutions: Vec::new(),
            history: Vec::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
            deadline: None,
        }
    }

    /// Set a deadline relative to creation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        self.deadline = Some(self.created_at.saturating_add(millis));
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub fn resolutions(&self) -> &[Resolution] {
        &self.resolutions
    }

    pub fn history(&self) -> &[AppliedEvent] {
        &self.history
    }

    /// Check if the deadline has passed
    pub fn is_expired(&self, now_millis: i64) -> bool {
        match self.deadline {
            Some(deadline) => !self.is_closed() && now_millis >= deadline,
            None => false,
        }
    }

    /// Messages legal at the cursor
    pub fn expected(&self) -> Vec<ExpectedMessage> {
        if self.is_closed() {
            return Vec::new();
        }
        self.tree
            .legal_moves(self.cursor)
            .into_iter()
            .map(|mv| ExpectedMessage {
                label: mv.interaction.label.clone(),
                sender: mv.interaction.sender.clone(),
                receiver: mv.interaction.receiver.clone(),
            })
            .collect()
    }

    /// Actions legal for `role` at the cursor
    ///
    /// At an unresolved choice only the decider has moves. The observer's
    /// next receive comes from whichever branch the decider sends.
    pub fn expected_for(&self, role: &Role) -> Vec<ExpectedAction> {
        if self.is_closed() {
            return Vec::new();
        }
        self.tree
            .legal_moves(self.cursor)
            .into_iter()
            .filter_map(|mv| {
                let interaction = mv.interaction;
                if interaction.sender == *role {
                    Some(ExpectedAction {
                        label: interaction.label.clone(),
                        direction: Direction::Send,
                        peer: interaction.receiver.clone(),
                    })
                } else if interaction.receiver == *role && mv.resolves.is_none() {
                    Some(ExpectedAction {
                        label: interaction.label.clone(),
                        direction: Direction::Receive,
                        peer: interaction.sender.clone(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Short description of where the session stands
    pub fn describe(&self) -> String {
        match &self.status {
            SessionStatus::Active => {
                let labels: Vec<Label> = self.expected().into_iter().map(|m| m.label).collect();
                format!("awaiting {}", join_labels(&labels).replace(", ", " or "))
            }
            other => other.to_string(),
        }
    }

    /// Validate `event` and, if legal, advance the cursor
    pub fn attempt(&mut self, event: &Event) -> Result<(), ProtocolViolation> {
        let advance = self.check(event)?;

        self.history.push(AppliedEvent {
            step: self.step,
            interaction: advance.interaction.clone(),
            acting_role: event.role.clone(),
            direction: event.direction,
            at: chrono::Utc::now().timestamp_millis(),
        });

        if let Some((choice, branch)) = advance.resolves {
            self.resolutions.push(Resolution {
                choice,
                branch,
                label: advance.interaction.label.clone(),
                decider: advance.interaction.sender.clone(),
            });
        }

        self.step += 1;
        self.cursor = advance.next;
        if self.tree.is_terminal(self.cursor) {
            self.status = SessionStatus::Completed {
                outcome: advance.interaction.label,
            };
        }
        Ok(())
    }

    fn check(&self, event: &Event) -> Result<Advance, ProtocolViolation> {
        if let Some(observed) = event.observed_step {
            if observed < self.step {
                return Err(self.violation(ViolationKind::AlreadyResolved, event, None));
            }
            if observed > self.step {
                return Err(self.violation(ViolationKind::UnexpectedMessage, event, None));
            }
        }

        if self.is_closed() {
            return Err(self.violation(ViolationKind::SessionClosed, event, None));
        }

        let moves = self.tree.legal_moves(self.cursor);
        let Some(mv) = moves.iter().find(|mv| mv.interaction.label == event.label) else {
            return Err(self.violation(ViolationKind::UnexpectedMessage, event, None));
        };

        // A branch is committed only by the decider's send; the observer
        // of a choice has no move until then.
        let resolving_receive = mv.resolves.is_some() && event.direction == Direction::Receive;
        let required = match event.direction {
            Direction::Send => &mv.interaction.sender,
            Direction::Receive if resolving_receive => &mv.interaction.sender,
            Direction::Receive => &mv.interaction.receiver,
        };
        if resolving_receive || *required != event.role {
            return Err(self.violation(
                ViolationKind::RoleMismatch,
                event,
                Some(required.clone()),
            ));
        }

        Ok(Advance {
            interaction: mv.interaction.clone(),
            next: mv.next,
            resolves: mv.resolves,
        })
    }

    /// Close the session without reaching a terminal interaction
    ///
    /// Returns false if the session was already closed.
    pub fn abort(&mut self, reason: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.status = SessionStatus::Aborted {
            reason: reason.into(),
        };
        true
    }

    /// Build a violation report against the current state
    pub(crate) fn violation(
        &self,
        kind: ViolationKind,
        event: &Event,
        expected_role: Option<Role>,
    ) -> ProtocolViolation {
        ProtocolViolation {
            session_id: self.id.clone(),
            kind,
            expected: self.expected().into_iter().map(|m| m.label).collect(),
            got: event.label.clone(),
            acting_role: event.role.clone(),
            direction: event.direction,
            expected_role,
            step: self.step,
            state: self.describe(),
        }
    }

    /// Judge an event against a session that may be closed
    pub(crate) fn judge(&self, event: &Event) -> ProtocolViolation {
        match self.check(event) {
            Err(violation) => violation,
            Ok(_) => self.violation(ViolationKind::SessionClosed, event, None),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            protocol: self.tree.name().to_string(),
            step: self.step,
            status: self.status.clone(),
            expected: self.expected(),
            resolutions: self.resolutions.clone(),
            history: self.history.clone(),
            created_at: self.created_at,
            deadline: self.deadline,
        }
    }
}
