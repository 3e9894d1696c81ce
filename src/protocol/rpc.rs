// protocol/rpc.rs - Two-Role RPC Protocol

//! The request / accept-or-reject / inform-or-failure call protocol.
//!
//! ```text
//! request(requester -> provider)
//! choice at provider
//!   accept(provider -> requester)
//!   choice at provider
//!     inform(provider -> requester)
//!   or
//!     failure(provider -> requester)
//! or
//!   reject(provider -> requester)
//! ```

use super::declaration::{Label, ProtocolDecl, Role, Step};
use crate::session::{Event, SessionSnapshot, SessionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PROTOCOL_NAME: &str = "RPC";

/// Participants of the RPC protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcRole {
    Requester,
    Provider,
}

impl RpcRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcRole::Requester => "requester",
            RpcRole::Provider => "provider",
        }
    }
}

impl From<RpcRole> for Role {
    fn from(role: RpcRole) -> Self {
        Role::new(role.as_str())
    }
}

impl fmt::Display for RpcRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages of the RPC protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcMessage {
    Request,
    Accept,
    Reject,
    Inform,
    Failure,
}

impl RpcMessage {
    pub const ALL: [RpcMessage; 5] = [
        RpcMessage::Request,
        RpcMessage::Accept,
        RpcMessage::Reject,
        RpcMessage::Inform,
        RpcMessage::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMessage::Request => "request",
            RpcMessage::Accept => "accept",
            RpcMessage::Reject => "reject",
            RpcMessage::Inform => "inform",
            RpcMessage::Failure => "failure",
        }
    }

    /// The only role allowed to send this message
    pub fn sender(&self) -> RpcRole {
        match self {
            RpcMessage::Request => RpcRole::Requester,
            _ => RpcRole::Provider,
        }
    }

    /// `role` sends this message
    pub fn sent_by(self, role: RpcRole) -> Event {
        Event::send(role, self)
    }

    /// The protocol's own sender sends this message
    pub fn event(self) -> Event {
        Event::send(self.sender(), self)
    }
}

impl From<RpcMessage> for Label {
    fn from(message: RpcMessage) -> Self {
        Label::new(message.as_str())
    }
}

impl fmt::Display for RpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RpcMessage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RpcMessage::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown RPC message: {s}"))
    }
}

/// RPC session states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcState {
    AwaitingRequest,
    AwaitingAcceptOrReject,
    AwaitingInformOrFailure,
    Rejected,
    Informed,
    Failed,
    Aborted(String),
}

impl RpcState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcState::AwaitingRequest => "awaiting_request",
            RpcState::AwaitingAcceptOrReject => "awaiting_accept_or_reject",
            RpcState::AwaitingInformOrFailure => "awaiting_inform_or_failure",
            RpcState::Rejected => "rejected",
            RpcState::Informed => "informed",
            RpcState::Failed => "failed",
            RpcState::Aborted(_) => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RpcState::Rejected | RpcState::Informed | RpcState::Failed | RpcState::Aborted(_)
        )
    }

    /// Interpret a snapshot of an RPC session
    ///
    /// Returns `None` if the snapshot does not come from the RPC protocol.
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Option<Self> {
        if snapshot.protocol != PROTOCOL_NAME {
            return None;
        }

        match &snapshot.status {
            SessionStatus::Aborted { reason } => Some(RpcState::Aborted(reason.clone())),
            SessionStatus::Completed { outcome } => match outcome.as_str() {
                "reject" => Some(RpcState::Rejected),
                "inform" => Some(RpcState::Informed),
                "failure" => Some(RpcState::Failed),
                _ => None,
            },
            SessionStatus::Active => {
                let labels: Vec<&str> = snapshot
                    .expected
                    .iter()
                    .map(|m| m.label.as_str())
                    .collect();
                match labels.as_slice() {
                    ["request"] => Some(RpcState::AwaitingRequest),
                    ["accept", "reject"] => Some(RpcState::AwaitingAcceptOrReject),
                    ["inform", "failure"] => Some(RpcState::AwaitingInformOrFailure),
                    _ => None,
                }
            }
        }
    }
}

impl fmt::Display for RpcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcState::Aborted(reason) => write!(f, "aborted ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// The RPC declaration as produced by a front-end
pub fn declaration() -> ProtocolDecl {
    let requester = RpcRole::Requester;
    let provider = RpcRole::Provider;
    let send = |message: RpcMessage, from: RpcRole, to: RpcRole| {
        Step::interaction(message, from, to)
    };

    ProtocolDecl::new(
        PROTOCOL_NAME,
        vec![requester.into(), provider.into()],
        vec![
            send(RpcMessage::Request, requester, provider),
            Step::choice(
                provider,
                vec![
                    vec![
                        send(RpcMessage::Accept, provider, requester),
                        Step::choice(
                            provider,
                            vec![
                                vec![send(RpcMessage::Inform, provider, requester)],
                                vec![send(RpcMessage::Failure, provider, requester)],
                            ],
                        ),
                    ],
                    vec![send(RpcMessage::Reject, provider, requester)],
                ],
            ),
        ],
    )
}
