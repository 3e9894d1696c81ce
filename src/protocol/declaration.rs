// protocol/declaration.rs - Abstract Protocol Declaration

//! The abstract protocol tree handed over by a declaration front-end.
//!
//! Nothing here is validated. [`build`](super::build) turns a
//! [`ProtocolDecl`] into an immutable [`ProtocolTree`](super::ProtocolTree)
//! or rejects it.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// A named protocol participant
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A message label such as `request` or `inform`
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A whole protocol declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDecl {
    /// Protocol name
    pub name: String,

    /// Declared participants
    pub roles: Vec<Role>,

    /// Top-level sequence
    pub body: Vec<Step>,
}

/// One step of a declared sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// `label from from to to`
    Interaction { label: Label, from: Role, to: Role },

    /// `choice at role { ... } or { ... }`
    Choice { at: Role, branches: Vec<Vec<Step>> },

    /// `rec X { ... }`
    Recursion { label: String, body: Vec<Step> },

    /// `continue X`
    Continue { label: String },

    /// `par { ... } and { ... }`
    Parallel { branches: Vec<Vec<Step>> },

    /// `do Sub(roles)`
    Do { protocol: String },
}

impl Step {
    pub fn interaction(label: impl Into<Label>, from: impl Into<Role>, to: impl Into<Role>) -> Self {
        Step::Interaction {
            label: label.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn choice(at: impl Into<Role>, branches: Vec<Vec<Step>>) -> Self {
        Step::Choice {
            at: at.into(),
            branches,
        }
    }

    /// Construct keyword, used in error messages
    pub fn construct_name(&self) -> &'static str {
        match self {
            Step::Interaction { .. } => "interaction",
            Step::Choice { .. } => "choice",
            Step::Recursion { .. } => "rec",
            Step::Continue { .. } => "continue",
            Step::Parallel { .. } => "par",
            Step::Do { .. } => "do",
        }
    }
}

impl ProtocolDecl {
    pub fn new(name: impl Into<String>, roles: Vec<Role>, body: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            roles,
            body,
        }
    }

    /// Parse a JSON rendering of a declaration
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
