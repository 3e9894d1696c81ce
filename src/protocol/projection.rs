// protocol/projection.rs - Local Views of a Protocol Tree

//! Projection of the shared protocol tree onto one role.
//!
//! The deciding role of a choice sees an internal choice (`Send` with
//! several branches); its peer sees an external choice (`Recv`) and only
//! learns the branch from the message it observes.

use super::declaration::{Label, Role};
use super::tree::{NodeId, ProtocolTree};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("Role {0} is not declared by the protocol")]
    UnknownRole(Role),
}

/// A protocol as seen by a single participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalType {
    /// Send one of the labelled messages to `to`
    Send {
        to: Role,
        branches: Vec<(Label, LocalType)>,
    },

    /// Receive one of the labelled messages from `from`
    Recv {
        from: Role,
        branches: Vec<(Label, LocalType)>,
    },

    End,
}

impl LocalType {
    /// True when this role chooses among more than one branch
    pub fn is_internal_choice(&self) -> bool {
        matches!(self, LocalType::Send { branches, .. } if branches.len() > 1)
    }

    /// Labels offered at the head of this local type
    pub fn head_labels(&self) -> Vec<&Label> {
        match self {
            LocalType::Send { branches, .. } | LocalType::Recv { branches, .. } => {
                branches.iter().map(|(label, _)| label).collect()
            }
            LocalType::End => Vec::new(),
        }
    }
}

impl fmt::Display for LocalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mark, peer, branches) = match self {
            LocalType::Send { to, branches } => ("!", to, branches),
            LocalType::Recv { from, branches } => ("?", from, branches),
            LocalType::End => return write!(f, "end"),
        };
        write!(f, "{peer}{mark}")?;
        if let [(label, cont)] = branches.as_slice() {
            return write!(f, "{label}.{cont}");
        }
        write!(f, "{{")?;
        for (index, (label, cont)) in branches.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{label}.{cont}")?;
        }
        write!(f, "}}")
    }
}

/// Project `tree` onto `role`
pub fn project(tree: &ProtocolTree, role: &Role) -> Result<LocalType, ProjectionError> {
    if !tree.has_role(role) {
        return Err(ProjectionError::UnknownRole(role.clone()));
    }
    Ok(project_node(tree, tree.root(), role))
}

/// Project every declared role
pub fn project_all(tree: &ProtocolTree) -> Vec<(Role, LocalType)> {
    tree.roles()
        .iter()
        .map(|role| (role.clone(), project_node(tree, tree.root(), role)))
        .collect()
}

fn project_node(tree: &ProtocolTree, id: NodeId, role: &Role) -> LocalType {
    let moves = tree.legal_moves(id);
    let Some(head) = moves.first() else {
        return LocalType::End;
    };

    let sender = head.interaction.sender.clone();
    let receiver = head.interaction.receiver.clone();
    let branches = moves
        .iter()
        .map(|mv| (mv.interaction.label.clone(), project_node(tree, mv.next, role)))
        .collect();

    // Every branch head of a choice shares its sender, so the first move decides.
    if *role == sender {
        LocalType::Send {
            to: receiver,
            branches,
        }
    } else {
        LocalType::Recv {
            from: sender,
            branches,
        }
    }
}
