// protocol/tree.rs - Protocol Tree and Builder

use super::declaration::{Label, ProtocolDecl, Role, Step};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Errors raised while building a protocol tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedProtocolError {
    #[error("Protocol must declare exactly two roles, found {0}")]
    RoleCount(usize),

    #[error("Role declared twice: {0}")]
    DuplicateRole(Role),

    #[error("Interaction {label} names undeclared role {role}")]
    UndeclaredRole { label: Label, role: Role },

    #[error("Choice names undeclared deciding role {0}")]
    UndeclaredDecider(Role),

    #[error("Interaction {label} has {role} sending to itself")]
    SelfInteraction { label: Label, role: Role },

    #[error("Choice at {0} has no continuations")]
    EmptyChoice(Role),

    #[error("Empty continuation in {0}")]
    EmptyContinuation(String),

    #[error("Branch {branch} of choice at {decider} does not start with a message sent by {decider}")]
    UndecidedBranch { decider: Role, branch: usize },

    #[error("Choice at {decider} has two branches starting with {label}")]
    AmbiguousChoice { decider: Role, label: Label },

    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(&'static str),
}

/// Index of a node in the tree arena
pub type NodeId = usize;

/// Identifies a choice point, numbered in declaration order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub struct ChoiceId(pub usize);

/// A directed message step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub label: Label,
    pub sender: Role,
    pub receiver: Role,
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}->{})", self.label, self.sender, self.receiver)
    }
}

/// A node in the protocol arena
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A single message, followed by `next`
    Interaction { interaction: Interaction, next: NodeId },

    /// A branch point; every branch starts with an interaction sent by `decider`
    Choice {
        id: ChoiceId,
        decider: Role,
        branches: Vec<NodeId>,
    },

    /// Protocol exhausted
    End,
}

/// A message that is legal at some node, and where it leads
#[derive(Debug, Clone, Copy)]
pub struct LegalMove<'a> {
    pub interaction: &'a Interaction,

    /// Node reached once the message is applied
    pub next: NodeId,

    /// Set when applying the message resolves a choice
    pub resolves: Option<(ChoiceId, usize)>,
}

/// Immutable, validated protocol structure shared by every session
#[derive(Debug, Clone)]
pub struct ProtocolTree {
    name: String,
    roles: [Role; 2],
    nodes: Vec<Node>,
    root: NodeId,
    choices: usize,
}

impl ProtocolTree {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &[Role; 2] {
        &self.roles
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn choice_count(&self) -> usize {
        self.choices
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// The counterpart of `role`, if `role` is declared
    pub fn peer_of(&self, role: &Role) -> Option<&Role> {
        match &self.roles {
            [a, b] if a == role => Some(b),
            [a, b] if b == role => Some(a),
            _ => None,
        }
    }

    pub fn is_terminal(&self, id: NodeId) -> bool {
        matches!(self.nodes[id], Node::End)
    }

    /// Messages legal at `id`, in declaration order
    pub fn legal_moves(&self, id: NodeId) -> Vec<LegalMove<'_>> {
        match &self.nodes[id] {
            Node::Interaction { interaction, next } => vec![LegalMove {
                interaction,
                next: *next,
                resolves: None,
            }],
            Node::Choice { id, branches, .. } => branches
                .iter()
                .enumerate()
                .filter_map(|(index, head)| match &self.nodes[*head] {
                    Node::Interaction { interaction, next } => Some(LegalMove {
                        interaction,
                        next: *next,
                        resolves: Some((*id, index)),
                    }),
                    _ => None,
                })
                .collect(),
            Node::End => Vec::new(),
        }
    }

    /// Every complete root-to-end sequence of interactions
    pub fn paths(&self) -> Vec<Vec<Interaction>> {
        let mut out = Vec::new();
        self.collect_paths(self.root, &mut Vec::new(), &mut out);
        out
    }

    fn collect_paths(
        &self,
        id: NodeId,
        prefix: &mut Vec<Interaction>,
        out: &mut Vec<Vec<Interaction>>,
    ) {
        let moves = self.legal_moves(id);
        if moves.is_empty() {
            out.push(prefix.clone());
            return;
        }
        for mv in moves {
            prefix.push(mv.interaction.clone());
            self.collect_paths(mv.next, prefix, out);
            prefix.pop();
        }
    }

    /// Indented textual rendering, one line per node
    pub fn render(&self) -> String {
        let mut out = format!("protocol {}({}, {})\n", self.name, self.roles[0], self.roles[1]);
        self.render_node(self.root, 1, &mut out);
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match &self.nodes[id] {
            Node::Interaction { interaction, next } => {
                out.push_str(&format!("{indent}{interaction}\n"));
                self.render_node(*next, depth, out);
            }
            Node::Choice {
                id,
                decider,
                branches,
            } => {
                out.push_str(&format!("{indent}choice#{id} at {decider}\n"));
                for (index, head) in branches.iter().enumerate() {
                    out.push_str(&format!("{indent}  branch {index}:\n"));
                    self.render_node(*head, depth + 2, out);
                }
            }
            Node::End => out.push_str(&format!("{indent}end\n")),
        }
    }
}

/// Build a protocol tree from a declaration
///
/// Pure and deterministic: the same declaration always yields the same
/// arena layout. Nothing is returned unless the whole declaration is valid.
pub fn build(decl: &ProtocolDecl) -> Result<ProtocolTree, MalformedProtocolError> {
    let roles: [Role; 2] = match decl.roles.as_slice() {
        [a, b] if a == b => return Err(MalformedProtocolError::DuplicateRole(a.clone())),
        [a, b] => [a.clone(), b.clone()],
        other => return Err(MalformedProtocolError::RoleCount(other.len())),
    };

    let mut builder = Builder {
        roles: &roles,
        nodes: vec![Node::End],
        choices: 0,
    };
    let root = builder.sequence(&decl.body, 0, "protocol body")?;
    let Builder { nodes, choices, .. } = builder;

    Ok(ProtocolTree {
        name: decl.name.clone(),
        roles,
        nodes,
        root,
        choices,
    })
}

struct Builder<'a> {
    roles: &'a [Role; 2],
    nodes: Vec<Node>,
    choices: usize,
}

impl Builder<'_> {
    /// Compile `steps` so that the last one continues at `cont`
    fn sequence(
        &mut self,
        steps: &[Step],
        cont: NodeId,
        context: &str,
    ) -> Result<NodeId, MalformedProtocolError> {
        let (first, rest) = steps
            .split_first()
            .ok_or_else(|| MalformedProtocolError::EmptyContinuation(context.to_string()))?;

        match first {
            Step::Interaction { label, from, to } => {
                self.check_role(label, from)?;
                self.check_role(label, to)?;
                if from == to {
                    return Err(MalformedProtocolError::SelfInteraction {
                        label: label.clone(),
                        role: from.clone(),
                    });
                }
                let next = self.rest(rest, cont, context)?;
                Ok(self.push(Node::Interaction {
                    interaction: Interaction {
                        label: label.clone(),
                        sender: from.clone(),
                        receiver: to.clone(),
                    },
                    next,
                }))
            }
            Step::Choice { at, branches } => {
                self.check_choice(at, branches)?;
                let id = ChoiceId(self.choices);
                self.choices += 1;

                let after = self.rest(rest, cont, context)?;
                let heads = branches
                    .iter()
                    .enumerate()
                    .map(|(index, branch)| {
                        let context = format!("branch {index} of choice at {at}");
                        self.sequence(branch, after, &context)
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(self.push(Node::Choice {
                    id,
                    decider: at.clone(),
                    branches: heads,
                }))
            }
            other => Err(MalformedProtocolError::UnsupportedConstruct(
                other.construct_name(),
            )),
        }
    }

    fn rest(
        &mut self,
        rest: &[Step],
        cont: NodeId,
        context: &str,
    ) -> Result<NodeId, MalformedProtocolError> {
        if rest.is_empty() {
            Ok(cont)
        } else {
            self.sequence(rest, cont, context)
        }
    }

    fn check_role(&self, label: &Label, role: &Role) -> Result<(), MalformedProtocolError> {
        if self.roles.contains(role) {
            Ok(())
        } else {
            Err(MalformedProtocolError::UndeclaredRole {
                label: label.clone(),
                role: role.clone(),
            })
        }
    }

    fn check_choice(&self, at: &Role, branches: &[Vec<Step>]) -> Result<(), MalformedProtocolError> {
        if !self.roles.contains(at) {
            return Err(MalformedProtocolError::UndeclaredDecider(at.clone()));
        }
        if branches.is_empty() {
            return Err(MalformedProtocolError::EmptyChoice(at.clone()));
        }

        let mut seen = HashSet::new();
        for (index, branch) in branches.iter().enumerate() {
            match branch.first() {
                None => {
                    return Err(MalformedProtocolError::EmptyContinuation(format!(
                        "branch {index} of choice at {at}"
                    )));
                }
                Some(Step::Interaction { label, from, .. }) if from == at => {
                    if !seen.insert(label) {
                        return Err(MalformedProtocolError::AmbiguousChoice {
                            decider: at.clone(),
                            label: label.clone(),
                        });
                    }
                }
                Some(Step::Interaction { .. }) | Some(Step::Choice { .. }) => {
                    return Err(MalformedProtocolError::UndecidedBranch {
                        decider: at.clone(),
                        branch: index,
                    });
                }
                Some(other) => {
                    return Err(MalformedProtocolError::UnsupportedConstruct(
                        other.construct_name(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(body: Vec<Step>) -> ProtocolDecl {
        ProtocolDecl::new("Test", vec![Role::new("a"), Role::new("b")], body)
    }

    #[test]
    fn test_sequence_builds_linear_tree() {
        let tree = build(&decl(vec![
            Step::interaction("ping", "a", "b"),
            Step::interaction("pong", "b", "a"),
        ]))
        .unwrap();

        let moves = tree.legal_moves(tree.root());
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].interaction.label, Label::new("ping"));
        assert_eq!(tree.paths().len(), 1);
        assert_eq!(tree.choice_count(), 0);
    }

    #[test]
    fn test_steps_after_choice_are_shared_continuation() {
        let tree = build(&decl(vec![
            Step::choice(
                "a",
                vec![
                    vec![Step::interaction("left", "a", "b")],
                    vec![Step::interaction("right", "a", "b")],
                ],
            ),
            Step::interaction("done", "b", "a"),
        ]))
        .unwrap();

        let paths = tree.paths();
        assert_eq!(paths.len(), 2);
        for path in paths {
            assert_eq!(path.len(), 2);
            assert_eq!(path[1].label, Label::new("done"));
        }
    }

    #[test]
    fn test_rejects_wrong_role_count() {
        let d = ProtocolDecl::new("X", vec![Role::new("a")], vec![]);
        assert_eq!(build(&d).unwrap_err(), MalformedProtocolError::RoleCount(1));

        let d = ProtocolDecl::new("X", vec!["a".into(), "b".into(), "c".into()], vec![]);
        assert_eq!(build(&d).unwrap_err(), MalformedProtocolError::RoleCount(3));

        let d = ProtocolDecl::new("X", vec!["a".into(), "a".into()], vec![]);
        assert!(matches!(build(&d), Err(MalformedProtocolError::DuplicateRole(_))));
    }

    #[test]
    fn test_rejects_undeclared_role() {
        let err = build(&decl(vec![Step::interaction("ping", "a", "c")])).unwrap_err();
        assert_eq!(
            err,
            MalformedProtocolError::UndeclaredRole {
                label: Label::new("ping"),
                role: Role::new("c"),
            }
        );
    }

    #[test]
    fn test_rejects_self_interaction() {
        let err = build(&decl(vec![Step::interaction("ping", "a", "a")])).unwrap_err();
        assert!(matches!(err, MalformedProtocolError::SelfInteraction { .. }));
    }

    #[test]
    fn test_rejects_empty_choice_and_continuations() {
        let err = build(&decl(vec![Step::choice("a", vec![])])).unwrap_err();
        assert_eq!(err, MalformedProtocolError::EmptyChoice(Role::new("a")));

        let err = build(&decl(vec![Step::choice(
            "a",
            vec![vec![Step::interaction("x", "a", "b")], vec![]],
        )]))
        .unwrap_err();
        assert!(matches!(err, MalformedProtocolError::EmptyContinuation(_)));

        let err = build(&decl(vec![])).unwrap_err();
        assert!(matches!(err, MalformedProtocolError::EmptyContinuation(_)));
    }

    #[test]
    fn test_rejects_branch_not_started_by_decider() {
        let err = build(&decl(vec![Step::choice(
            "a",
            vec![
                vec![Step::interaction("x", "a", "b")],
                vec![Step::interaction("y", "b", "a")],
            ],
        )]))
        .unwrap_err();
        assert_eq!(
            err,
            MalformedProtocolError::UndecidedBranch {
                decider: Role::new("a"),
                branch: 1,
            }
        );
    }

    #[test]
    fn test_rejects_ambiguous_choice() {
        let err = build(&decl(vec![Step::choice(
            "a",
            vec![
                vec![Step::interaction("x", "a", "b")],
                vec![Step::interaction("x", "a", "b")],
            ],
        )]))
        .unwrap_err();
        assert!(matches!(err, MalformedProtocolError::AmbiguousChoice { .. }));
    }

    #[test]
    fn test_rejects_unsupported_constructs() {
        let err = build(&decl(vec![Step::Recursion {
            label: "Loop".into(),
            body: vec![Step::Continue {
                label: "Loop".into(),
            }],
        }]))
        .unwrap_err();
        assert_eq!(err, MalformedProtocolError::UnsupportedConstruct("rec"));

        let err = build(&decl(vec![
            Step::interaction("x", "a", "b"),
            Step::Parallel { branches: vec![] },
        ]))
        .unwrap_err();
        assert_eq!(err, MalformedProtocolError::UnsupportedConstruct("par"));
    }

    #[test]
    fn test_peer_of() {
        let tree = build(&decl(vec![Step::interaction("x", "a", "b")])).unwrap();
        assert_eq!(tree.peer_of(&Role::new("a")), Some(&Role::new("b")));
        assert_eq!(tree.peer_of(&Role::new("z")), None);
    }
}
