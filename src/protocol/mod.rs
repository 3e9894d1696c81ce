// protocol/mod.rs - Protocol Declarations and Trees

//! Protocol declarations and the immutable trees built from them.
//!
//! - `ProtocolDecl` - abstract declaration produced by a front-end
//! - `build` - validates a declaration into a `ProtocolTree`
//! - `project` - the local view of a tree for one role
//! - `rpc` - the two-role request/accept-or-reject/inform-or-failure protocol
//!
//! # Example
//!
//! ```
//! use rpc_conformance::protocol::{build, rpc};
//!
//! let tree = build(&rpc::declaration()).unwrap();
//! assert_eq!(tree.paths().len(), 3);
//! ```

mod declaration;
mod projection;
pub mod rpc;
mod tree;

pub use declaration::{Label, ProtocolDecl, Role, Step};
pub use projection::{project, project_all, LocalType, ProjectionError};
pub use rpc::{RpcMessage, RpcRole, RpcState};
pub use tree::{
    build, ChoiceId, Interaction, LegalMove, MalformedProtocolError, Node, NodeId, ProtocolTree,
};
