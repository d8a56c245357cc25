//! tessera: a PGAS runtime for SPMD parallel computation.
//!
//! Every process hosts one or more logical threads of the same program;
//! each thread owns a private storage of named shared variables, and
//! threads communicate through one-sided get/put/accumulate, remote task
//! execution, and tree-based collectives (barrier, broadcast, reduce,
//! collect) over named groups.

pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod networker;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod storage;
pub mod transport;
pub mod types;
pub mod wire;

pub use config::TesseraConfig;
pub use context::{GroupHandle, ThreadContext};
pub use error::{RemoteError, RemoteErrorKind, Result, TesseraError};
pub use group::CommonGroup;
pub use node::NodeInfo;
pub use protocol::{Message, MessageKind};
pub use registry::FnRegistry;
pub use runtime::{EntryPoint, NodeSpec, Runtime};
pub use storage::Storage;
pub use types::{
    FnId, GlobalThreadId, GroupId, GroupThreadId, PhysicalId, RequestNum, GLOBAL_GROUP_ID,
    GLOBAL_GROUP_NAME,
};
