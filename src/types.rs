/// Dense identifier of a process (node) in the job. Node 0 is the coordinator.
pub type PhysicalId = u32;

/// Job-wide identifier of a logical SPMD thread.
pub type GlobalThreadId = u32;

/// Identifier of a named group of threads. Group 0 is the global group.
pub type GroupId = u32;

/// A thread's dense index within one group.
pub type GroupThreadId = u32;

/// Request number, monotonic at its originator.
pub type RequestNum = u32;

/// Identifier of a registered function (reducer, accumulator, remote task).
pub type FnId = u16;

/// The global group: every thread belongs to it, created before user code runs.
pub const GLOBAL_GROUP_ID: GroupId = 0;

/// Name of the global group.
pub const GLOBAL_GROUP_NAME: &str = "";

/// Sentinel physical id carried by a `Hello` before node 0 assigned one.
pub const UNASSIGNED_PHYSICAL_ID: PhysicalId = PhysicalId::MAX;
