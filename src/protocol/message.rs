use crate::error::RemoteError;
use crate::node::NodeInfo;
use crate::types::{FnId, GlobalThreadId, GroupId, GroupThreadId, PhysicalId, RequestNum};
use bytes::Bytes;

/// Numeric message kind carried as the first payload byte of every frame.
///
/// Values are part of the wire format and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Hello = 0,
    HelloResponse = 1,
    HelloCompleted = 2,
    HelloGo = 3,
    BarrierGo = 4,
    BarrierWaiting = 5,
    BroadcastRequest = 6,
    BroadcastBytes = 7,
    BroadcastInform = 8,
    CollectRequest = 9,
    CollectValue = 10,
    ReduceRequest = 11,
    ReduceValue = 12,
    GroupJoinRequest = 13,
    GroupJoinResponse = 14,
    GroupJoinInform = 15,
    GroupJoinConfirm = 16,
    GetRequest = 17,
    GetReply = 18,
    PutRequest = 19,
    PutReply = 20,
    AccumulateRequest = 21,
    AccumulateReply = 22,
    AsyncAtRequest = 23,
    AsyncAtReply = 24,
    Bye = 25,
    ByeCompleted = 26,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        use MessageKind::*;
        Some(match v {
            0 => Hello,
            1 => HelloResponse,
            2 => HelloCompleted,
            3 => HelloGo,
            4 => BarrierGo,
            5 => BarrierWaiting,
            6 => BroadcastRequest,
            7 => BroadcastBytes,
            8 => BroadcastInform,
            9 => CollectRequest,
            10 => CollectValue,
            11 => ReduceRequest,
            12 => ReduceValue,
            13 => GroupJoinRequest,
            14 => GroupJoinResponse,
            15 => GroupJoinInform,
            16 => GroupJoinConfirm,
            17 => GetRequest,
            18 => GetReply,
            19 => PutRequest,
            20 => PutReply,
            21 => AccumulateRequest,
            22 => AccumulateReply,
            23 => AsyncAtRequest,
            24 => AsyncAtReply,
            25 => Bye,
            26 => ByeCompleted,
            _ => return None,
        })
    }
}

/// Messages exchanged between nodes.
///
/// User values travel as opaque serialized blobs (`Bytes`); the codec wraps
/// them in tagged chunked streams on the wire. Replies carry
/// `Result<_, RemoteError>` so handler failures surface at the requester's
/// future instead of crashing the remote node.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// First frame on every connection. Sent to node 0 at bootstrap with
    /// `physical_id = UNASSIGNED_PHYSICAL_ID`; sent on mesh connections with
    /// the assigned id so the accepting side can identify the peer.
    Hello {
        physical_id: PhysicalId,
        host: String,
        port: u16,
        thread_ids: Vec<GlobalThreadId>,
    },

    /// Node 0's answer: the assigned physical id and the complete node table.
    HelloResponse {
        physical_id: PhysicalId,
        nodes: Vec<NodeInfo>,
    },

    /// A node's mesh (all higher-id connects, all lower-id accepts) is up.
    HelloCompleted { physical_id: PhysicalId },

    /// Node 0's release: instantiate local threads, run the user entry point.
    HelloGo,

    /// Barrier progress, flowing up the group tree.
    BarrierGo { group: GroupId, round: u32 },

    /// Barrier release, flowing down the group tree.
    BarrierWaiting { group: GroupId, round: u32 },

    /// Requester to group master: start a broadcast.
    BroadcastRequest {
        group: GroupId,
        req: RequestNum,
        requester: GlobalThreadId,
        storage: String,
        name: String,
        value: Bytes,
    },

    /// Broadcast payload, flowing down the group tree.
    BroadcastBytes {
        group: GroupId,
        req: RequestNum,
        requester: GlobalThreadId,
        storage: String,
        name: String,
        value: Bytes,
    },

    /// Broadcast subtree acknowledgement, flowing up the group tree.
    BroadcastInform {
        group: GroupId,
        req: RequestNum,
        requester: GlobalThreadId,
    },

    /// Collect fan-out, flowing down the group tree.
    CollectRequest {
        group: GroupId,
        req: RequestNum,
        requester: GlobalThreadId,
        storage: String,
        name: String,
    },

    /// Collected values keyed by group-thread-id. Subtree partials flow up
    /// the tree; the master sends the final aggregate to the requester.
    CollectValue {
        group: GroupId,
        req: RequestNum,
        requester: GlobalThreadId,
        result: Result<Vec<(GroupThreadId, Bytes)>, RemoteError>,
    },

    /// Reduce fan-out, flowing down the group tree.
    ReduceRequest {
        group: GroupId,
        req: RequestNum,
        requester: GlobalThreadId,
        storage: String,
        name: String,
        fn_id: FnId,
    },

    /// Reduce partials flow up the tree; the master sends the final value to
    /// the requester. Carries the fn id so intermediate nodes can resolve
    /// the combiner without extra state.
    ReduceValue {
        group: GroupId,
        req: RequestNum,
        requester: GlobalThreadId,
        fn_id: FnId,
        result: Result<Bytes, RemoteError>,
    },

    /// Joiner to coordinator: add me to the named group.
    GroupJoinRequest {
        req: RequestNum,
        name: String,
        joiner: GlobalThreadId,
    },

    /// Coordinator to joiner, after every member node confirmed the update.
    GroupJoinResponse {
        req: RequestNum,
        result: Result<(GroupId, GroupThreadId), RemoteError>,
    },

    /// Coordinator to every member node: the group's full thread mapping.
    GroupJoinInform {
        group: GroupId,
        name: String,
        req: RequestNum,
        joiner: GlobalThreadId,
        threads: Vec<(GroupThreadId, GlobalThreadId)>,
    },

    /// Member node back to coordinator: mapping applied.
    GroupJoinConfirm {
        group: GroupId,
        req: RequestNum,
        joiner: GlobalThreadId,
    },

    GetRequest {
        req: RequestNum,
        target: GlobalThreadId,
        storage: String,
        name: String,
    },

    GetReply {
        req: RequestNum,
        result: Result<Bytes, RemoteError>,
    },

    PutRequest {
        req: RequestNum,
        target: GlobalThreadId,
        storage: String,
        name: String,
        value: Bytes,
    },

    PutReply {
        req: RequestNum,
        result: Result<(), RemoteError>,
    },

    AccumulateRequest {
        req: RequestNum,
        target: GlobalThreadId,
        storage: String,
        name: String,
        fn_id: FnId,
        value: Bytes,
    },

    AccumulateReply {
        req: RequestNum,
        result: Result<(), RemoteError>,
    },

    /// Run a registered function on the target thread's node.
    AsyncAtRequest {
        req: RequestNum,
        target: GlobalThreadId,
        fn_id: FnId,
        args: Bytes,
    },

    AsyncAtReply {
        req: RequestNum,
        result: Result<Bytes, RemoteError>,
    },

    /// Shutdown progress, flowing up the global tree.
    Bye,

    /// Shutdown release, flowing down the global tree.
    ByeCompleted,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        use Message::*;
        match self {
            Hello { .. } => MessageKind::Hello,
            HelloResponse { .. } => MessageKind::HelloResponse,
            HelloCompleted { .. } => MessageKind::HelloCompleted,
            HelloGo => MessageKind::HelloGo,
            BarrierGo { .. } => MessageKind::BarrierGo,
            BarrierWaiting { .. } => MessageKind::BarrierWaiting,
            BroadcastRequest { .. } => MessageKind::BroadcastRequest,
            BroadcastBytes { .. } => MessageKind::BroadcastBytes,
            BroadcastInform { .. } => MessageKind::BroadcastInform,
            CollectRequest { .. } => MessageKind::CollectRequest,
            CollectValue { .. } => MessageKind::CollectValue,
            ReduceRequest { .. } => MessageKind::ReduceRequest,
            ReduceValue { .. } => MessageKind::ReduceValue,
            GroupJoinRequest { .. } => MessageKind::GroupJoinRequest,
            GroupJoinResponse { .. } => MessageKind::GroupJoinResponse,
            GroupJoinInform { .. } => MessageKind::GroupJoinInform,
            GroupJoinConfirm { .. } => MessageKind::GroupJoinConfirm,
            GetRequest { .. } => MessageKind::GetRequest,
            GetReply { .. } => MessageKind::GetReply,
            PutRequest { .. } => MessageKind::PutRequest,
            PutReply { .. } => MessageKind::PutReply,
            AccumulateRequest { .. } => MessageKind::AccumulateRequest,
            AccumulateReply { .. } => MessageKind::AccumulateReply,
            AsyncAtRequest { .. } => MessageKind::AsyncAtRequest,
            AsyncAtReply { .. } => MessageKind::AsyncAtReply,
            Bye => MessageKind::Bye,
            ByeCompleted => MessageKind::ByeCompleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_values_are_stable() {
        assert_eq!(MessageKind::Hello as u8, 0);
        assert_eq!(MessageKind::BarrierGo as u8, 4);
        assert_eq!(MessageKind::GetRequest as u8, 17);
        assert_eq!(MessageKind::ByeCompleted as u8, 26);
    }

    #[test]
    fn kind_from_u8_is_inverse() {
        for v in 0..=26u8 {
            let kind = MessageKind::from_u8(v).unwrap();
            assert_eq!(kind as u8, v);
        }
        assert!(MessageKind::from_u8(27).is_none());
    }
}
