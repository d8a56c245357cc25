use crate::error::{RemoteError, RemoteErrorKind, Result, TesseraError};
use crate::node::NodeInfo;
use crate::protocol::message::{Message, MessageKind};
use crate::wire::{WireReader, WireWriter};
use bytes::{BufMut, Bytes, BytesMut};

/// Bytes of the frame length prefix. The length excludes the prefix itself.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message into a complete frame: `[u32 length][u8 kind][payload]`.
///
/// `chunk_size` controls the chunked encoding of opaque value payloads.
pub fn encode_message(msg: &Message, chunk_size: usize) -> Bytes {
    let mut w = WireWriter::with_capacity(64);
    w.write_u8(msg.kind() as u8);
    encode_payload(msg, &mut w, chunk_size);
    let body = w.freeze();

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(&body);
    frame.freeze()
}

/// Decode a frame body (`[u8 kind][payload]`, length prefix already stripped
/// by the transport).
pub fn decode_message(body: Bytes) -> Result<Message> {
    let mut r = WireReader::new(body);
    let kind_byte = r.read_u8()?;
    let kind = MessageKind::from_u8(kind_byte).ok_or_else(|| {
        TesseraError::MalformedMessage(format!("unknown message kind: {kind_byte}"))
    })?;
    let msg = decode_payload(kind, &mut r)?;
    if !r.is_empty() {
        return Err(TesseraError::MalformedMessage(format!(
            "{} trailing bytes after {kind:?}",
            r.remaining()
        )));
    }
    Ok(msg)
}

fn encode_payload(msg: &Message, w: &mut WireWriter, chunk_size: usize) {
    use Message::*;
    match msg {
        Hello {
            physical_id,
            host,
            port,
            thread_ids,
        } => {
            w.write_u32(*physical_id);
            w.write_string(host);
            w.write_u16(*port);
            write_u32_list(w, thread_ids);
        }
        HelloResponse { physical_id, nodes } => {
            w.write_u32(*physical_id);
            w.write_u32(nodes.len() as u32);
            for node in nodes {
                w.write_u32(node.physical_id);
                w.write_string(&node.host);
                w.write_u16(node.port);
                write_u32_list(w, &node.thread_ids);
            }
        }
        HelloCompleted { physical_id } => w.write_u32(*physical_id),
        HelloGo | Bye | ByeCompleted => {}
        BarrierGo { group, round } | BarrierWaiting { group, round } => {
            w.write_u32(*group);
            w.write_u32(*round);
        }
        BroadcastRequest {
            group,
            req,
            requester,
            storage,
            name,
            value,
        }
        | BroadcastBytes {
            group,
            req,
            requester,
            storage,
            name,
            value,
        } => {
            w.write_u32(*group);
            w.write_u32(*req);
            w.write_u32(*requester);
            w.write_string(storage);
            w.write_string(name);
            w.write_object(value, chunk_size);
        }
        BroadcastInform {
            group,
            req,
            requester,
        } => {
            w.write_u32(*group);
            w.write_u32(*req);
            w.write_u32(*requester);
        }
        CollectRequest {
            group,
            req,
            requester,
            storage,
            name,
        } => {
            w.write_u32(*group);
            w.write_u32(*req);
            w.write_u32(*requester);
            w.write_string(storage);
            w.write_string(name);
        }
        CollectValue {
            group,
            req,
            requester,
            result,
        } => {
            w.write_u32(*group);
            w.write_u32(*req);
            w.write_u32(*requester);
            match result {
                Ok(entries) => {
                    w.write_u8(RESULT_OK);
                    w.write_u32(entries.len() as u32);
                    for (gtid, value) in entries {
                        w.write_u32(*gtid);
                        w.write_object(value, chunk_size);
                    }
                }
                Err(e) => {
                    w.write_u8(RESULT_ERR);
                    write_remote_error(w, e);
                }
            }
        }
        ReduceRequest {
            group,
            req,
            requester,
            storage,
            name,
            fn_id,
        } => {
            w.write_u32(*group);
            w.write_u32(*req);
            w.write_u32(*requester);
            w.write_string(storage);
            w.write_string(name);
            w.write_u16(*fn_id);
        }
        ReduceValue {
            group,
            req,
            requester,
            fn_id,
            result,
        } => {
            w.write_u32(*group);
            w.write_u32(*req);
            w.write_u32(*requester);
            w.write_u16(*fn_id);
            write_bytes_result(w, result, chunk_size);
        }
        GroupJoinRequest { req, name, joiner } => {
            w.write_u32(*req);
            w.write_string(name);
            w.write_u32(*joiner);
        }
        GroupJoinResponse { req, result } => {
            w.write_u32(*req);
            match result {
                Ok((group, gtid)) => {
                    w.write_u8(RESULT_OK);
                    w.write_u32(*group);
                    w.write_u32(*gtid);
                }
                Err(e) => {
                    w.write_u8(RESULT_ERR);
                    write_remote_error(w, e);
                }
            }
        }
        GroupJoinInform {
            group,
            name,
            req,
            joiner,
            threads,
        } => {
            w.write_u32(*group);
            w.write_string(name);
            w.write_u32(*req);
            w.write_u32(*joiner);
            w.write_u32(threads.len() as u32);
            for (gtid, global) in threads {
                w.write_u32(*gtid);
                w.write_u32(*global);
            }
        }
        GroupJoinConfirm { group, req, joiner } => {
            w.write_u32(*group);
            w.write_u32(*req);
            w.write_u32(*joiner);
        }
        GetRequest {
            req,
            target,
            storage,
            name,
        } => {
            w.write_u32(*req);
            w.write_u32(*target);
            w.write_string(storage);
            w.write_string(name);
        }
        GetReply { req, result } => {
            w.write_u32(*req);
            write_bytes_result(w, result, chunk_size);
        }
        PutRequest {
            req,
            target,
            storage,
            name,
            value,
        } => {
            w.write_u32(*req);
            w.write_u32(*target);
            w.write_string(storage);
            w.write_string(name);
            w.write_object(value, chunk_size);
        }
        PutReply { req, result } | AccumulateReply { req, result } => {
            w.write_u32(*req);
            write_unit_result(w, result);
        }
        AccumulateRequest {
            req,
            target,
            storage,
            name,
            fn_id,
            value,
        } => {
            w.write_u32(*req);
            w.write_u32(*target);
            w.write_string(storage);
            w.write_string(name);
            w.write_u16(*fn_id);
            w.write_object(value, chunk_size);
        }
        AsyncAtRequest {
            req,
            target,
            fn_id,
            args,
        } => {
            w.write_u32(*req);
            w.write_u32(*target);
            w.write_u16(*fn_id);
            w.write_object(args, chunk_size);
        }
        AsyncAtReply { req, result } => {
            w.write_u32(*req);
            write_bytes_result(w, result, chunk_size);
        }
    }
}

fn decode_payload(kind: MessageKind, r: &mut WireReader) -> Result<Message> {
    use MessageKind as K;
    Ok(match kind {
        K::Hello => Message::Hello {
            physical_id: r.read_u32()?,
            host: r.read_string()?,
            port: r.read_u16()?,
            thread_ids: read_u32_list(r)?,
        },
        K::HelloResponse => {
            let physical_id = r.read_u32()?;
            let count = r.read_u32()? as usize;
            let mut nodes = Vec::with_capacity(count);
            for _ in 0..count {
                nodes.push(NodeInfo {
                    physical_id: r.read_u32()?,
                    host: r.read_string()?,
                    port: r.read_u16()?,
                    thread_ids: read_u32_list(r)?,
                });
            }
            Message::HelloResponse { physical_id, nodes }
        }
        K::HelloCompleted => Message::HelloCompleted {
            physical_id: r.read_u32()?,
        },
        K::HelloGo => Message::HelloGo,
        K::BarrierGo => Message::BarrierGo {
            group: r.read_u32()?,
            round: r.read_u32()?,
        },
        K::BarrierWaiting => Message::BarrierWaiting {
            group: r.read_u32()?,
            round: r.read_u32()?,
        },
        K::BroadcastRequest | K::BroadcastBytes => {
            let group = r.read_u32()?;
            let req = r.read_u32()?;
            let requester = r.read_u32()?;
            let storage = r.read_string()?;
            let name = r.read_string()?;
            let value = r.read_object()?;
            if kind == K::BroadcastRequest {
                Message::BroadcastRequest {
                    group,
                    req,
                    requester,
                    storage,
                    name,
                    value,
                }
            } else {
                Message::BroadcastBytes {
                    group,
                    req,
                    requester,
                    storage,
                    name,
                    value,
                }
            }
        }
        K::BroadcastInform => Message::BroadcastInform {
            group: r.read_u32()?,
            req: r.read_u32()?,
            requester: r.read_u32()?,
        },
        K::CollectRequest => Message::CollectRequest {
            group: r.read_u32()?,
            req: r.read_u32()?,
            requester: r.read_u32()?,
            storage: r.read_string()?,
            name: r.read_string()?,
        },
        K::CollectValue => {
            let group = r.read_u32()?;
            let req = r.read_u32()?;
            let requester = r.read_u32()?;
            let result = match r.read_u8()? {
                RESULT_OK => {
                    let count = r.read_u32()? as usize;
                    let mut entries = Vec::with_capacity(count);
                    for _ in 0..count {
                        let gtid = r.read_u32()?;
                        entries.push((gtid, r.read_object()?));
                    }
                    Ok(entries)
                }
                RESULT_ERR => Err(read_remote_error(r)?),
                tag => return Err(bad_result_tag(tag)),
            };
            Message::CollectValue {
                group,
                req,
                requester,
                result,
            }
        }
        K::ReduceRequest => Message::ReduceRequest {
            group: r.read_u32()?,
            req: r.read_u32()?,
            requester: r.read_u32()?,
            storage: r.read_string()?,
            name: r.read_string()?,
            fn_id: r.read_u16()?,
        },
        K::ReduceValue => Message::ReduceValue {
            group: r.read_u32()?,
            req: r.read_u32()?,
            requester: r.read_u32()?,
            fn_id: r.read_u16()?,
            result: read_bytes_result(r)?,
        },
        K::GroupJoinRequest => Message::GroupJoinRequest {
            req: r.read_u32()?,
            name: r.read_string()?,
            joiner: r.read_u32()?,
        },
        K::GroupJoinResponse => {
            let req = r.read_u32()?;
            let result = match r.read_u8()? {
                RESULT_OK => Ok((r.read_u32()?, r.read_u32()?)),
                RESULT_ERR => Err(read_remote_error(r)?),
                tag => return Err(bad_result_tag(tag)),
            };
            Message::GroupJoinResponse { req, result }
        }
        K::GroupJoinInform => {
            let group = r.read_u32()?;
            let name = r.read_string()?;
            let req = r.read_u32()?;
            let joiner = r.read_u32()?;
            let count = r.read_u32()? as usize;
            let mut threads = Vec::with_capacity(count);
            for _ in 0..count {
                threads.push((r.read_u32()?, r.read_u32()?));
            }
            Message::GroupJoinInform {
                group,
                name,
                req,
                joiner,
                threads,
            }
        }
        K::GroupJoinConfirm => Message::GroupJoinConfirm {
            group: r.read_u32()?,
            req: r.read_u32()?,
            joiner: r.read_u32()?,
        },
        K::GetRequest => Message::GetRequest {
            req: r.read_u32()?,
            target: r.read_u32()?,
            storage: r.read_string()?,
            name: r.read_string()?,
        },
        K::GetReply => Message::GetReply {
            req: r.read_u32()?,
            result: read_bytes_result(r)?,
        },
        K::PutRequest => Message::PutRequest {
            req: r.read_u32()?,
            target: r.read_u32()?,
            storage: r.read_string()?,
            name: r.read_string()?,
            value: r.read_object()?,
        },
        K::PutReply => Message::PutReply {
            req: r.read_u32()?,
            result: read_unit_result(r)?,
        },
        K::AccumulateRequest => Message::AccumulateRequest {
            req: r.read_u32()?,
            target: r.read_u32()?,
            storage: r.read_string()?,
            name: r.read_string()?,
            fn_id: r.read_u16()?,
            value: r.read_object()?,
        },
        K::AccumulateReply => Message::AccumulateReply {
            req: r.read_u32()?,
            result: read_unit_result(r)?,
        },
        K::AsyncAtRequest => Message::AsyncAtRequest {
            req: r.read_u32()?,
            target: r.read_u32()?,
            fn_id: r.read_u16()?,
            args: r.read_object()?,
        },
        K::AsyncAtReply => Message::AsyncAtReply {
            req: r.read_u32()?,
            result: read_bytes_result(r)?,
        },
        K::Bye => Message::Bye,
        K::ByeCompleted => Message::ByeCompleted,
    })
}

const RESULT_OK: u8 = 0;
const RESULT_ERR: u8 = 1;

fn write_u32_list(w: &mut WireWriter, values: &[u32]) {
    w.write_u32(values.len() as u32);
    for v in values {
        w.write_u32(*v);
    }
}

fn read_u32_list(r: &mut WireReader) -> Result<Vec<u32>> {
    let count = r.read_u32()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(r.read_u32()?);
    }
    Ok(values)
}

fn write_remote_error(w: &mut WireWriter, e: &RemoteError) {
    w.write_u8(e.kind as u8);
    w.write_string(&e.detail);
}

fn read_remote_error(r: &mut WireReader) -> Result<RemoteError> {
    let kind_byte = r.read_u8()?;
    let kind = RemoteErrorKind::from_u8(kind_byte).ok_or_else(|| {
        TesseraError::MalformedMessage(format!("unknown remote error kind: {kind_byte}"))
    })?;
    Ok(RemoteError {
        kind,
        detail: r.read_string()?,
    })
}

fn write_bytes_result(
    w: &mut WireWriter,
    result: &std::result::Result<Bytes, RemoteError>,
    chunk_size: usize,
) {
    match result {
        Ok(value) => {
            w.write_u8(RESULT_OK);
            w.write_object(value, chunk_size);
        }
        Err(e) => {
            w.write_u8(RESULT_ERR);
            write_remote_error(w, e);
        }
    }
}

fn read_bytes_result(r: &mut WireReader) -> Result<std::result::Result<Bytes, RemoteError>> {
    match r.read_u8()? {
        RESULT_OK => Ok(Ok(r.read_object()?)),
        RESULT_ERR => Ok(Err(read_remote_error(r)?)),
        tag => Err(bad_result_tag(tag)),
    }
}

fn write_unit_result(w: &mut WireWriter, result: &std::result::Result<(), RemoteError>) {
    match result {
        Ok(()) => w.write_u8(RESULT_OK),
        Err(e) => {
            w.write_u8(RESULT_ERR);
            write_remote_error(w, e);
        }
    }
}

fn read_unit_result(r: &mut WireReader) -> Result<std::result::Result<(), RemoteError>> {
    match r.read_u8()? {
        RESULT_OK => Ok(Ok(())),
        RESULT_ERR => Ok(Err(read_remote_error(r)?)),
        tag => Err(bad_result_tag(tag)),
    }
}

fn bad_result_tag(tag: u8) -> TesseraError {
    TesseraError::MalformedMessage(format!("unknown result tag: {tag}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNASSIGNED_PHYSICAL_ID;

    const CHUNK: usize = 64;

    fn roundtrip(msg: Message) {
        let frame = encode_message(&msg, CHUNK);
        let len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - LENGTH_PREFIX_SIZE);
        let decoded = decode_message(frame.slice(LENGTH_PREFIX_SIZE..)).unwrap();
        assert_eq!(decoded, msg, "roundtrip mismatch for {msg:?}");
    }

    #[test]
    fn all_kinds_roundtrip() {
        let err = RemoteError::new(RemoteErrorKind::NoSuchVariable, "shm.y");
        let messages = vec![
            Message::Hello {
                physical_id: UNASSIGNED_PHYSICAL_ID,
                host: "worker-2".into(),
                port: 9000,
                thread_ids: vec![2, 3],
            },
            Message::HelloResponse {
                physical_id: 1,
                nodes: vec![
                    NodeInfo {
                        physical_id: 0,
                        host: "127.0.0.1".into(),
                        port: 9000,
                        thread_ids: vec![0, 1],
                    },
                    NodeInfo {
                        physical_id: 1,
                        host: "10.0.0.2".into(),
                        port: 9001,
                        thread_ids: vec![2, 3],
                    },
                ],
            },
            Message::HelloCompleted { physical_id: 2 },
            Message::HelloGo,
            Message::BarrierGo { group: 0, round: 7 },
            Message::BarrierWaiting { group: 0, round: 7 },
            Message::BroadcastRequest {
                group: 0,
                req: 1,
                requester: 0,
                storage: "shm".into(),
                name: "x".into(),
                value: Bytes::from_static(&[1, 2, 3]),
            },
            Message::BroadcastBytes {
                group: 0,
                req: 1,
                requester: 0,
                storage: "shm".into(),
                name: "x".into(),
                value: Bytes::from(vec![0xAB; 300]),
            },
            Message::BroadcastInform {
                group: 0,
                req: 1,
                requester: 0,
            },
            Message::CollectRequest {
                group: 2,
                req: 5,
                requester: 3,
                storage: "shm".into(),
                name: "v".into(),
            },
            Message::CollectValue {
                group: 2,
                req: 5,
                requester: 3,
                result: Ok(vec![
                    (0, Bytes::from_static(&[1])),
                    (1, Bytes::from_static(&[2, 2])),
                ]),
            },
            Message::CollectValue {
                group: 2,
                req: 5,
                requester: 3,
                result: Err(err.clone()),
            },
            Message::ReduceRequest {
                group: 0,
                req: 9,
                requester: 1,
                storage: "shm".into(),
                name: "acc".into(),
                fn_id: 4,
            },
            Message::ReduceValue {
                group: 0,
                req: 9,
                requester: 1,
                fn_id: 4,
                result: Ok(Bytes::from_static(&[9, 9])),
            },
            Message::GroupJoinRequest {
                req: 2,
                name: "workers".into(),
                joiner: 6,
            },
            Message::GroupJoinResponse {
                req: 2,
                result: Ok((3, 0)),
            },
            Message::GroupJoinInform {
                group: 3,
                name: "workers".into(),
                req: 2,
                joiner: 6,
                threads: vec![(0, 6), (1, 2)],
            },
            Message::GroupJoinConfirm {
                group: 3,
                req: 2,
                joiner: 6,
            },
            Message::GetRequest {
                req: 11,
                target: 3,
                storage: "shm".into(),
                name: "y".into(),
            },
            Message::GetReply {
                req: 11,
                result: Err(err.clone()),
            },
            Message::PutRequest {
                req: 12,
                target: 3,
                storage: "shm".into(),
                name: "y".into(),
                value: Bytes::from_static(&[4, 5, 6]),
            },
            Message::PutReply {
                req: 12,
                result: Ok(()),
            },
            Message::AccumulateRequest {
                req: 13,
                target: 3,
                storage: "shm".into(),
                name: "sum".into(),
                fn_id: 1,
                value: Bytes::from_static(&[7]),
            },
            Message::AccumulateReply {
                req: 13,
                result: Err(err),
            },
            Message::AsyncAtRequest {
                req: 14,
                target: 2,
                fn_id: 8,
                args: Bytes::from_static(&[0xFF; 10]),
            },
            Message::AsyncAtReply {
                req: 14,
                result: Ok(Bytes::new()),
            },
            Message::Bye,
            Message::ByeCompleted,
        ];
        for msg in messages {
            roundtrip(msg);
        }
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let err = decode_message(Bytes::from_static(&[200])).unwrap_err();
        assert!(err.to_string().contains("unknown message kind"), "{err}");
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let frame = encode_message(&Message::BarrierGo { group: 1, round: 2 }, CHUNK);
        let body = frame.slice(LENGTH_PREFIX_SIZE..frame.len() - 2);
        assert!(decode_message(body).is_err());
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let frame = encode_message(&Message::HelloGo, CHUNK);
        let mut body = frame.slice(LENGTH_PREFIX_SIZE..).to_vec();
        body.push(0);
        assert!(decode_message(Bytes::from(body)).is_err());
    }

    #[test]
    fn value_larger_than_chunk_size_roundtrips() {
        let value = Bytes::from((0..10_000u32).flat_map(u32::to_be_bytes).collect::<Vec<_>>());
        roundtrip(Message::PutRequest {
            req: 1,
            target: 0,
            storage: "shm".into(),
            name: "big".into(),
            value,
        });
    }
}
