//! Message model for the trace record envelope.
//!
//! Decoding is partial on purpose: only the process event bundle and the
//! lifecycle payloads inside it are materialized. Every other field, at
//! every nesting level, is captured as a raw `tag + payload` byte span and
//! written back verbatim by `encode`. Rewriting a record therefore touches
//! only the sub-messages this stage actually edits.

use bytes::Bytes;

use crate::codec::{
    put_len_field, put_sint_field, put_varint_field, zigzag_decode, Reader, WireError, WIRE_LEN,
    WIRE_VARINT,
};

mod fields {
    pub(super) mod record {
        pub(crate) const PROCESS_EVENTS: u32 = 1;
    }
    pub(super) mod bundle {
        pub(crate) const CPU: u32 = 1;
        pub(crate) const EVENT: u32 = 2;
    }
    pub(super) mod event {
        pub(crate) const TIMESTAMP: u32 = 1;
        pub(crate) const PID: u32 = 2;
        pub(crate) const TASK_NEW: u32 = 3;
        pub(crate) const TASK_FREE: u32 = 4;
        pub(crate) const TASK_RENAME: u32 = 5;
    }
    pub(super) mod task_new {
        pub(crate) const PID: u32 = 1;
        pub(crate) const COMM: u32 = 2;
        pub(crate) const CLONE_FLAGS: u32 = 3;
        pub(crate) const OOM_SCORE_ADJ: u32 = 4;
    }
    pub(super) mod task_free {
        pub(crate) const PID: u32 = 1;
        pub(crate) const COMM: u32 = 2;
        pub(crate) const PRIO: u32 = 3;
    }
    pub(super) mod task_rename {
        pub(crate) const PID: u32 = 1;
        pub(crate) const OLDCOMM: u32 = 2;
        pub(crate) const NEWCOMM: u32 = 3;
        pub(crate) const OOM_SCORE_ADJ: u32 = 4;
    }
}

/// The envelope packet. Fields other than the process event bundle are
/// opaque to this stage and survive re-encoding byte for byte.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Record {
    pub process_events: Option<EventBundle>,
    /// Raw spans of fields this stage does not interpret.
    pub unknown: Vec<Bytes>,
}

/// Container of per-occurrence events captured on one CPU.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventBundle {
    pub cpu: Option<u32>,
    pub events: Vec<Event>,
    pub unknown: Vec<Bytes>,
}

/// One envelope event: identity fields plus at most one recognized
/// lifecycle payload. Payloads owned by other redaction primitives stay
/// in `unknown` and pass through unexamined.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Event {
    pub timestamp: Option<u64>,
    pub pid: Option<i32>,
    pub payload: Option<EventPayload>,
    pub unknown: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    TaskNew(TaskNew),
    TaskFree(TaskFree),
    TaskRename(TaskRename),
}

impl EventPayload {
    /// Pid recorded inside the lifecycle sub-message, when present.
    pub fn pid(&self) -> Option<i32> {
        match self {
            EventPayload::TaskNew(m) => m.pid,
            EventPayload::TaskFree(m) => m.pid,
            EventPayload::TaskRename(m) => m.pid,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TaskNew {
    pub pid: Option<i32>,
    pub comm: Option<String>,
    pub clone_flags: Option<u64>,
    pub oom_score_adj: Option<i32>,
    pub unknown: Vec<Bytes>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TaskFree {
    pub pid: Option<i32>,
    pub comm: Option<String>,
    pub prio: Option<i32>,
    pub unknown: Vec<Bytes>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TaskRename {
    pub pid: Option<i32>,
    pub oldcomm: Option<String>,
    pub newcomm: Option<String>,
    pub oom_score_adj: Option<i32>,
    pub unknown: Vec<Bytes>,
}

fn expect_varint(reader: &mut Reader, field: u32, wire_type: u32) -> Result<u64, WireError> {
    if wire_type != WIRE_VARINT {
        return Err(WireError::UnsupportedWireType { field, wire_type });
    }
    reader.uvarint()
}

fn expect_len<'a>(
    reader: &mut Reader<'a>,
    field: u32,
    wire_type: u32,
) -> Result<&'a [u8], WireError> {
    if wire_type != WIRE_LEN {
        return Err(WireError::UnsupportedWireType { field, wire_type });
    }
    reader.len_delimited()
}

fn expect_string(reader: &mut Reader, field: u32, wire_type: u32) -> Result<String, WireError> {
    let bytes = expect_len(reader, field, wire_type)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|error| WireError::NotUtf8 { field, error })
}

fn keep_unknown(
    reader: &mut Reader,
    start: usize,
    field: u32,
    wire_type: u32,
    unknown: &mut Vec<Bytes>,
) -> Result<(), WireError> {
    reader.skip(field, wire_type)?;
    unknown.push(Bytes::copy_from_slice(reader.span(start)));
    Ok(())
}

impl Record {
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(buf);
        let mut record = Record::default();
        while reader.has_remaining() {
            let start = reader.pos();
            let (field, wire_type) = reader.tag()?;
            match field {
                fields::record::PROCESS_EVENTS => {
                    let bytes = expect_len(&mut reader, field, wire_type)?;
                    record.process_events = Some(EventBundle::decode(bytes)?);
                }
                _ => keep_unknown(&mut reader, start, field, wire_type, &mut record.unknown)?,
            }
        }
        Ok(record)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        if let Some(bundle) = &self.process_events {
            let mut body = Vec::new();
            bundle.encode(&mut body);
            put_len_field(out, fields::record::PROCESS_EVENTS, &body);
        }
        for span in &self.unknown {
            out.extend_from_slice(span);
        }
    }
}

impl EventBundle {
    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(buf);
        let mut bundle = EventBundle::default();
        while reader.has_remaining() {
            let start = reader.pos();
            let (field, wire_type) = reader.tag()?;
            match field {
                fields::bundle::CPU => {
                    bundle.cpu = Some(expect_varint(&mut reader, field, wire_type)? as u32);
                }
                fields::bundle::EVENT => {
                    let bytes = expect_len(&mut reader, field, wire_type)?;
                    bundle.events.push(Event::decode(bytes)?);
                }
                _ => keep_unknown(&mut reader, start, field, wire_type, &mut bundle.unknown)?,
            }
        }
        Ok(bundle)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        if let Some(cpu) = self.cpu {
            put_varint_field(out, fields::bundle::CPU, u64::from(cpu));
        }
        for span in &self.unknown {
            out.extend_from_slice(span);
        }
        let mut body = Vec::new();
        for event in &self.events {
            body.clear();
            event.encode(&mut body);
            put_len_field(out, fields::bundle::EVENT, &body);
        }
    }
}

impl Event {
    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(buf);
        let mut event = Event::default();
        while reader.has_remaining() {
            let start = reader.pos();
            let (field, wire_type) = reader.tag()?;
            match field {
                fields::event::TIMESTAMP => {
                    event.timestamp = Some(expect_varint(&mut reader, field, wire_type)?);
                }
                fields::event::PID => {
                    let raw = expect_varint(&mut reader, field, wire_type)?;
                    event.pid = Some(zigzag_decode(raw));
                }
                fields::event::TASK_NEW => {
                    let bytes = expect_len(&mut reader, field, wire_type)?;
                    event.payload = Some(EventPayload::TaskNew(TaskNew::decode(bytes)?));
                }
                fields::event::TASK_FREE => {
                    let bytes = expect_len(&mut reader, field, wire_type)?;
                    event.payload = Some(EventPayload::TaskFree(TaskFree::decode(bytes)?));
                }
                fields::event::TASK_RENAME => {
                    let bytes = expect_len(&mut reader, field, wire_type)?;
                    event.payload = Some(EventPayload::TaskRename(TaskRename::decode(bytes)?));
                }
                _ => keep_unknown(&mut reader, start, field, wire_type, &mut event.unknown)?,
            }
        }
        Ok(event)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        if let Some(timestamp) = self.timestamp {
            put_varint_field(out, fields::event::TIMESTAMP, timestamp);
        }
        if let Some(pid) = self.pid {
            put_sint_field(out, fields::event::PID, pid);
        }
        if let Some(payload) = &self.payload {
            let mut body = Vec::new();
            let field = match payload {
                EventPayload::TaskNew(m) => {
                    m.encode(&mut body);
                    fields::event::TASK_NEW
                }
                EventPayload::TaskFree(m) => {
                    m.encode(&mut body);
                    fields::event::TASK_FREE
                }
                EventPayload::TaskRename(m) => {
                    m.encode(&mut body);
                    fields::event::TASK_RENAME
                }
            };
            put_len_field(out, field, &body);
        }
        for span in &self.unknown {
            out.extend_from_slice(span);
        }
    }
}

impl TaskNew {
    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(buf);
        let mut msg = TaskNew::default();
        while reader.has_remaining() {
            let start = reader.pos();
            let (field, wire_type) = reader.tag()?;
            match field {
                fields::task_new::PID => {
                    msg.pid = Some(zigzag_decode(expect_varint(&mut reader, field, wire_type)?));
                }
                fields::task_new::COMM => {
                    msg.comm = Some(expect_string(&mut reader, field, wire_type)?);
                }
                fields::task_new::CLONE_FLAGS => {
                    msg.clone_flags = Some(expect_varint(&mut reader, field, wire_type)?);
                }
                fields::task_new::OOM_SCORE_ADJ => {
                    msg.oom_score_adj =
                        Some(zigzag_decode(expect_varint(&mut reader, field, wire_type)?));
                }
                _ => keep_unknown(&mut reader, start, field, wire_type, &mut msg.unknown)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        if let Some(pid) = self.pid {
            put_sint_field(out, fields::task_new::PID, pid);
        }
        if let Some(comm) = &self.comm {
            put_len_field(out, fields::task_new::COMM, comm.as_bytes());
        }
        if let Some(clone_flags) = self.clone_flags {
            put_varint_field(out, fields::task_new::CLONE_FLAGS, clone_flags);
        }
        if let Some(oom_score_adj) = self.oom_score_adj {
            put_sint_field(out, fields::task_new::OOM_SCORE_ADJ, oom_score_adj);
        }
        for span in &self.unknown {
            out.extend_from_slice(span);
        }
    }
}

impl TaskFree {
    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(buf);
        let mut msg = TaskFree::default();
        while reader.has_remaining() {
            let start = reader.pos();
            let (field, wire_type) = reader.tag()?;
            match field {
                fields::task_free::PID => {
                    msg.pid = Some(zigzag_decode(expect_varint(&mut reader, field, wire_type)?));
                }
                fields::task_free::COMM => {
                    msg.comm = Some(expect_string(&mut reader, field, wire_type)?);
                }
                fields::task_free::PRIO => {
                    msg.prio = Some(zigzag_decode(expect_varint(&mut reader, field, wire_type)?));
                }
                _ => keep_unknown(&mut reader, start, field, wire_type, &mut msg.unknown)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        if let Some(pid) = self.pid {
            put_sint_field(out, fields::task_free::PID, pid);
        }
        if let Some(comm) = &self.comm {
            put_len_field(out, fields::task_free::COMM, comm.as_bytes());
        }
        if let Some(prio) = self.prio {
            put_sint_field(out, fields::task_free::PRIO, prio);
        }
        for span in &self.unknown {
            out.extend_from_slice(span);
        }
    }
}

impl TaskRename {
    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(buf);
        let mut msg = TaskRename::default();
        while reader.has_remaining() {
            let start = reader.pos();
            let (field, wire_type) = reader.tag()?;
            match field {
                fields::task_rename::PID => {
                    msg.pid = Some(zigzag_decode(expect_varint(&mut reader, field, wire_type)?));
                }
                fields::task_rename::OLDCOMM => {
                    msg.oldcomm = Some(expect_string(&mut reader, field, wire_type)?);
                }
                fields::task_rename::NEWCOMM => {
                    msg.newcomm = Some(expect_string(&mut reader, field, wire_type)?);
                }
                fields::task_rename::OOM_SCORE_ADJ => {
                    msg.oom_score_adj =
                        Some(zigzag_decode(expect_varint(&mut reader, field, wire_type)?));
                }
                _ => keep_unknown(&mut reader, start, field, wire_type, &mut msg.unknown)?,
            }
        }
        Ok(msg)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        if let Some(pid) = self.pid {
            put_sint_field(out, fields::task_rename::PID, pid);
        }
        if let Some(oldcomm) = &self.oldcomm {
            put_len_field(out, fields::task_rename::OLDCOMM, oldcomm.as_bytes());
        }
        if let Some(newcomm) = &self.newcomm {
            put_len_field(out, fields::task_rename::NEWCOMM, newcomm.as_bytes());
        }
        if let Some(oom_score_adj) = self.oom_score_adj {
            put_sint_field(out, fields::task_rename::OOM_SCORE_ADJ, oom_score_adj);
        }
        for span in &self.unknown {
            out.extend_from_slice(span);
        }
    }
}
