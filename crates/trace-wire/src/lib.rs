//! # Trace record wire codec
//!
//! Partial decoder/encoder for the serialized record envelope consumed by
//! the redaction stage. "Partial" is the point: a record is mostly made of
//! fields this stage never edits, so the decoder materializes only the
//! process event bundle and its lifecycle payloads, and keeps everything
//! else as verbatim byte spans that `encode` copies back untouched.
//!
//! The format is tag/varint based: field tags pack a field number and a
//! wire type, unsigned integers are LEB128 varints, signed 32 bit values
//! are zigzag encoded, strings and sub-messages are length-delimited.

mod codec;
mod record;

pub use codec::WireError;

pub use bytes::Bytes;
pub use record::{Event, EventBundle, EventPayload, Record, TaskFree, TaskNew, TaskRename};
