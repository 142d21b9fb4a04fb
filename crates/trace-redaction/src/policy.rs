//! Keep/drop and scrub strategies.
//!
//! The redactor holds exactly one filter and one modifier, chosen at
//! configuration time. They are independent axes: the filter decides
//! whether a lifecycle payload survives at all, the modifier decides
//! which sensitive fields of a surviving payload are cleared. A modifier
//! that needs an ownership check performs it itself instead of trusting
//! whichever filter happens to be configured.

use nix::unistd::Pid;
use trace_wire::{Event, EventPayload};

use crate::context::TraceContext;

/// Keep/drop decision for one `(pid, timestamp)` pair. Implementations
/// must be pure over the context, pid and timestamp so a batch can be
/// evaluated in any order.
pub trait ProcessFilter: Send + Sync {
    fn keep(&self, ctx: &TraceContext, pid: Pid, ts: u64) -> bool;
}

/// In-place scrub of a kept event's sensitive fields. Returns whether
/// anything changed so callers can skip rewriting untouched records.
/// Implementations must not alter identity fields (pid, timestamps) or
/// the payload kind.
pub trait ProcessModifier: Send + Sync {
    fn scrub(&self, ctx: &TraceContext, pid: Pid, ts: u64, event: &mut Event) -> bool;
}

/// True iff `pid` was owned by the protected package at `ts`. Fails
/// closed: a missing package uid, a missing timeline, or a timeline miss
/// all read as "not owned".
pub fn connected_to_package(ctx: &TraceContext, pid: Pid, ts: u64) -> bool {
    match (ctx.package_uid, &ctx.timeline) {
        (Some(uid), Some(timeline)) => timeline
            .owner_of(pid, ts)
            .is_some_and(|slice| slice.uid == uid),
        _ => false,
    }
}

/// Keep everything. The safe default: a redactor with no configured
/// filter passes events through instead of inventing policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ProcessFilter for AllowAll {
    fn keep(&self, _ctx: &TraceContext, _pid: Pid, _ts: u64) -> bool {
        true
    }
}

/// Production policy: an event is visible only if the acting process was
/// owned by the protected package at the moment it occurred.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectedToPackage;

impl ProcessFilter for ConnectedToPackage {
    fn keep(&self, ctx: &TraceContext, pid: Pid, ts: u64) -> bool {
        connected_to_package(ctx, pid, ts)
    }
}

/// Scrub nothing. The safe default modifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct DoNothing;

impl ProcessModifier for DoNothing {
    fn scrub(&self, _ctx: &TraceContext, _pid: Pid, _ts: u64, _event: &mut Event) -> bool {
        false
    }
}

/// Clear every human-readable command-name field of a lifecycle payload
/// unless the pid is connected to the protected package at the event's
/// timestamp. Rename payloads carry two comms; both go together.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClearComms;

impl ProcessModifier for ClearComms {
    fn scrub(&self, ctx: &TraceContext, pid: Pid, ts: u64, event: &mut Event) -> bool {
        if connected_to_package(ctx, pid, ts) {
            return false;
        }
        match &mut event.payload {
            Some(EventPayload::TaskNew(new_task)) => clear_comm(&mut new_task.comm),
            Some(EventPayload::TaskFree(free)) => clear_comm(&mut free.comm),
            Some(EventPayload::TaskRename(rename)) => {
                let old = clear_comm(&mut rename.oldcomm);
                let new = clear_comm(&mut rename.newcomm);
                old | new
            }
            None => false,
        }
    }
}

/// Empty the field but keep it present: consumers can still tell a
/// scrubbed comm apart from one that was never recorded.
fn clear_comm(comm: &mut Option<String>) -> bool {
    match comm {
        Some(value) if !value.is_empty() => {
            value.clear();
            true
        }
        _ => false,
    }
}
