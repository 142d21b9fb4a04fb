//! Process event redactor: the per-record entry point.

use thiserror::Error;
use trace_wire::{Record, WireError};

use crate::context::TraceContext;
use crate::policy::{AllowAll, DoNothing, ProcessFilter, ProcessModifier};

use nix::unistd::Pid;

#[derive(Debug, Error)]
pub enum RedactError {
    #[error("no package uid set on the trace context")]
    MissingPackageUid,
    #[error("no timeline set on the trace context")]
    MissingTimeline,
    #[error("empty record buffer")]
    EmptyPacket,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("lifecycle payload is missing its {field} field")]
    MissingField { field: &'static str },
}

/// Rewrites one serialized record so that process lifecycle events only
/// expose data belonging to the protected package.
///
/// Per event with a recognized lifecycle payload, the configured filter
/// decides keep or drop at the event's `(pid, timestamp)`. A dropped
/// payload is removed from its envelope event, never the whole event:
/// downstream consumers key bundle-level data (cpu, counts) off the
/// envelope, so deleting it would corrupt them. A kept payload is handed
/// to the configured modifier for field-level scrubbing. Events with no
/// recognized payload belong to other redaction primitives and pass
/// through unexamined.
pub struct RedactProcessEvents {
    filter: Box<dyn ProcessFilter>,
    modifier: Box<dyn ProcessModifier>,
}

impl Default for RedactProcessEvents {
    fn default() -> Self {
        // Harmless no-ops: an unconfigured redactor is inert, not lossy.
        Self {
            filter: Box::new(AllowAll),
            modifier: Box::new(DoNothing),
        }
    }
}

impl RedactProcessEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the keep/drop strategy. Last write wins.
    pub fn set_filter(&mut self, filter: impl ProcessFilter + 'static) {
        self.filter = Box::new(filter);
    }

    /// Replace the scrub strategy. Last write wins.
    pub fn set_modifier(&mut self, modifier: impl ProcessModifier + 'static) {
        self.modifier = Box::new(modifier);
    }

    /// Redact `packet` in place. On any error the buffer is untouched;
    /// it is only rewritten after the whole record processed cleanly.
    pub fn transform(&self, ctx: &TraceContext, packet: &mut Vec<u8>) -> Result<(), RedactError> {
        if ctx.package_uid.is_none() {
            return Err(RedactError::MissingPackageUid);
        }
        if ctx.timeline.is_none() {
            return Err(RedactError::MissingTimeline);
        }
        if packet.is_empty() {
            return Err(RedactError::EmptyPacket);
        }

        let mut record = Record::decode(packet)?;
        let Some(bundle) = record.process_events.as_mut() else {
            // Nothing process-lifecycle related in this record.
            return Ok(());
        };

        let mut dropped = 0_usize;
        let mut scrubbed = 0_usize;
        for event in &mut bundle.events {
            let (ts, pid) = {
                let Some(payload) = &event.payload else {
                    continue;
                };
                (event.timestamp, payload.pid())
            };
            // Redaction cannot be guaranteed for a payload whose identity
            // fields cannot be located; fail the whole call.
            let ts = ts.ok_or(RedactError::MissingField { field: "timestamp" })?;
            let pid = pid.ok_or(RedactError::MissingField { field: "pid" })?;
            let pid = Pid::from_raw(pid);

            if self.filter.keep(ctx, pid, ts) {
                if self.modifier.scrub(ctx, pid, ts, event) {
                    scrubbed += 1;
                }
            } else {
                event.payload = None;
                dropped += 1;
            }
        }

        if dropped == 0 && scrubbed == 0 {
            return Ok(());
        }
        log::trace!("process event redaction: {dropped} payloads dropped, {scrubbed} scrubbed");
        packet.clear();
        record.encode(packet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ClearComms, ConnectedToPackage};
    use crate::timeline::{LifecycleEvent, Timeline};
    use trace_wire::{Event, EventBundle, EventPayload, TaskFree, TaskNew, TaskRename};

    const CPU: u32 = 1;

    const UID_A: u64 = 1;
    const UID_B: u64 = 2;

    const NO_PARENT: Pid = Pid::from_raw(10);
    const PID_A: Pid = Pid::from_raw(11);
    const PID_B: Pid = Pid::from_raw(12);

    const TIME_A: u64 = 0;
    const TIME_B: u64 = 1000;

    const COMM_A: &str = "comm-a";
    const COMM_B: &str = "comm-b";

    fn test_timeline() -> Timeline {
        let mut timeline = Timeline::new();
        timeline.append(LifecycleEvent::open(TIME_A, PID_A, NO_PARENT, UID_A));
        timeline.append(LifecycleEvent::open(TIME_A, PID_B, NO_PARENT, UID_B));
        timeline.sort().unwrap();
        timeline
    }

    fn test_context(package_uid: u64) -> TraceContext {
        TraceContext {
            package_uid: Some(package_uid),
            package_name: None,
            timeline: Some(test_timeline()),
        }
    }

    fn packet_with(payload: EventPayload) -> Vec<u8> {
        let record = Record {
            process_events: Some(EventBundle {
                cpu: Some(CPU),
                events: vec![Event {
                    timestamp: Some(TIME_B),
                    pid: Some(PID_A.as_raw()),
                    payload: Some(payload),
                    unknown: Vec::new(),
                }],
                unknown: Vec::new(),
            }),
            unknown: Vec::new(),
        };
        let mut buf = Vec::new();
        record.encode(&mut buf);
        buf
    }

    fn new_task_packet() -> Vec<u8> {
        packet_with(EventPayload::TaskNew(TaskNew {
            pid: Some(PID_A.as_raw()),
            comm: Some(COMM_A.to_string()),
            clone_flags: Some(0),
            oom_score_adj: Some(0),
            unknown: Vec::new(),
        }))
    }

    fn process_free_packet() -> Vec<u8> {
        packet_with(EventPayload::TaskFree(TaskFree {
            pid: Some(PID_A.as_raw()),
            comm: Some(COMM_A.to_string()),
            prio: Some(0),
            unknown: Vec::new(),
        }))
    }

    fn rename_packet() -> Vec<u8> {
        packet_with(EventPayload::TaskRename(TaskRename {
            pid: Some(PID_A.as_raw()),
            oldcomm: Some(COMM_A.to_string()),
            newcomm: Some(COMM_B.to_string()),
            oom_score_adj: Some(0),
            unknown: Vec::new(),
        }))
    }

    fn only_event(packet: &[u8]) -> Event {
        let record = Record::decode(packet).unwrap();
        let bundle = record.process_events.unwrap();
        assert_eq!(bundle.events.len(), 1);
        bundle.events.into_iter().next().unwrap()
    }

    #[test]
    fn rejects_missing_package_uid() {
        let redact = RedactProcessEvents::new();
        let ctx = TraceContext {
            timeline: Some(Timeline::new()),
            ..TraceContext::new()
        };
        let mut packet = new_task_packet();
        let original = packet.clone();

        assert!(matches!(
            redact.transform(&ctx, &mut packet),
            Err(RedactError::MissingPackageUid)
        ));
        assert_eq!(packet, original);
    }

    #[test]
    fn rejects_missing_timeline() {
        let redact = RedactProcessEvents::new();
        let ctx = TraceContext {
            package_uid: Some(UID_A),
            ..TraceContext::new()
        };
        let mut packet = new_task_packet();
        let original = packet.clone();

        assert!(matches!(
            redact.transform(&ctx, &mut packet),
            Err(RedactError::MissingTimeline)
        ));
        assert_eq!(packet, original);
    }

    #[test]
    fn rejects_empty_packet() {
        let redact = RedactProcessEvents::new();
        let ctx = test_context(UID_A);
        let mut packet = Vec::new();

        assert!(matches!(
            redact.transform(&ctx, &mut packet),
            Err(RedactError::EmptyPacket)
        ));
        assert!(packet.is_empty());
    }

    #[test]
    fn rejects_garbage_packet_without_mutation() {
        let redact = RedactProcessEvents::new();
        let ctx = test_context(UID_A);
        let mut packet = b"\xff\xff\xff\xff\xff".to_vec();
        let original = packet.clone();

        assert!(matches!(
            redact.transform(&ctx, &mut packet),
            Err(RedactError::Wire(_))
        ));
        assert_eq!(packet, original);
    }

    #[test]
    fn record_without_bundle_is_a_no_op() {
        let redact = RedactProcessEvents::new();
        let ctx = test_context(UID_A);

        // A record made only of fields owned by other redaction stages.
        let record = Record::default();
        let mut packet = Vec::new();
        record.encode(&mut packet);
        // An empty record encodes to nothing; pad it with an unknown
        // field so the buffer is non-empty and well formed.
        trace_wire_pad(&mut packet);
        let original = packet.clone();

        redact.transform(&ctx, &mut packet).unwrap();
        assert_eq!(packet, original);
    }

    // Encode an opaque top-level field (number 15, varint 7).
    fn trace_wire_pad(out: &mut Vec<u8>) {
        out.push((15 << 3) as u8);
        out.push(7);
    }

    #[test]
    fn missing_payload_pid_fails_the_call() {
        let redact = RedactProcessEvents::new();
        let ctx = test_context(UID_A);
        let mut packet = packet_with(EventPayload::TaskNew(TaskNew {
            pid: None,
            comm: Some(COMM_A.to_string()),
            clone_flags: None,
            oom_score_adj: None,
            unknown: Vec::new(),
        }));
        let original = packet.clone();

        assert!(matches!(
            redact.transform(&ctx, &mut packet),
            Err(RedactError::MissingField { field: "pid" })
        ));
        assert_eq!(packet, original);
    }

    #[test]
    fn new_task_keeps_comm_in_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_modifier(ClearComms);
        let ctx = test_context(UID_A);

        let mut packet = new_task_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        let Some(EventPayload::TaskNew(new_task)) = event.payload else {
            panic!("task_newtask payload expected");
        };
        assert_eq!(new_task.pid, Some(PID_A.as_raw()));
        assert_eq!(new_task.comm.as_deref(), Some(COMM_A));
    }

    #[test]
    fn new_task_clears_comm_outside_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_modifier(ClearComms);
        let ctx = test_context(UID_B);

        let mut packet = new_task_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        let Some(EventPayload::TaskNew(new_task)) = event.payload else {
            panic!("task_newtask payload expected");
        };
        // The payload survives with its identity; only the comm is gone.
        assert_eq!(new_task.pid, Some(PID_A.as_raw()));
        assert_eq!(new_task.comm.as_deref(), Some(""));
    }

    #[test]
    fn new_task_kept_in_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_filter(ConnectedToPackage);
        let ctx = test_context(UID_A);

        let mut packet = new_task_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        assert!(matches!(event.payload, Some(EventPayload::TaskNew(_))));
    }

    #[test]
    fn new_task_dropped_outside_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_filter(ConnectedToPackage);
        let ctx = test_context(UID_B);

        let mut packet = new_task_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        // The payload is removed but the envelope event remains.
        let event = only_event(&packet);
        assert_eq!(event.payload, None);
        assert_eq!(event.timestamp, Some(TIME_B));
        assert_eq!(event.pid, Some(PID_A.as_raw()));
    }

    #[test]
    fn process_free_keeps_comm_in_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_modifier(ClearComms);
        let ctx = test_context(UID_A);

        let mut packet = process_free_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        let Some(EventPayload::TaskFree(free)) = event.payload else {
            panic!("sched_process_free payload expected");
        };
        assert_eq!(free.pid, Some(PID_A.as_raw()));
        assert_eq!(free.comm.as_deref(), Some(COMM_A));
    }

    #[test]
    fn process_free_clears_comm_outside_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_modifier(ClearComms);
        let ctx = test_context(UID_B);

        let mut packet = process_free_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        let Some(EventPayload::TaskFree(free)) = event.payload else {
            panic!("sched_process_free payload expected");
        };
        assert_eq!(free.pid, Some(PID_A.as_raw()));
        assert_eq!(free.comm.as_deref(), Some(""));
    }

    #[test]
    fn process_free_clears_comm_at_close_time() {
        let mut redact = RedactProcessEvents::new();
        redact.set_modifier(ClearComms);

        // The process dies exactly when the free event fires. Spans are
        // exclusive at the close edge, so even the owning package does
        // not cover the event and the comm goes.
        let mut ctx = test_context(UID_A);
        let timeline = ctx.timeline.as_mut().unwrap();
        timeline.append(LifecycleEvent::close(TIME_B, PID_A));
        timeline.sort().unwrap();

        let mut packet = process_free_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        let Some(EventPayload::TaskFree(free)) = event.payload else {
            panic!("sched_process_free payload expected");
        };
        assert_eq!(free.pid, Some(PID_A.as_raw()));
        assert_eq!(free.comm.as_deref(), Some(""));
    }

    #[test]
    fn process_free_dropped_outside_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_filter(ConnectedToPackage);
        let ctx = test_context(UID_B);

        let mut packet = process_free_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        assert_eq!(event.payload, None);
    }

    #[test]
    fn rename_keeps_both_comms_in_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_modifier(ClearComms);
        let ctx = test_context(UID_A);

        let mut packet = rename_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        let Some(EventPayload::TaskRename(rename)) = event.payload else {
            panic!("task_rename payload expected");
        };
        assert_eq!(rename.pid, Some(PID_A.as_raw()));
        assert_eq!(rename.oldcomm.as_deref(), Some(COMM_A));
        assert_eq!(rename.newcomm.as_deref(), Some(COMM_B));
    }

    #[test]
    fn rename_clears_both_comms_outside_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_modifier(ClearComms);
        let ctx = test_context(UID_B);

        let mut packet = rename_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        let Some(EventPayload::TaskRename(rename)) = event.payload else {
            panic!("task_rename payload expected");
        };
        // Never just one of the two.
        assert_eq!(rename.pid, Some(PID_A.as_raw()));
        assert_eq!(rename.oldcomm.as_deref(), Some(""));
        assert_eq!(rename.newcomm.as_deref(), Some(""));
    }

    #[test]
    fn rename_dropped_outside_package() {
        let mut redact = RedactProcessEvents::new();
        redact.set_filter(ConnectedToPackage);
        let ctx = test_context(UID_B);

        let mut packet = rename_packet();
        redact.transform(&ctx, &mut packet).unwrap();

        let event = only_event(&packet);
        assert_eq!(event.payload, None);
    }

    #[test]
    fn unrecognized_payloads_pass_through() {
        let mut redact = RedactProcessEvents::new();
        redact.set_filter(ConnectedToPackage);
        redact.set_modifier(ClearComms);
        // Nothing in the bundle belongs to the package.
        let ctx = test_context(UID_B);

        // An envelope event whose payload lives in a field this stage
        // does not recognize; it is some other primitive's business.
        let record = Record {
            process_events: Some(EventBundle {
                cpu: Some(CPU),
                events: vec![Event {
                    timestamp: Some(TIME_B),
                    pid: Some(PID_A.as_raw()),
                    payload: None,
                    unknown: vec![trace_wire::Bytes::from_static(&[
                        (9 << 3) | 2, // field 9, length-delimited
                        3,
                        b'x',
                        b'y',
                        b'z',
                    ])],
                }],
                unknown: Vec::new(),
            }),
            unknown: Vec::new(),
        };
        let mut packet = Vec::new();
        record.encode(&mut packet);
        let original = packet.clone();

        redact.transform(&ctx, &mut packet).unwrap();
        assert_eq!(packet, original);
    }

    #[test]
    fn last_configured_strategy_wins() {
        let mut redact = RedactProcessEvents::new();
        redact.set_filter(ConnectedToPackage);
        redact.set_filter(AllowAll);
        let ctx = test_context(UID_B);

        // With ConnectedToPackage the payload would be dropped; the
        // later AllowAll replaced it.
        let mut packet = new_task_packet();
        redact.transform(&ctx, &mut packet).unwrap();
        let event = only_event(&packet);
        assert!(matches!(event.payload, Some(EventPayload::TaskNew(_))));
    }

    #[test]
    fn redacting_already_redacted_output_succeeds() {
        let mut redact = RedactProcessEvents::new();
        redact.set_filter(ConnectedToPackage);
        redact.set_modifier(ClearComms);
        let ctx = test_context(UID_B);

        let mut packet = rename_packet();
        redact.transform(&ctx, &mut packet).unwrap();
        let first_pass = packet.clone();

        // Dropping an already dropped payload and clearing an already
        // empty comm are both clean no-ops.
        redact.transform(&ctx, &mut packet).unwrap();
        assert_eq!(packet, first_pass);
    }

    #[test]
    fn mixed_bundle_is_redacted_per_event() {
        let mut redact = RedactProcessEvents::new();
        redact.set_filter(ConnectedToPackage);
        let ctx = test_context(UID_A);

        let record = Record {
            process_events: Some(EventBundle {
                cpu: Some(CPU),
                events: vec![
                    Event {
                        timestamp: Some(TIME_B),
                        pid: Some(PID_A.as_raw()),
                        payload: Some(EventPayload::TaskNew(TaskNew {
                            pid: Some(PID_A.as_raw()),
                            comm: Some(COMM_A.to_string()),
                            clone_flags: Some(0),
                            oom_score_adj: Some(0),
                            unknown: Vec::new(),
                        })),
                        unknown: Vec::new(),
                    },
                    Event {
                        timestamp: Some(TIME_B),
                        pid: Some(PID_B.as_raw()),
                        payload: Some(EventPayload::TaskNew(TaskNew {
                            pid: Some(PID_B.as_raw()),
                            comm: Some(COMM_B.to_string()),
                            clone_flags: Some(0),
                            oom_score_adj: Some(0),
                            unknown: Vec::new(),
                        })),
                        unknown: Vec::new(),
                    },
                ],
                unknown: Vec::new(),
            }),
            unknown: Vec::new(),
        };
        let mut packet = Vec::new();
        record.encode(&mut packet);

        redact.transform(&ctx, &mut packet).unwrap();

        let bundle = Record::decode(&packet).unwrap().process_events.unwrap();
        assert_eq!(bundle.cpu, Some(CPU));
        assert_eq!(bundle.events.len(), 2);
        // PID_A belongs to UID_A: kept. PID_B belongs to UID_B: dropped,
        // envelope retained.
        assert!(bundle.events[0].payload.is_some());
        assert_eq!(bundle.events[1].payload, None);
        assert_eq!(bundle.events[1].pid, Some(PID_B.as_raw()));
    }
}
