//! Process/thread ownership timeline.
//!
//! The capture pipeline observes lifecycle facts (a process opened under
//! some uid, a process closed) out of global order: each CPU emits its
//! events in order, but nothing orders events across CPUs. The timeline
//! therefore splits ingestion from querying: `append` is a plain push,
//! and a single `sort` call freezes the history before any `owner_of`
//! query runs. Batching the sort is much cheaper than keeping an ordered
//! structure alive under interleaved inserts.

use nix::unistd::Pid;
use thiserror::Error;

/// How many parent hops `owner_of` follows when resolving an inherited
/// uid. Bounds the walk if the recorded parent chain contains a cycle.
const MAX_PARENT_DEPTH: usize = 10;

/// A single lifecycle fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Open {
        ts: u64,
        pid: Pid,
        ppid: Pid,
        /// `None` when the owning uid is unknown at spawn time (threads
        /// inherit it from the parent chain at query time).
        uid: Option<u64>,
    },
    Close {
        ts: u64,
        pid: Pid,
    },
}

impl LifecycleEvent {
    pub fn open(ts: u64, pid: Pid, ppid: Pid, uid: u64) -> Self {
        LifecycleEvent::Open {
            ts,
            pid,
            ppid,
            uid: Some(uid),
        }
    }

    /// Open with no uid of its own: ownership resolves through `ppid`.
    pub fn open_inherited(ts: u64, pid: Pid, ppid: Pid) -> Self {
        LifecycleEvent::Open {
            ts,
            pid,
            ppid,
            uid: None,
        }
    }

    pub fn close(ts: u64, pid: Pid) -> Self {
        LifecycleEvent::Close { ts, pid }
    }

    fn pid(&self) -> Pid {
        match self {
            LifecycleEvent::Open { pid, .. } | LifecycleEvent::Close { pid, .. } => *pid,
        }
    }

    fn ts(&self) -> u64 {
        match self {
            LifecycleEvent::Open { ts, .. } | LifecycleEvent::Close { ts, .. } => *ts,
        }
    }
}

/// Result of a point-in-time ownership query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerSlice {
    pub uid: u64,
    pub ppid: Pid,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimelineError {
    #[error("duplicate close event for pid {pid} with no open in between")]
    DuplicateClose { pid: Pid },
}

/// Append-then-freeze ownership history.
///
/// Events live in a flat vector; `sort` orders them by `(pid, ts)` so a
/// query can binary-search the pid's event range and scan it forward.
/// Spans are inclusive-start, exclusive-end: a query at exactly a close
/// timestamp is not covered by the span that close terminates.
#[derive(Debug)]
pub struct Timeline {
    events: Vec<LifecycleEvent>,
    sorted: bool,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            sorted: true,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Push one lifecycle fact. Queries are undefined until the next
    /// `sort` call.
    pub fn append(&mut self, event: LifecycleEvent) {
        self.events.push(event);
        self.sorted = false;
    }

    /// Order the history by `(pid, ts)` and validate it. Idempotent.
    ///
    /// A second close for a pid with no open in between is rejected:
    /// that history is ambiguous and guessing a span for it could leak
    /// another owner's data.
    pub fn sort(&mut self) -> Result<(), TimelineError> {
        self.events.sort_by_key(|event| (event.pid(), event.ts()));
        for pair in self.events.windows(2) {
            if let [
                LifecycleEvent::Close { pid: first, .. },
                LifecycleEvent::Close { pid: second, .. },
            ] = pair
            {
                if first == second {
                    return Err(TimelineError::DuplicateClose { pid: *first });
                }
            }
        }
        self.sorted = true;
        Ok(())
    }

    /// Find the owner of `pid` at `ts`, honoring inclusive-start and
    /// exclusive-end span boundaries. `None` means no span covers the
    /// point: the pid was never opened, not opened yet, or already
    /// closed at `ts`.
    ///
    /// Precondition: the timeline must be sorted. A query on an unsorted
    /// (or rejected) timeline returns `None`: nothing is attributable,
    /// so everything reads as "not owned".
    pub fn owner_of(&self, pid: Pid, ts: u64) -> Option<OwnerSlice> {
        self.resolve(pid, ts, 0)
    }

    fn resolve(&self, pid: Pid, ts: u64, depth: usize) -> Option<OwnerSlice> {
        if !self.sorted || depth > MAX_PARENT_DEPTH {
            return None;
        }
        let mut active = None;
        for event in self.pid_events(pid) {
            if event.ts() > ts {
                break;
            }
            match event {
                LifecycleEvent::Open { ppid, uid, .. } => active = Some((*ppid, *uid)),
                LifecycleEvent::Close { .. } => active = None,
            }
        }
        let (ppid, uid) = active?;
        match uid {
            Some(uid) => Some(OwnerSlice { uid, ppid }),
            // Inherited ownership: ask the parent chain at the same time.
            None => self
                .resolve(ppid, ts, depth + 1)
                .map(|parent| OwnerSlice {
                    uid: parent.uid,
                    ppid,
                }),
        }
    }

    fn pid_events(&self, pid: Pid) -> &[LifecycleEvent] {
        let start = self.events.partition_point(|event| event.pid() < pid);
        let end = self.events.partition_point(|event| event.pid() <= pid);
        &self.events[start..end]
    }
}
