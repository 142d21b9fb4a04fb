//! # Process event redaction
//!
//! This crate removes privacy sensitive process lifecycle data from
//! captured trace records before a trace leaves the device, so that an
//! unprivileged consumer only observes data belonging to one authorized
//! package (identified by a numeric uid).
//!
//! # General design
//!
//! Two subsystems cooperate per event:
//!
//! - The [`Timeline`](timeline::Timeline) answers "which uid owned
//!   process P at time T" from a batch of out-of-order lifecycle facts,
//!   with inclusive-start/exclusive-end span semantics. It is built with
//!   repeated `append` calls and one `sort` before any query.
//! - The [`RedactProcessEvents`](redact::RedactProcessEvents) redactor
//!   walks one serialized record, classifies each event by its lifecycle
//!   payload and applies two independently configured strategies: a
//!   [`ProcessFilter`](policy::ProcessFilter) deciding whether the
//!   payload survives, and a [`ProcessModifier`](policy::ProcessModifier)
//!   scrubbing sensitive fields of surviving payloads. A dropped payload
//!   leaves its envelope event in place so bundle-level data other
//!   consumers rely on stays intact.
//!
//! Session state (the protected uid, the timeline) lives in a
//! [`TraceContext`](context::TraceContext) owned by the surrounding
//! pipeline: one context per trace session, passed by shared reference,
//! no state shared across sessions.
//!
//! Failure is always surfaced, never papered over: a context missing its
//! uid or timeline, or a buffer that does not parse, fails the call with
//! the input buffer untouched. Privacy defaults fail closed.

pub mod context;
pub mod policy;
pub mod redact;
pub mod timeline;

pub use context::TraceContext;
pub use policy::{AllowAll, ClearComms, ConnectedToPackage, DoNothing};
pub use redact::{RedactError, RedactProcessEvents};
pub use timeline::{LifecycleEvent, OwnerSlice, Timeline, TimelineError};

pub use nix::unistd::Pid;
