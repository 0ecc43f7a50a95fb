// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

use serde::{Deserialize, Serialize};

/// Job lifecycle states, ordered. The numeric values are part of the
/// storage format and must not be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum JobStatus {
    /// Backend reported a state outside its known table; recoverable.
    Undefined = -1,
    Created = 0,
    Prepared = 1,
    Queued = 2,
    Running = 3,
    /// Backend-side suspension (scheduler hold); polled like Running.
    Suspended = 4,
    /// Backend finished; results not yet retrieved.
    Completed = 5,
    /// Finished cleanly: exit 0, empty stderr.
    Terminated = 6,
    Cancelled = 7,
    /// Finished with exit 0 but non-empty stderr.
    Warning = 8,
    Error = 9,
}

impl JobStatus {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::Undefined),
            0 => Some(Self::Created),
            1 => Some(Self::Prepared),
            2 => Some(Self::Queued),
            3 => Some(Self::Running),
            4 => Some(Self::Suspended),
            5 => Some(Self::Completed),
            6 => Some(Self::Terminated),
            7 => Some(Self::Cancelled),
            8 => Some(Self::Warning),
            9 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Created => "created",
            Self::Prepared => "prepared",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Terminated => "finished",
            Self::Cancelled => "cancelled",
            Self::Warning => "finished with warnings",
            Self::Error => "in error",
        }
    }

    /// Still owned by the daemon: everything strictly before Terminated,
    /// including Completed jobs awaiting result retrieval.
    pub fn is_pending(self) -> bool {
        self < Self::Terminated
    }

    /// End states the daemon never reselects.
    pub fn is_final(self) -> bool {
        self >= Self::Terminated
    }

    /// Cancellation is accepted strictly before Completed.
    pub fn allows_cancel(self) -> bool {
        self < Self::Completed
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Legal state-machine edges. Same-state assignments are handled upstream
/// (they are no-ops, never recorded), so `from == to` is not listed here.
pub fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    match (from, to) {
        // The forward path.
        (Created, Prepared) => true,
        (Prepared, Queued) => true,
        // Backend polling can report any of these from a submitted job.
        (Queued | Running | Suspended, Running | Suspended | Completed | Undefined) => true,
        // Schedulers may cancel or fail a job on their own.
        (Queued | Running | Suspended, Cancelled | Error) => true,
        // Result classification.
        (Completed, Terminated | Warning | Error) => true,
        // Operator cancellation, accepted strictly before Completed.
        (Created | Prepared, Cancelled) => true,
        // Retry exhaustion and unrecoverable dispatch errors.
        (Created | Prepared | Undefined, Error) => true,
        // An Undefined job recovers to whatever the backend reports next.
        (Undefined, Running | Suspended | Completed | Cancelled | Queued) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    #[test]
    fn numeric_round_trip() {
        for status in [
            Undefined, Created, Prepared, Queued, Running, Suspended, Completed, Terminated,
            Cancelled, Warning, Error,
        ] {
            assert_eq!(JobStatus::from_i32(status.as_i32()), Some(status));
        }
        assert_eq!(JobStatus::from_i32(42), None);
    }

    #[test]
    fn pending_covers_everything_before_terminated() {
        assert!(Created.is_pending());
        assert!(Suspended.is_pending());
        assert!(Completed.is_pending());
        assert!(Undefined.is_pending());
        assert!(!Terminated.is_pending());
        assert!(!Cancelled.is_pending());
        assert!(!Warning.is_pending());
        assert!(!Error.is_pending());
    }

    #[test]
    fn forward_path_is_allowed() {
        assert!(transition_allowed(Created, Prepared));
        assert!(transition_allowed(Prepared, Queued));
        assert!(transition_allowed(Queued, Running));
        assert!(transition_allowed(Running, Completed));
        assert!(transition_allowed(Completed, Terminated));
        assert!(transition_allowed(Completed, Warning));
        assert!(transition_allowed(Completed, Error));
    }

    #[test]
    fn no_skipping_or_rewinding_the_setup_phase() {
        assert!(!transition_allowed(Created, Queued));
        assert!(!transition_allowed(Created, Running));
        assert!(!transition_allowed(Prepared, Running));
        assert!(!transition_allowed(Running, Prepared));
        assert!(!transition_allowed(Completed, Running));
        assert!(!transition_allowed(Terminated, Running));
    }

    #[test]
    fn cancel_only_before_completed() {
        assert!(transition_allowed(Created, Cancelled));
        assert!(transition_allowed(Prepared, Cancelled));
        assert!(transition_allowed(Queued, Cancelled));
        assert!(transition_allowed(Running, Cancelled));
        assert!(transition_allowed(Suspended, Cancelled));
        assert!(!transition_allowed(Completed, Cancelled));
        assert!(!transition_allowed(Terminated, Cancelled));
        assert!(!transition_allowed(Error, Cancelled));
    }

    #[test]
    fn undefined_recovers() {
        assert!(transition_allowed(Running, Undefined));
        assert!(transition_allowed(Undefined, Running));
        assert!(transition_allowed(Undefined, Completed));
        assert!(transition_allowed(Undefined, Error));
    }

    #[test]
    fn final_states_have_no_outgoing_edges() {
        for from in [Terminated, Cancelled, Warning, Error] {
            for to in [
                Undefined, Created, Prepared, Queued, Running, Suspended, Completed, Terminated,
                Cancelled, Warning, Error,
            ] {
                if from != to {
                    assert!(!transition_allowed(from, to), "{from:?} -> {to:?}");
                }
            }
        }
    }
}
