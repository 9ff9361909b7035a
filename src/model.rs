//! The application's data layer: the records that get queried from and
//! written into the store.
//!
//! Simple helper functions and constructors are allowed, but they should be
//! kept extremely simple, with preference for any and all domain logic to
//! be offloaded to a mediator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json;

/// A job id. Newtyped over `String` so that a bare selection-language
/// fragment can never be silently substituted for a resolved id, and so
/// that id values read unambiguously in every mediator signature.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new<S: Into<String>>(s: S) -> JobId {
        JobId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'a> From<&'a str> for JobId {
    fn from(s: &'a str) -> JobId {
        JobId(s.to_owned())
    }
}

/// The "fully qualified name" spec.md's `callable_ref` describes. A plain
/// `String` rather than a function pointer: the callable has to be
/// re-resolvable from nothing but this value after a process restart (see
/// `registry`), so the name *is* the reference, not a handle to one.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct CallableRef(pub String);

impl fmt::Display for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The JSON-like value that job arguments are built from. `Promise`
/// embeds a reference to another job's eventual result; every other
/// variant is left untouched by the C4 argument-rewriting walk except that
/// it recurses into `Array` and `Object`.
///
/// JSON has no native set type, so a "set" argument (spec.md §4.3 mentions
/// sequences, mappings, *and* sets) is represented as an `Array` tagged
/// `is_set: true` at the object boundary that produced it; `jobforge`
/// itself never constructs one, only preserves it on round-trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ArgTree {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<ArgTree>),
    Set(Vec<ArgTree>),
    Object(BTreeMap<String, ArgTree>),
    Promise(JobId),
}

impl ArgTree {
    pub fn string<S: Into<String>>(s: S) -> ArgTree {
        ArgTree::String(s.into())
    }

    /// Walks the tree, replacing every `Promise` with nothing (promises are
    /// materialised separately at execution time) but collecting the set
    /// of referenced job ids along the way. Used by C4 to derive
    /// `Job.children` at definition time.
    pub fn collect_children(&self, out: &mut BTreeSet<JobId>) {
        match *self {
            ArgTree::Promise(ref id) => {
                out.insert(id.clone());
            }
            ArgTree::Array(ref items) | ArgTree::Set(ref items) => {
                for item in items {
                    item.collect_children(out);
                }
            }
            ArgTree::Object(ref map) => {
                for v in map.values() {
                    v.collect_children(out);
                }
            }
            _ => {}
        }
    }
}

/// A named, serialisable description of one unit of computation.
///
/// Invariants (spec.md §3):
/// 1. `children` is exactly the set of promises referenced, transitively,
///    by `args`/`kwargs` — derived once at definition time.
/// 2. `parents(C) = { J : C ∈ J.children }`, maintained by the graph index
///    as the inverse of this job's `children`.
/// 6. `defined_by` starts with the root-most definer and ends with the
///    direct definer; `["root"]` for a top-level job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub callable_ref: CallableRef,
    pub args: Vec<ArgTree>,
    pub kwargs: BTreeMap<String, ArgTree>,
    pub children: BTreeSet<JobId>,
    /// Maps a dynamic parent's own id to the child ids it produced on its
    /// last successful run (spec.md invariant 5). A static job's map is
    /// always empty.
    pub dynamic_children: BTreeMap<JobId, BTreeSet<JobId>>,
    pub defined_by: Vec<JobId>,
    pub parents: BTreeSet<JobId>,
    pub dynamic_parents: BTreeSet<JobId>,
    pub defines: BTreeSet<JobId>,
    pub needs_context: bool,
    pub is_dynamic: bool,
    /// Bumped whenever this job is redefined with a different
    /// `(callable_ref, args, kwargs)`; used by C5 to detect "definition
    /// changed since I last ran" staleness that isn't otherwise visible in
    /// `Cache`.
    pub definition_timestamp: i64,
}

impl Job {
    /// Two jobs have an "identical definition" (invariant 7) iff their
    /// callable and arguments match; everything else is derived or
    /// bookkeeping.
    pub fn same_definition(&self, other: &Job) -> bool {
        self.callable_ref == other.callable_ref
            && self.args == other.args
            && self.kwargs == other.kwargs
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CacheState {
    NotStarted,
    InProgress,
    Done,
    Failed,
    Blocked,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            CacheState::NotStarted => "NOT_STARTED",
            CacheState::InProgress => "IN_PROGRESS",
            CacheState::Done => "DONE",
            CacheState::Failed => "FAILED",
            CacheState::Blocked => "BLOCKED",
        };
        write!(f, "{}", s)
    }
}

/// The run-time state of a job. Never holds the return value itself —
/// see `UserObject`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cache {
    pub state: CacheState,
    /// Monotonic wall time of the last transition to `Done`, in
    /// nanoseconds since an arbitrary epoch fixed at store creation. Only
    /// meaningful relative to other timestamps in the same store.
    pub timestamp: Option<i64>,
    pub walltime_ns: Option<u64>,
    pub cputime_ns: Option<u64>,
    pub exception: Option<String>,
    pub backtrace: Option<String>,
    pub captured_stdout: Option<String>,
    pub captured_stderr: Option<String>,
    /// Frozen snapshot of each child's `Done`-timestamp the moment this
    /// job ran, used by C5 rule 5 to detect a child that changed after.
    pub hashes_of_children: BTreeMap<JobId, i64>,
}

impl Cache {
    pub fn not_started() -> Cache {
        Cache {
            state: CacheState::NotStarted,
            timestamp: None,
            walltime_ns: None,
            cputime_ns: None,
            exception: None,
            backtrace: None,
            captured_stdout: None,
            captured_stderr: None,
            hashes_of_children: BTreeMap::new(),
        }
    }
}

/// The serialised return value of a `Done` job, stored apart from `Cache`
/// so result blobs can be garbage-collected without losing run history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserObject {
    pub job_id: JobId,
    pub value: ArgTree,
    pub created_at: DateTime<Utc>,
}

/// A single entry in a job's rolling progress stack.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub task_name: String,
    pub done: u64,
    pub total: u64,
}

/// Per-job progress, overwritten wholesale by the worker currently running
/// it. Optional: most jobs never populate this.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub stack: Vec<ProgressEntry>,
}
