//! Small helpers shared across mediators. `set_snapshot` (Postgres
//! repeatable-read snapshot pinning) had no counterpart once the store
//! moved off diesel/Postgres, so it's dropped here rather than carried
//! forward as dead code; `log_timed` is re-exported from `time_helpers` so
//! every mediator can keep writing `common::log_timed` at its `run()`
//! entry point the way `podcore`'s mediators do.

pub use time_helpers::log_timed;

pub fn thread_name(n: u32) -> String {
    format!("thread_{:03}", n).to_string()
}
