//! A full-store scan over the invariants spec.md §3 requires always hold.
//! Used by the `check_consistency` command surface (§6) and, when
//! `Config.debug_check_invariants` is set, re-run after every commit a
//! `Session` makes.
//!
//! Invariant 1 (`children` is exactly what the argument-rewriting walk
//! derived) and invariant 7 (redefinition idempotency) are behavioural
//! properties of `mediators::definer`, not structural facts recoverable
//! from a point-in-time scan, so they're exercised as mediator unit tests
//! rather than checked here (see `DESIGN.md`).

use std::collections::BTreeSet;

use errors::*;
use model::{CacheState, JobId};
use store::Store;

/// Every violation found, as a human-readable line. Empty means the store
/// is consistent.
pub fn check(store: &Store) -> Result<Vec<String>> {
    let mut violations = Vec::new();
    let ids: Vec<JobId> = ::store::all_job_ids(store)?.into_iter().map(JobId::new).collect();
    let id_set: BTreeSet<JobId> = ids.iter().cloned().collect();

    for id in &ids {
        let job = match ::store::get_job(store, id.as_str())? {
            Some(j) => j,
            None => continue,
        };

        // Invariant 2: parents/children are mutual inverses.
        for child in &job.children {
            if !id_set.contains(child) {
                violations.push(format!("{}: child {} does not exist", id, child));
                continue;
            }
            if let Some(c) = ::store::get_job(store, child.as_str())? {
                if !c.parents.contains(id) {
                    violations.push(format!("{}: child {} does not list it as a parent", id, child));
                }
            }
        }
        for parent in &job.parents {
            match ::store::get_job(store, parent.as_str())? {
                Some(p) => {
                    if !p.children.contains(id) {
                        violations.push(format!("{}: parent {} does not list it as a child", id, parent));
                    }
                }
                None => violations.push(format!("{}: parent {} does not exist", id, parent)),
            }
        }

        // Invariant 5 (the dynamic-parent/dynamic-child half).
        for dp in &job.dynamic_parents {
            match ::store::get_job(store, dp.as_str())? {
                Some(p) => {
                    let lists_it = p.dynamic_children.get(dp).map_or(false, |s| s.contains(id));
                    if !lists_it {
                        violations.push(format!(
                            "{}: dynamic parent {} does not record it as a dynamic child",
                            id, dp
                        ));
                    }
                }
                None => violations.push(format!("{}: dynamic parent {} does not exist", id, dp)),
            }
        }

        // `defines`/`defined_by` consistency (invariant 6's structural half).
        if let Some(definer) = job.defined_by.last() {
            if definer.as_str() != "root" {
                match ::store::get_job(store, definer.as_str())? {
                    Some(d) => {
                        if !d.defines.contains(id) {
                            violations.push(format!(
                                "{}: definer {} does not list it in defines",
                                id, definer
                            ));
                        }
                    }
                    None => violations.push(format!("{}: definer {} does not exist", id, definer)),
                }
            }
        }
        for defined in &job.defines {
            match ::store::get_job(store, defined.as_str())? {
                Some(d) => {
                    if d.defined_by.last() != Some(id) {
                        violations.push(format!(
                            "{}: defines {} but its defined_by does not end with {}",
                            id, defined, id
                        ));
                    }
                }
                None => violations.push(format!("{}: defines {} which does not exist", id, defined)),
            }
        }

        let cache = match ::store::get_cache(store, id.as_str())? {
            Some(c) => c,
            None => {
                violations.push(format!("{}: has no Cache record", id));
                continue;
            }
        };

        match cache.state {
            // Invariant 4.
            CacheState::Done => {
                if cache.timestamp.is_none() {
                    violations.push(format!("{}: DONE but has no timestamp", id));
                }
                if ::store::get_user_object(store, id.as_str())?.is_none() {
                    violations.push(format!("{}: DONE but has no UserObject", id));
                }
            }
            // Invariant 3.
            CacheState::Blocked => {
                let has_bad_child = job
                    .children
                    .iter()
                    .chain(job.dynamic_children.values().flat_map(|s| s.iter()))
                    .any(|c| is_failed_or_blocked(store, c).unwrap_or(false));
                if !has_bad_child {
                    violations.push(format!("{}: BLOCKED but no child is FAILED/BLOCKED", id));
                }
            }
            _ => {}
        }

        // Invariant 5 (existence half): a dynamic job's recorded children
        // must exist and trace their definer back to it.
        if job.is_dynamic && cache.state == CacheState::Done {
            if let Some(set) = job.dynamic_children.get(id) {
                for child in set {
                    if ::store::get_job(store, child.as_str())?.is_none() {
                        violations.push(format!(
                            "{}: dynamic child {} recorded but does not exist",
                            id, child
                        ));
                    }
                }
            }
        }
    }

    Ok(violations)
}

/// Fails the run as `CompmakeBug` if `check` finds anything — the
/// `raise_if_error=1` mode of the `check_consistency` command (§6) and
/// the behaviour `Config.debug_check_invariants` asks for after a commit.
pub fn check_or_bail(store: &Store) -> Result<Vec<String>> {
    let violations = check(store)?;
    if !violations.is_empty() {
        bail!(ErrorKind::CompmakeBug(format!(
            "store invariants violated:\n{}",
            violations.join("\n")
        )));
    }
    Ok(violations)
}

fn is_failed_or_blocked(store: &Store, id: &JobId) -> Result<bool> {
    let state = ::store::get_cache(store, id.as_str())?.map(|c| c.state);
    Ok(state == Some(CacheState::Failed) || state == Some(CacheState::Blocked))
}
