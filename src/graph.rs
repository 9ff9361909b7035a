//! C2: the graph index — the inverse relations (`parents`, `dynamic_parents`,
//! `defines`) that C2's invariant 2 requires stay consistent with the
//! forward relations C4/C8 write, plus `definition_closure`.
//!
//! Kept as free functions over a `Store` rather than a type of its own:
//! there is no in-memory graph here, only operations that read and write
//! the edges already embedded in `Job` records (spec.md §9: "parent/child
//! are relations, never ownership... in-memory views are indices").

use std::collections::{BTreeSet, VecDeque};

use errors::*;
use model::JobId;
use store::Store;

fn load(store: &Store, id: &JobId) -> Result<::model::Job> {
    ::store::get_job(store, id.as_str())?
        .ok_or_else(|| ErrorKind::DbError(format!("job {} not found", id)).into())
}

/// Adds the static edge `parent -> child`, updating both `parent.children`
/// and `child.parents` so invariant 2 holds immediately.
pub fn add_child_edge(store: &Store, parent: &JobId, child: &JobId) -> Result<()> {
    let mut p = load(store, parent)?;
    p.children.insert(child.clone());
    ::store::set_job(store, &p)?;

    let mut c = load(store, child)?;
    c.parents.insert(parent.clone());
    ::store::set_job(store, &c)?;
    Ok(())
}

pub fn remove_child_edge(store: &Store, parent: &JobId, child: &JobId) -> Result<()> {
    let mut p = load(store, parent)?;
    p.children.remove(child);
    ::store::set_job(store, &p)?;

    if let Some(mut c) = ::store::get_job(store, child.as_str())? {
        c.parents.remove(parent);
        ::store::set_job(store, &c)?;
    }
    Ok(())
}

/// Adds the dynamic edge `parent -> child` (spec.md invariant 5):
/// `parent.dynamic_children[parent]` gains `child`, `child.dynamic_parents`
/// gains `parent`.
pub fn add_dynamic_child_edge(store: &Store, parent: &JobId, child: &JobId) -> Result<()> {
    let mut p = load(store, parent)?;
    p.dynamic_children
        .entry(parent.clone())
        .or_insert_with(BTreeSet::new)
        .insert(child.clone());
    ::store::set_job(store, &p)?;

    let mut c = load(store, child)?;
    c.dynamic_parents.insert(parent.clone());
    ::store::set_job(store, &c)?;
    Ok(())
}

pub fn remove_dynamic_child_edge(store: &Store, parent: &JobId, child: &JobId) -> Result<()> {
    let mut p = load(store, parent)?;
    if let Some(set) = p.dynamic_children.get_mut(parent) {
        set.remove(child);
    }
    ::store::set_job(store, &p)?;

    if let Some(mut c) = ::store::get_job(store, child.as_str())? {
        c.dynamic_parents.remove(parent);
        ::store::set_job(store, &c)?;
    }
    Ok(())
}

/// Adds the "owns the definition of" edge: `owner.defines` gains `owned`.
/// `owned.defined_by` is set directly by the caller at creation time (C4),
/// since it is a stack, not a set, and is never mutated afterwards.
pub fn add_defines_edge(store: &Store, owner: &JobId, owned: &JobId) -> Result<()> {
    let mut o = load(store, owner)?;
    o.defines.insert(owned.clone());
    ::store::set_job(store, &o)?;
    Ok(())
}

pub fn remove_defines_edge(store: &Store, owner: &JobId, owned: &JobId) -> Result<()> {
    if let Some(mut o) = ::store::get_job(store, owner.as_str())? {
        o.defines.remove(owned);
        ::store::set_job(store, &o)?;
    }
    Ok(())
}

pub fn parents_of(store: &Store, id: &JobId) -> Result<BTreeSet<JobId>> {
    Ok(load(store, id)?.parents)
}

pub fn dynamic_parents_of(store: &Store, id: &JobId) -> Result<BTreeSet<JobId>> {
    Ok(load(store, id)?.dynamic_parents)
}

pub fn defines_of(store: &Store, id: &JobId) -> Result<BTreeSet<JobId>> {
    Ok(load(store, id)?.defines)
}

/// Every job transitively defined by `roots`, including `roots`
/// themselves: a breadth-first walk over `defines` edges.
pub fn definition_closure(store: &Store, roots: &BTreeSet<JobId>) -> Result<BTreeSet<JobId>> {
    let mut seen: BTreeSet<JobId> = BTreeSet::new();
    let mut queue: VecDeque<JobId> = roots.iter().cloned().collect();

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(job) = ::store::get_job(store, id.as_str())? {
            for defined in job.defines {
                if !seen.contains(&defined) {
                    queue.push_back(defined);
                }
            }
        }
    }
    Ok(seen)
}

/// Every transitive static+dynamic ancestor of `id` currently reachable
/// through `parents`/`dynamic_parents` — used by `up_to_date` propagation
/// and by `cleaner::invalidate` to mark transitive parents stale.
pub fn all_ancestors(store: &Store, id: &JobId) -> Result<BTreeSet<JobId>> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(id.clone());

    while let Some(cur) = queue.pop_front() {
        let job = match ::store::get_job(store, cur.as_str())? {
            Some(j) => j,
            None => continue,
        };
        for p in job.parents.iter().chain(job.dynamic_parents.iter()) {
            if seen.insert(p.clone()) {
                queue.push_back(p.clone());
            }
        }
    }
    Ok(seen)
}
