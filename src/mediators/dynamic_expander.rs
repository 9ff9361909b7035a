//! C8: dynamic expansion.
//!
//! `DynamicContext` is what a dynamic job's callable receives as its
//! `Expander`: `comp`/`comp_dynamic` mint a child id under the parent's id
//! namespace and buffer a `Registration` for it rather than writing
//! anything, since a dynamic callable's own invocation runs on a worker
//! thread (see `mediators::job_worker`) and only the dispatcher thread is
//! allowed to touch the store (spec.md §5). `compute_dynamic_job` runs the
//! callable and hands back its outcome plus everything it registered;
//! `commit_dynamic_job` is the dispatcher-side half that actually writes
//! those registrations through `Definer` and performs the `Old`/`New`
//! reconciliation spec.md §4.7 describes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use slog::Logger;

use errors::*;
use mediators::definer::Definer;
use model::{ArgTree, Job, JobId};
use registry::{self, CallContext, CallableFn, Expander};
use store::Store;
use Config;

/// One `comp`/`comp_dynamic` call, buffered until the dispatcher commits it.
#[derive(Clone)]
pub struct Registration {
    pub job_id: JobId,
    pub callable_ref: String,
    pub args: Vec<ArgTree>,
    pub kwargs: BTreeMap<String, ArgTree>,
    pub defined_by: Vec<JobId>,
    pub needs_context: bool,
    pub is_dynamic: bool,
}

/// Everything a dynamic callable's invocation produced, handed back from
/// worker to dispatcher alongside the callable's own `Result<ArgTree>`.
pub struct DynamicExpansion {
    old: BTreeSet<JobId>,
    new_ids: BTreeSet<JobId>,
    registrations: Vec<Registration>,
}

pub struct DynamicContext {
    parent_id: JobId,
    parent_defined_by: Vec<JobId>,
    id_namespace: HashMap<String, u32>,
    /// Every id registered so far during this invocation — becomes `New`
    /// on success, or is discarded unwritten on failure.
    new_ids: BTreeSet<JobId>,
    registrations: Vec<Registration>,
}

fn slug_of(callable_ref: &str) -> String {
    let last = callable_ref.rsplit("::").next().unwrap_or(callable_ref);
    last.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

impl DynamicContext {
    fn next_id(&mut self, callable_ref: &str) -> JobId {
        let slug = slug_of(callable_ref);
        let count = self.id_namespace.entry(slug.clone()).or_insert(0);
        let id = if *count == 0 {
            format!("{}-{}", self.parent_id, slug)
        } else {
            format!("{}-{}-{}", self.parent_id, slug, *count - 1)
        };
        *count += 1;
        JobId::new(id)
    }

    fn register(
        &mut self,
        callable_ref: &str,
        args: Vec<ArgTree>,
        kwargs: HashMap<String, ArgTree>,
        needs_context: bool,
        is_dynamic: bool,
    ) -> Result<JobId> {
        let job_id = self.next_id(callable_ref);
        let kwargs: BTreeMap<String, ArgTree> = kwargs.into_iter().collect();
        let mut defined_by = self.parent_defined_by.clone();
        defined_by.push(self.parent_id.clone());

        self.registrations.push(Registration {
            job_id: job_id.clone(),
            callable_ref: callable_ref.to_owned(),
            args,
            kwargs,
            defined_by,
            needs_context,
            is_dynamic,
        });
        self.new_ids.insert(job_id.clone());
        Ok(job_id)
    }
}

impl Expander for DynamicContext {
    fn comp(
        &mut self,
        callable_ref: &str,
        args: Vec<ArgTree>,
        kwargs: HashMap<String, ArgTree>,
    ) -> Result<JobId> {
        self.register(callable_ref, args, kwargs, false, false)
    }

    fn comp_dynamic(
        &mut self,
        callable_ref: &str,
        args: Vec<ArgTree>,
        kwargs: HashMap<String, ArgTree>,
    ) -> Result<JobId> {
        self.register(callable_ref, args, kwargs, true, true)
    }
}

/// Deletes a job and everything in its definition closure: the inverse of
/// `Definer`'s commit, used both for discarding a failed dynamic run's
/// partial children and for `cleaner::clean`'s orphan sweep.
pub fn discard_subtree(store: &Store, parent: &JobId, id: &JobId) -> Result<()> {
    let mut roots = BTreeSet::new();
    roots.insert(id.clone());
    let closure = ::graph::definition_closure(store, &roots)?;

    for victim in &closure {
        if let Some(job) = ::store::get_job(store, victim.as_str())? {
            for child in &job.children {
                let _ = ::graph::remove_child_edge(store, victim, child);
            }
        }
        ::store::delete_cache(store, victim.as_str())?;
        ::store::delete_user_object(store, victim.as_str())?;
        ::store::delete_progress(store, victim.as_str())?;
        ::store::delete_job(store, victim.as_str())?;
    }
    ::graph::remove_defines_edge(store, parent, id)?;
    ::graph::remove_dynamic_child_edge(store, parent, id)?;
    Ok(())
}

/// Runs one invocation of a dynamic job's callable. Pure with respect to
/// the store — reads nothing and writes nothing — so it's safe to call
/// from a worker thread: `args`/`kwargs` have already been materialised by
/// the caller, and whatever the callable registers through its `Expander`
/// is only buffered in the returned `DynamicExpansion`, not written.
pub fn compute_dynamic_job(
    parent: &Job,
    callable: CallableFn,
    args: Vec<ArgTree>,
    kwargs: HashMap<String, ArgTree>,
) -> (Result<ArgTree>, DynamicExpansion) {
    let old: BTreeSet<JobId> = parent
        .dynamic_children
        .get(&parent.job_id)
        .cloned()
        .unwrap_or_default();

    let mut ctx = DynamicContext {
        parent_id: parent.job_id.clone(),
        parent_defined_by: parent.defined_by.clone(),
        id_namespace: HashMap::new(),
        new_ids: BTreeSet::new(),
        registrations: Vec::new(),
    };

    let outcome = callable(CallContext {
        job_id: parent.job_id.clone(),
        args,
        kwargs,
        expander: Some(&mut ctx),
    });

    let expansion = DynamicExpansion {
        old,
        new_ids: ctx.new_ids,
        registrations: ctx.registrations,
    };
    (outcome, expansion)
}

/// Dispatcher-side half of a dynamic job's execution: commits whatever
/// `compute_dynamic_job` buffered through `Definer`, then performs the
/// `Old`/`New` reconciliation from spec.md §4.7 on success. On failure,
/// nothing was ever written, so discarding the attempt is simply not
/// committing it — `old` is left untouched either way.
pub fn commit_dynamic_job(
    store: &Store,
    config: &Config,
    log: &Logger,
    parent_id: &JobId,
    outcome: Result<ArgTree>,
    expansion: DynamicExpansion,
) -> Result<ArgTree> {
    match outcome {
        Err(e) => {
            info!(log, "Dynamic job failed, discarding unregistered children";
                "job_id" => parent_id.as_str(), "num_partial" => expansion.registrations.len());
            Err(e)
        }
        Ok(value) => {
            for reg in &expansion.registrations {
                Definer {
                    store,
                    config,
                    job_id: reg.job_id.clone(),
                    callable_ref: reg.callable_ref.clone(),
                    args: reg.args.clone(),
                    kwargs: reg.kwargs.clone(),
                    defined_by: reg.defined_by.clone(),
                    needs_context: reg.needs_context,
                    is_dynamic: reg.is_dynamic,
                    // Reconciliation explicitly allows a sibling to be
                    // redefined with different parameters across runs
                    // (spec.md §4.7); the session-wide `check_params` guard
                    // only applies to top-level re-registration, not to a
                    // dynamic parent's own children.
                    check_params: false,
                }.run(log)?;
                ::graph::add_defines_edge(store, parent_id, &reg.job_id)?;
            }

            let orphans: Vec<JobId> = expansion.old.difference(&expansion.new_ids).cloned().collect();
            for orphan in &orphans {
                discard_subtree(store, parent_id, orphan)?;
            }

            for id in expansion.new_ids.difference(&expansion.old) {
                ::graph::add_dynamic_child_edge(store, parent_id, id)?;
            }
            for id in &orphans {
                ::graph::remove_dynamic_child_edge(store, parent_id, id)?;
            }

            Ok(value)
        }
    }
}
