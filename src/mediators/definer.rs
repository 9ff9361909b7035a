//! C4: the definition API. A mediator in `podcore`'s sense — a unit of
//! business logic with a `run(&self, log)` entry point and nothing else
//! world-visible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use slog::Logger;

use errors::*;
use mediators::common;
use model::{ArgTree, Cache, Job, JobId};
use registry;
use store::Store;
use Config;

pub struct Definer<'a> {
    pub store: &'a Store,
    pub config: &'a Config,
    pub job_id: JobId,
    pub callable_ref: String,
    pub args: Vec<ArgTree>,
    pub kwargs: BTreeMap<String, ArgTree>,
    pub defined_by: Vec<JobId>,
    pub needs_context: bool,
    pub is_dynamic: bool,
    /// Whether a differing redefinition of an existing job is a
    /// `UserError` (the session-wide default, `config.check_params`) or
    /// performs the invariant-7 reset. Dynamic reconciliation always
    /// passes `false` here — see `dynamic_expander`.
    pub check_params: bool,
}

impl<'a> Definer<'a> {
    pub fn run(&self, log: &Logger) -> Result<JobId> {
        common::log_timed(&log.new(o!("step" => "define", "job_id" => self.job_id.as_str())), |log| {
            self.run_inner(log)
        })
    }

    fn run_inner(&self, _log: &Logger) -> Result<JobId> {
        registry::validate_name(&self.callable_ref)?;

        if self.kwargs.contains_key("job_id") {
            bail!(ErrorKind::UserError(format!(
                "job {}: 'job_id' is a reserved parameter name",
                self.job_id
            )));
        }

        let mut children = BTreeSet::new();
        for a in &self.args {
            a.collect_children(&mut children);
        }
        for v in self.kwargs.values() {
            v.collect_children(&mut children);
        }

        if children.contains(&self.job_id) || self.would_cycle(&children)? {
            bail!(ErrorKind::UserError(format!(
                "job {} would reference itself transitively through its own arguments",
                self.job_id
            )));
        }

        match ::store::get_job(self.store, self.job_id.as_str())? {
            None => self.create(children),
            Some(existing) => self.redefine(existing, children),
        }
    }

    /// A definition cycle exists if `job_id` is reachable by walking
    /// forward through the *already committed* children of the ids in
    /// `children` (spec.md §9: disallowed at definition time).
    fn would_cycle(&self, children: &BTreeSet<JobId>) -> Result<bool> {
        let mut queue: VecDeque<JobId> = children.iter().cloned().collect();
        let mut seen: BTreeSet<JobId> = BTreeSet::new();

        while let Some(id) = queue.pop_front() {
            if id == self.job_id {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(job) = ::store::get_job(self.store, id.as_str())? {
                for c in job.children {
                    queue.push_back(c);
                }
            }
        }
        Ok(false)
    }

    fn create(&self, children: BTreeSet<JobId>) -> Result<JobId> {
        let job = Job {
            job_id: self.job_id.clone(),
            callable_ref: ::model::CallableRef(self.callable_ref.clone()),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            children: children.clone(),
            dynamic_children: BTreeMap::new(),
            defined_by: self.defined_by.clone(),
            parents: BTreeSet::new(),
            dynamic_parents: BTreeSet::new(),
            defines: BTreeSet::new(),
            needs_context: self.needs_context,
            is_dynamic: self.is_dynamic,
            definition_timestamp: 0,
        };
        ::store::set_job(self.store, &job)?;
        ::store::set_cache(self.store, self.job_id.as_str(), &Cache::not_started())?;

        for child in &children {
            ::graph::add_child_edge(self.store, &self.job_id, child)?;
        }

        Ok(self.job_id.clone())
    }

    fn redefine(&self, existing: Job, children: BTreeSet<JobId>) -> Result<JobId> {
        let candidate = Job {
            job_id: self.job_id.clone(),
            callable_ref: ::model::CallableRef(self.callable_ref.clone()),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            children: children.clone(),
            dynamic_children: existing.dynamic_children.clone(),
            defined_by: existing.defined_by.clone(),
            parents: existing.parents.clone(),
            dynamic_parents: existing.dynamic_parents.clone(),
            defines: existing.defines.clone(),
            needs_context: self.needs_context,
            is_dynamic: self.is_dynamic,
            definition_timestamp: existing.definition_timestamp,
        };

        if existing.same_definition(&candidate) {
            // Invariant 7: identical redefinition is a no-op. Still worth
            // reconciling child edges in case a previous run was
            // interrupted mid-commit, but the common case is genuinely a
            // no-op write.
            ::store::set_job(self.store, &candidate)?;
            return Ok(self.job_id.clone());
        }

        if self.check_params {
            bail!(ErrorKind::UserError(format!(
                "job {} redefined with different (callable_ref, args, kwargs) while check_params is on",
                self.job_id
            )));
        }

        for old_child in existing.children.difference(&children) {
            ::graph::remove_child_edge(self.store, &self.job_id, old_child)?;
        }
        for new_child in children.difference(&existing.children) {
            ::graph::add_child_edge(self.store, &self.job_id, new_child)?;
        }

        let mut job = candidate;
        job.definition_timestamp = existing.definition_timestamp + 1;
        ::store::set_job(self.store, &job)?;
        // Invariant 7: differing definition resets Cache. Every transitive
        // parent becomes stale as a *consequence* of C5 rule 4 recursing
        // into this now-NOT_STARTED job, rather than by eagerly touching
        // ancestor Cache records (see DESIGN.md).
        ::store::set_cache(self.store, self.job_id.as_str(), &Cache::not_started())?;

        Ok(self.job_id.clone())
    }
}
