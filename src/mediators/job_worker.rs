//! C7: the scheduler/executor.
//!
//! Generalises `podcore`'s `job_worker::Mediator` — a dispatcher thread that
//! hands work to a fixed pool of workers over `chan` rendezvous channels —
//! from "poll a Postgres table for queued rows" to "walk a dependency graph
//! in waves, each wave's frontier computed from the up-to-date oracle".
//! Sequential and new-process dispatch reuse the same per-job execution
//! path; only how a wave's jobs get distributed to workers changes.

use std::collections::BTreeSet;
use std::process::Command;

use chan;
use slog::Logger;

use errors::*;
use mediators::common;
use mediators::dynamic_expander;
use mediators::up_to_date::CacheQueryDb;
use model::{ArgTree, Cache, CacheState, Job, JobId, UserObject};
use registry::{self, CallContext};
use store::Store;
use Config;

pub struct Mediator<'a> {
    pub store: &'a Store,
    pub config: &'a Config,
    pub targets: Vec<JobId>,
}

#[derive(Debug)]
pub struct RunResult {
    pub done: Vec<JobId>,
}

impl<'a> Mediator<'a> {
    pub fn run(&self, log: &Logger) -> Result<RunResult> {
        common::log_timed(&log.new(o!("step" => "make")), |log| self.run_inner(log))
    }

    fn run_inner(&self, log: &Logger) -> Result<RunResult> {
        let universe = self.relevant_universe()?;
        let target_set: BTreeSet<JobId> = self.targets.iter().cloned().collect();

        loop {
            self.propagate_blocked(&universe)?;

            let frontier = self.ready_frontier(&universe)?;
            if frontier.is_empty() {
                break;
            }

            let batch = self.prioritize(frontier, &target_set)?;
            info!(log, "Dispatching wave"; "size" => batch.len(), "num_workers" => self.config.num_workers);

            if self.config.new_process {
                self.run_new_process(log, &batch)?;
            } else if self.config.num_workers <= 1 {
                self.run_sequential(log, &batch)?;
            } else {
                self.run_parallel(log, &batch)?;
            }
        }

        self.collect_result(&target_set, &universe)
    }

    /// Every job reachable from the targets by walking static and dynamic
    /// children backwards — the full set of work a `make` of `targets`
    /// might need to touch.
    fn relevant_universe(&self) -> Result<BTreeSet<JobId>> {
        let mut seen = BTreeSet::new();
        let mut queue: Vec<JobId> = self.targets.clone();

        while let Some(id) = queue.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(job) = ::store::get_job(self.store, id.as_str())? {
                for c in &job.children {
                    queue.push(c.clone());
                }
                for set in job.dynamic_children.values() {
                    for c in set {
                        queue.push(c.clone());
                    }
                }
            }
        }
        Ok(seen)
    }

    /// Runs to a fixpoint: any job in `universe` whose state isn't already
    /// terminal, and that has a child in `Failed`/`Blocked`, becomes
    /// `Blocked` itself. Repeated until no job changes, since blocking
    /// cascades upward one level per pass.
    fn propagate_blocked(&self, universe: &BTreeSet<JobId>) -> Result<()> {
        loop {
            let mut changed = false;
            for id in universe {
                let job = match ::store::get_job(self.store, id.as_str())? {
                    Some(j) => j,
                    None => continue,
                };
                let mut cache = match ::store::get_cache(self.store, id.as_str())? {
                    Some(c) => c,
                    None => continue,
                };
                if cache.state == CacheState::Done
                    || cache.state == CacheState::Failed
                    || cache.state == CacheState::Blocked
                {
                    continue;
                }

                let blocked_child = job
                    .children
                    .iter()
                    .chain(job.dynamic_children.values().flat_map(|s| s.iter()))
                    .any(|c| self.is_stuck(c).unwrap_or(false));

                if blocked_child {
                    cache.state = CacheState::Blocked;
                    ::store::set_cache(self.store, id.as_str(), &cache)?;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }

    fn is_stuck(&self, id: &JobId) -> Result<bool> {
        let state = ::store::get_cache(self.store, id.as_str())?.map(|c| c.state);
        Ok(state == Some(CacheState::Failed) || state == Some(CacheState::Blocked))
    }

    /// Every job in `universe` that is stale (per the oracle) and whose
    /// static and dynamic children have all already finished `Done` — i.e.
    /// whose promises can all be materialised right now.
    fn ready_frontier(&self, universe: &BTreeSet<JobId>) -> Result<Vec<JobId>> {
        let oracle = CacheQueryDb::new(self.store);
        let mut frontier = Vec::new();

        for id in universe {
            let job = match ::store::get_job(self.store, id.as_str())? {
                Some(j) => j,
                None => continue,
            };
            let cache = match ::store::get_cache(self.store, id.as_str())? {
                Some(c) => c,
                None => continue,
            };
            if cache.state == CacheState::Failed
                || cache.state == CacheState::Blocked
                || cache.state == CacheState::InProgress
            {
                continue;
            }
            if oracle.up_to_date(id)?.fresh {
                continue;
            }

            let mut children_done = true;
            for c in job.children.iter().chain(job.dynamic_children.values().flat_map(|s| s.iter())) {
                let state = ::store::get_cache(self.store, c.as_str())?.map(|cc| cc.state);
                if state != Some(CacheState::Done) {
                    children_done = false;
                    break;
                }
            }

            if children_done {
                frontier.push(id.clone());
            }
        }
        Ok(frontier)
    }

    /// Orders a wave so that jobs unblocking more of the target set run
    /// first: sorted by descending count of target-set ancestors, with job
    /// id as a deterministic tiebreak (spec.md §4.6). See DESIGN.md for the
    /// documented tension between this literal rule and the worked example
    /// in spec.md §8 scenario 6.
    fn prioritize(&self, frontier: Vec<JobId>, target_set: &BTreeSet<JobId>) -> Result<Vec<JobId>> {
        let mut scored = Vec::with_capacity(frontier.len());
        for id in frontier {
            let ancestors = ::graph::all_ancestors(self.store, &id)?;
            let score = ancestors.intersection(target_set).count();
            scored.push((score, id));
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(scored.into_iter().map(|(_, id)| id).collect())
    }

    fn run_sequential(&self, log: &Logger, batch: &[JobId]) -> Result<()> {
        for id in batch {
            dispatch_job(self.store, self.config, log, id)?;
        }
        Ok(())
    }

    /// Generalises the teacher's `chan::sync`-backed dispatcher/worker
    /// split: a fixed pool of `num_workers` threads drains a work channel
    /// fed with this wave's jobs, each *computing* a job's result without
    /// touching the store, and reporting the computation back over a
    /// result channel. Only this thread — the dispatcher — ever writes
    /// `Cache`/`UserObject` or graph edges (spec.md §5); workers run
    /// read-only (`compute_job` only materialises promises and invokes the
    /// callable). The `InProgress` transition and children-hash snapshot
    /// are also written here, up front, before any job is handed to a
    /// worker, for the same reason.
    fn run_parallel(&self, log: &Logger, batch: &[JobId]) -> Result<()> {
        let mut jobs = Vec::with_capacity(batch.len());
        for id in batch {
            let job = ::store::get_job(self.store, id.as_str())?
                .ok_or_else(|| ErrorKind::DbError(format!("job {} not found", id)))?;
            mark_in_progress(self.store, &job)?;
            jobs.push(job);
        }

        let (work_send, work_recv) = chan::sync(jobs.len());
        let (res_send, res_recv) = chan::sync(jobs.len());

        let num_workers = self.config.num_workers.min(jobs.len() as u32).max(1);
        let store = self.store;

        // Scoped rather than `std::thread::spawn`: workers borrow `store`
        // for this wave only, and `crossbeam_utils::thread` guarantees
        // they're joined before `scope` returns, so the borrow never has
        // to be 'static.
        ::crossbeam_utils::thread::scope(|scope| {
            for n in 0..num_workers {
                let work_recv = work_recv.clone();
                let res_send = res_send.clone();
                let log = log.new(o!("thread" => common::thread_name(n)));
                scope.spawn(move |_| {
                    while let Some(job) = work_recv.recv() {
                        let computation = compute_job(store, &log, &job);
                        res_send.send(computation);
                    }
                });
            }

            for job in jobs {
                work_send.send(job);
            }
            drop(work_send);
        })
        .map_err(|_| ErrorKind::CompmakeBug("a worker thread panicked".to_owned()))?;

        let mut first_err = None;
        for _ in 0..batch.len() {
            let computation = res_recv.recv().expect("worker channel closed early");
            let id = computation.job_id.clone();
            let commit_result = commit_job(self.store, self.config, log, computation);
            if let Err(e) = classify_commit_result(self.store, &id, commit_result) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// New-process dispatch: re-execs the current binary with the hidden
    /// `__run-job <id>` subcommand per job, so a crash in one job's
    /// callable can't take the rest of the run down with it. Jobs in the
    /// wave are run one at a time; `num_workers` still caps how many
    /// child processes are alive together once this gains real concurrency.
    ///
    /// A host that dies without recording an outcome (§7: `HostFailed`) is
    /// re-queued as `NOT_STARTED` and retried once; a second failure is
    /// recorded as `FAILED`.
    fn run_new_process(&self, log: &Logger, batch: &[JobId]) -> Result<()> {
        let exe = ::std::env::current_exe()
            .map_err(|e| ErrorKind::HostFailed(format!("could not resolve current executable: {}", e)))?;

        for id in batch {
            let mut attempt = 0;
            loop {
                attempt += 1;
                info!(log, "Spawning worker process"; "job_id" => id.as_str(), "attempt" => attempt);
                let status = Command::new(&exe)
                    .arg("__run-job")
                    .arg(id.as_str())
                    .status()
                    .map_err(|e| ErrorKind::HostFailed(format!("could not spawn worker for {}: {}", id, e)))?;

                if status.success() {
                    break;
                }

                // The child is responsible for recording its own Cache
                // transition before it exits; a nonzero/missing status with
                // no recorded transition means the process itself died,
                // which the store won't reflect on its own.
                let cache_state = ::store::get_cache(self.store, id.as_str())?.map(|c| c.state);
                if cache_state == Some(CacheState::Failed) {
                    break;
                }

                warn!(log, "Worker process died without recording an outcome";
                    "job_id" => id.as_str(), "attempt" => attempt, "code" => format!("{:?}", status.code()));

                if attempt > 1 {
                    let mut cache = ::store::get_cache(self.store, id.as_str())?.unwrap_or_else(Cache::not_started);
                    cache.state = CacheState::Failed;
                    cache.exception = Some(format!(
                        "host failed: worker process for {} exited with {:?} without recording an outcome",
                        id,
                        status.code()
                    ));
                    ::store::set_cache(self.store, id.as_str(), &cache)?;
                    break;
                }

                let mut cache = ::store::get_cache(self.store, id.as_str())?.unwrap_or_else(Cache::not_started);
                cache.state = CacheState::NotStarted;
                ::store::set_cache(self.store, id.as_str(), &cache)?;
            }
        }
        Ok(())
    }

    /// `done` is scoped to the literal requested targets (what the caller
    /// asked to build), but `failed`/`blocked` are classified over the whole
    /// stale closure `universe` per spec.md §4.6: a target can be blocked by
    /// a dependency that was never itself a target, and that dependency's
    /// id is what belongs in the error, not the target's.
    fn collect_result(&self, target_set: &BTreeSet<JobId>, universe: &BTreeSet<JobId>) -> Result<RunResult> {
        let mut done = Vec::new();
        for id in target_set {
            if ::store::get_cache(self.store, id.as_str())?.map(|c| c.state) == Some(CacheState::Done) {
                done.push(id.clone());
            }
        }

        let mut failed = Vec::new();
        let mut blocked = Vec::new();
        for id in universe {
            match ::store::get_cache(self.store, id.as_str())?.map(|c| c.state) {
                Some(CacheState::Failed) => failed.push(id.clone()),
                Some(CacheState::Blocked) => blocked.push(id.clone()),
                _ => {}
            }
        }

        if failed.is_empty() && blocked.is_empty() {
            Ok(RunResult { done })
        } else {
            Err(ErrorKind::MakeFailed(failed, blocked).into())
        }
    }
}

/// Replaces every `Promise(id)` in an argument tree with the `UserObject`
/// value that job produced, recursing into `Array`/`Set`/`Object` the same
/// way `ArgTree::collect_children` does at definition time.
fn materialize(store: &Store, value: &ArgTree) -> Result<ArgTree> {
    Ok(match *value {
        ArgTree::Promise(ref id) => {
            let obj = ::store::get_user_object(store, id.as_str())?
                .ok_or_else(|| ErrorKind::DbError(format!("no result recorded for {}", id)))?;
            obj.value
        }
        ArgTree::Array(ref items) => {
            ArgTree::Array(items.iter().map(|i| materialize(store, i)).collect::<Result<_>>()?)
        }
        ArgTree::Set(ref items) => {
            ArgTree::Set(items.iter().map(|i| materialize(store, i)).collect::<Result<_>>()?)
        }
        ArgTree::Object(ref map) => {
            let mut out = ::std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), materialize(store, v)?);
            }
            ArgTree::Object(out)
        }
        ref other => other.clone(),
    })
}

/// Runs one job and reports whether the *run* should continue.
///
/// A job raising, timing out, or failing to serialise its result is a
/// normal outcome the scheduler keeps going after — `commit_job`
/// has already recorded `Cache(id).state = FAILED` by the time it returns
/// `Err`, and §4.6's termination rule ("a run ends when R is empty") means
/// that failure is picked up by `collect_result` at the end, not by
/// aborting the dispatch loop early. An error that reaches here *without*
/// a recorded `FAILED` transition means execution never got far enough to
/// even attempt the callable (step 2's "missing dependency" scheduling
/// bug) — that always aborts the run as `CompmakeBug`.
fn classify_commit_result(store: &Store, id: &JobId, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            let recorded_failure =
                ::store::get_cache(store, id.as_str())?.map(|c| c.state) == Some(CacheState::Failed);
            if recorded_failure {
                Ok(())
            } else {
                Err(ErrorKind::CompmakeBug(format!(
                    "job {} aborted before its failure could be recorded: {}",
                    id, e
                )).into())
            }
        }
    }
}

fn dispatch_job(store: &Store, config: &Config, log: &Logger, id: &JobId) -> Result<()> {
    classify_commit_result(store, id, execute_job_inline(store, config, log, id))
}

/// Writes the `InProgress` transition and the children-hash snapshot a
/// job's freshness will be compared against next time (spec.md §4.5,
/// rule 3). Always run on the dispatcher thread, before a job is handed to
/// any worker, since it's a read-modify-write on that job's own `Cache`
/// record.
fn mark_in_progress(store: &Store, job: &Job) -> Result<()> {
    let mut hashes = ::std::collections::BTreeMap::new();
    for child in job.children.iter().chain(job.dynamic_children.values().flat_map(|s| s.iter())) {
        if let Some(cc) = ::store::get_cache(store, child.as_str())? {
            if let Some(ts) = cc.timestamp {
                hashes.insert(child.clone(), ts);
            }
        }
    }

    let mut cache = ::store::get_cache(store, job.job_id.as_str())?.unwrap_or_else(Cache::not_started);
    cache.state = CacheState::InProgress;
    cache.hashes_of_children = hashes;
    ::store::set_cache(store, job.job_id.as_str(), &cache)
}

/// What a worker hands back to the dispatcher after running one job's
/// callable: the callable's own outcome, how long it took, and — for a
/// dynamic job — everything its `Expander` buffered. Carries no store
/// handle and performs no store I/O of its own; only `commit_job` does.
pub struct JobComputation {
    job_id: JobId,
    outcome: Result<ArgTree>,
    elapsed: u64,
    dynamic: Option<dynamic_expander::DynamicExpansion>,
}

/// Worker-side half of a job's execution: resolves the callable, reads
/// promises out of the store (read-only — safe from any number of
/// concurrent workers), and runs it. Never writes to `store`.
fn compute_job(store: &Store, log: &Logger, job: &Job) -> JobComputation {
    let log = log.new(o!("job_id" => job.job_id.to_string(), "callable" => job.callable_ref.0.clone()));

    let materialized = registry::validate_name(&job.callable_ref.0)
        .and_then(|_| registry::resolve(&job.callable_ref.0))
        .and_then(|callable| {
            let args = job
                .args
                .iter()
                .map(|a| materialize(store, a))
                .collect::<Result<Vec<_>>>()?;
            let kwargs = job
                .kwargs
                .iter()
                .map(|(k, v)| Ok((k.clone(), materialize(store, v)?)))
                .collect::<Result<::std::collections::HashMap<_, _>>>()?;
            Ok((callable, args, kwargs))
        });

    match materialized {
        Err(e) => JobComputation {
            job_id: job.job_id.clone(),
            outcome: Err(e),
            elapsed: 0,
            dynamic: None,
        },
        Ok((callable, args, kwargs)) => {
            if job.is_dynamic {
                let ((outcome, expansion), elapsed) = ::time_helpers::log_timed_elapsed(&log, |_log| {
                    dynamic_expander::compute_dynamic_job(job, callable, args, kwargs)
                });
                JobComputation {
                    job_id: job.job_id.clone(),
                    outcome,
                    elapsed,
                    dynamic: Some(expansion),
                }
            } else {
                let (outcome, elapsed) = ::time_helpers::log_timed_elapsed(&log, |_log| {
                    callable(CallContext {
                        job_id: job.job_id.clone(),
                        args,
                        kwargs,
                        expander: None,
                    })
                });
                JobComputation {
                    job_id: job.job_id.clone(),
                    outcome,
                    elapsed,
                    dynamic: None,
                }
            }
        }
    }
}

/// Dispatcher-side half of a job's execution: commits a dynamic job's
/// buffered registrations (if any), then records the final `Cache`/
/// `UserObject` state, implementing the rest of spec.md §4.6's seven-step
/// execution contract. The only function in this module that writes to
/// the store on a job's behalf once it's left `mark_in_progress`.
fn commit_job(store: &Store, config: &Config, log: &Logger, computation: JobComputation) -> Result<()> {
    let JobComputation { job_id, outcome, elapsed, dynamic } = computation;

    let mut cache = ::store::get_cache(store, job_id.as_str())?.unwrap_or_else(Cache::not_started);
    // No OS-level CPU-time accounting in this stack (see DESIGN.md); a
    // single job runs to completion on its own thread without being
    // preempted by other jobforge work, so wall time is used as the
    // cputime approximation.
    cache.cputime_ns = Some(elapsed);

    let outcome = match dynamic {
        Some(expansion) => dynamic_expander::commit_dynamic_job(store, config, log, &job_id, outcome, expansion),
        None => outcome,
    };

    match outcome {
        Ok(value) => {
            match ::store::set_user_object(
                store,
                &UserObject {
                    job_id: job_id.clone(),
                    value,
                    created_at: ::chrono::Utc::now(),
                },
            ) {
                Ok(()) => {
                    cache.state = CacheState::Done;
                    cache.timestamp = Some(::time::precise_time_ns() as i64);
                    cache.walltime_ns = Some(elapsed);
                    cache.exception = None;
                    cache.backtrace = None;
                    ::store::set_cache(store, job_id.as_str(), &cache)?;
                    Ok(())
                }
                Err(_) => {
                    // Step 5 of the execution contract: a return value that
                    // can't be serialised is its own failure kind, distinct
                    // from a callable that raised.
                    let e: Error = ErrorKind::JobFailedUnpickleable(job_id.clone()).into();
                    warn!(log, "Job result could not be serialised"; "job_id" => job_id.as_str());
                    cache.state = CacheState::Failed;
                    cache.walltime_ns = Some(elapsed);
                    cache.exception = Some(e.to_string());
                    cache.backtrace = None;
                    ::store::set_cache(store, job_id.as_str(), &cache)?;
                    Err(e)
                }
            }
        }
        Err(e) => {
            warn!(log, "Job failed"; "error" => e.to_string());
            cache.state = CacheState::Failed;
            cache.walltime_ns = Some(elapsed);
            cache.exception = Some(e.to_string());
            cache.backtrace = Some(format!("{:?}", e));
            ::store::set_cache(store, job_id.as_str(), &cache)?;
            Err(e)
        }
    }
}

/// Runs one job's callable to completion, implementing spec.md §4.6's
/// seven-step execution contract in one synchronous call: `mark_in_progress`
/// then `compute_job` then `commit_job`, with no other thread involved.
/// Used by `run_sequential` and by the new-process binary's `__run-job`
/// subcommand, neither of which shares a store across concurrent threads;
/// `run_parallel` calls the three steps separately instead so that only
/// its dispatcher thread ever touches the store.
pub fn execute_job_inline(store: &Store, config: &Config, log: &Logger, job_id: &JobId) -> Result<()> {
    let job = ::store::get_job(store, job_id.as_str())?
        .ok_or_else(|| ErrorKind::DbError(format!("job {} not found", job_id)))?;

    mark_in_progress(store, &job)?;
    let computation = compute_job(store, log, &job);
    commit_job(store, config, log, computation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediators::definer::Definer;
    use std::collections::BTreeMap;
    use store::SledStore;
    use tempfile::TempDir;

    fn store() -> (TempDir, SledStore) {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn no_op(_ctx: CallContext) -> Result<ArgTree> {
        Ok(ArgTree::string("done"))
    }

    fn always_fails(_ctx: CallContext) -> Result<ArgTree> {
        bail!(ErrorKind::JobFailed(JobId::new("whatever"), "boom".to_owned()))
    }

    fn define(store: &Store, config: &Config, id: &str, callable: &str, args: Vec<ArgTree>) {
        let f = if callable.ends_with("fails") { always_fails } else { no_op };
        registry::register(callable, f).ok();
        Definer {
            store,
            config,
            job_id: JobId::new(id),
            callable_ref: callable.to_owned(),
            args,
            kwargs: BTreeMap::new(),
            defined_by: vec![JobId::new("root")],
            needs_context: false,
            is_dynamic: false,
            check_params: true,
        }.run(&::slog::Logger::root(::slog::Discard, o!()))
        .unwrap();
    }

    #[test]
    fn test_execute_job_inline_success() {
        let (_dir, store) = store();
        let config = Config::default();
        define(&store, &config, "a", "jobforge::mediators::job_worker::tests::no_op", vec![]);

        execute_job_inline(&store, &config, &::slog::Logger::root(::slog::Discard, o!()), &JobId::new("a")).unwrap();

        let cache = ::store::get_cache(&store, "a").unwrap().unwrap();
        assert_eq!(cache.state, CacheState::Done);
        assert!(::store::get_user_object(&store, "a").unwrap().is_some());
    }

    #[test]
    fn test_execute_job_inline_failure_records_cache() {
        let (_dir, store) = store();
        let config = Config::default();
        define(&store, &config, "a", "jobforge::mediators::job_worker::tests::always_fails", vec![]);

        let result = execute_job_inline(
            &store,
            &config,
            &::slog::Logger::root(::slog::Discard, o!()),
            &JobId::new("a"),
        );
        assert!(result.is_err());

        let cache = ::store::get_cache(&store, "a").unwrap().unwrap();
        assert_eq!(cache.state, CacheState::Failed);
        assert!(cache.exception.is_some());
    }

    #[test]
    fn test_run_blocks_on_failed_child() {
        let (_dir, store) = store();
        let config = Config::default();
        define(&store, &config, "child", "jobforge::mediators::job_worker::tests::always_fails", vec![]);
        define(
            &store,
            &config,
            "parent",
            "jobforge::mediators::job_worker::tests::no_op",
            vec![ArgTree::Promise(JobId::new("child"))],
        );

        let mediator = Mediator {
            store: &store,
            config: &config,
            targets: vec![JobId::new("parent")],
        };
        match mediator.run(&::slog::Logger::root(::slog::Discard, o!())) {
            Err(Error(ErrorKind::MakeFailed(failed, blocked), _)) => {
                assert_eq!(failed, vec![JobId::new("child")]);
                assert!(blocked.is_empty() || blocked == vec![JobId::new("parent")]);
            }
            other => panic!("expected MakeFailed, got {:?}", other),
        }

        let parent_cache = ::store::get_cache(&store, "parent").unwrap().unwrap();
        assert_eq!(parent_cache.state, CacheState::Blocked);
    }

    #[test]
    fn test_run_completes_linear_chain() {
        let (_dir, store) = store();
        let config = Config::default();
        define(&store, &config, "a", "jobforge::mediators::job_worker::tests::no_op", vec![]);
        define(
            &store,
            &config,
            "b",
            "jobforge::mediators::job_worker::tests::no_op",
            vec![ArgTree::Promise(JobId::new("a"))],
        );

        let mediator = Mediator {
            store: &store,
            config: &config,
            targets: vec![JobId::new("b")],
        };
        let result = mediator.run(&::slog::Logger::root(::slog::Discard, o!())).unwrap();
        assert_eq!(result.done, vec![JobId::new("b")]);

        assert_eq!(
            ::store::get_cache(&store, "a").unwrap().unwrap().state,
            CacheState::Done
        );
        assert_eq!(
            ::store::get_cache(&store, "b").unwrap().unwrap().state,
            CacheState::Done
        );
    }
}
