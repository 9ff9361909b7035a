//! The public entry point a command surface (§6) or embedding program
//! drives. spec.md §9's Design Notes ask for "Globals (status flag,
//! current context, progress callback)" to "become an explicit `Session`
//! value threaded through public operations" — this is that value: it
//! owns the one open `Store` for a run of the program, the `Config` it was
//! started with, and the root `Logger`, and every other public operation
//! (`define`, `make`, `clean`, …) is a method on it rather than a free
//! function reaching for ambient state.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use slog::Logger;

use consistency;
use errors::*;
use mediators::cleaner::Cleaner;
use mediators::definer::Definer;
use mediators::job_worker::{Mediator, RunResult};
use mediators::up_to_date::{CacheQueryDb, Freshness};
use model::{ArgTree, Cache, Job, JobId};
use selection::{self, JobUniverse};
use store::{SledStore, Store};
use Config;

pub struct Session {
    pub store: SledStore,
    pub config: Config,
    pub log: Logger,
    /// Top-level job ids registered so far this session, fed to
    /// `clean_other_jobs` once the caller's definitions are all in.
    registered: BTreeSet<JobId>,
}

/// Everything the `details` command (§6) shows for one job.
#[derive(Debug)]
pub struct JobDetails {
    pub job: Job,
    pub cache: Cache,
    pub freshness: Freshness,
}

impl Session {
    pub fn open<P: AsRef<Path>>(path: P, config: Config, log: Logger) -> Result<Session> {
        let store = SledStore::open(path)?;
        Ok(Session {
            store,
            config,
            log,
            registered: BTreeSet::new(),
        })
    }

    /// C4: registers (or redefines) a top-level job. `needs_context`/
    /// `is_dynamic` are always equal for a job defined this way — a
    /// top-level dynamic job is the same thing as `comp_dynamic` called
    /// from outside any running job, `defined_by = ['root']`.
    pub fn define(
        &mut self,
        job_id: &str,
        callable_ref: &str,
        args: Vec<ArgTree>,
        kwargs: ::std::collections::BTreeMap<String, ArgTree>,
        is_dynamic: bool,
    ) -> Result<JobId> {
        let id = Definer {
            store: &self.store,
            config: &self.config,
            job_id: JobId::new(job_id),
            callable_ref: callable_ref.to_owned(),
            args,
            kwargs,
            defined_by: vec![JobId::new("root")],
            needs_context: is_dynamic,
            is_dynamic,
            check_params: self.config.check_params,
        }.run(&self.log)?;

        self.registered.insert(id.clone());
        self.maybe_check_invariants()?;
        Ok(id)
    }

    /// Sweeps any job that was top-level in a previous session but hasn't
    /// been re-registered via `define` in this one (§4.8). Call once after
    /// the caller's own top-level `define` calls have all run.
    pub fn clean_other_jobs(&mut self) -> Result<()> {
        Cleaner { store: &self.store }.clean_other_jobs(&self.log, &self.registered)?;
        self.maybe_check_invariants()?;
        Ok(())
    }

    /// Resolves a job-set expression (§4.5) against the jobs currently in
    /// the store.
    pub fn select(&self, expr: &str) -> Result<Vec<JobId>> {
        let universe = JobUniverse::new(&self.store);
        selection::parse_job_list(expr, &universe)
    }

    /// `make`: builds every target in `expr`'s resolved set.
    pub fn make(&self, expr: &str) -> Result<RunResult> {
        let targets = self.select(expr)?;
        if targets.is_empty() {
            return Ok(RunResult { done: Vec::new() });
        }
        Mediator {
            store: &self.store,
            config: &self.config,
            targets,
        }.run(&self.log)
    }

    pub fn clean(&mut self, expr: &str) -> Result<()> {
        let targets = self.select(expr)?;
        Cleaner { store: &self.store }.clean(&self.log, &targets)?;
        self.maybe_check_invariants()?;
        Ok(())
    }

    pub fn invalidate(&mut self, expr: &str) -> Result<()> {
        let targets = self.select(expr)?;
        Cleaner { store: &self.store }.invalidate(&self.log, &targets)?;
        self.maybe_check_invariants()?;
        Ok(())
    }

    /// `ls`: every selected job paired with its current cache state.
    pub fn ls(&self, expr: &str) -> Result<Vec<(JobId, ::model::CacheState)>> {
        let ids = self.select(expr)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let state = ::store::get_cache(&self.store, id.as_str())?
                .map(|c| c.state)
                .ok_or_else(|| ErrorKind::DbError(format!("no cache for {}", id)))?;
            out.push((id, state));
        }
        Ok(out)
    }

    /// `details`: the full record plus a freshness verdict for each
    /// selected job.
    pub fn details(&self, expr: &str) -> Result<Vec<JobDetails>> {
        let ids = self.select(expr)?;
        let oracle = CacheQueryDb::new(&self.store);
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            let job = ::store::get_job(&self.store, id.as_str())?
                .ok_or_else(|| ErrorKind::DbError(format!("job {} not found", id)))?;
            let cache = ::store::get_cache(&self.store, id.as_str())?
                .ok_or_else(|| ErrorKind::DbError(format!("cache for {} not found", id)))?;
            let freshness = oracle.up_to_date(id)?;
            out.push(JobDetails { job, cache, freshness });
        }
        Ok(out)
    }

    /// `dump directory=<path>`: writes one pretty-printed JSON file per
    /// selected job (`job`, `cache`, and — if present — `user_object`)
    /// into `directory`, mirroring the original's `StorageFilesystem`'s
    /// readable on-disk layout.
    pub fn dump(&self, directory: &Path, expr: &str) -> Result<()> {
        fs::create_dir_all(directory)?;
        for id in self.select(expr)? {
            let job = ::store::get_job(&self.store, id.as_str())?;
            let cache = ::store::get_cache(&self.store, id.as_str())?;
            let user_object = ::store::get_user_object(&self.store, id.as_str())?;

            #[derive(Serialize)]
            struct Dump {
                job: Option<Job>,
                cache: Option<Cache>,
                user_object: Option<::model::UserObject>,
            }

            let path = directory.join(format!("{}.json", id));
            let bytes = ::serde_json::to_vec_pretty(&Dump { job, cache, user_object })?;
            fs::write(path, bytes)?;
        }
        Ok(())
    }

    /// `check_consistency raise_if_error=0|1`.
    pub fn check_consistency(&self, raise_if_error: bool) -> Result<Vec<String>> {
        if raise_if_error {
            consistency::check_or_bail(&self.store)
        } else {
            consistency::check(&self.store)
        }
    }

    fn maybe_check_invariants(&self) -> Result<()> {
        if self.config.debug_check_invariants {
            consistency::check_or_bail(&self.store)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::ArgTree;
    use registry;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn no_op(_ctx: ::registry::CallContext) -> Result<ArgTree> {
        Ok(ArgTree::string("ok"))
    }

    fn session() -> (TempDir, Session) {
        let dir = TempDir::new().unwrap();
        registry::register("jobforge::session::tests::no_op", no_op).ok();
        let session = Session::open(
            dir.path(),
            Config::default(),
            ::slog::Logger::root(::slog::Discard, o!()),
        ).unwrap();
        (dir, session)
    }

    #[test]
    fn test_define_then_make() {
        let (_dir, mut session) = session();
        session.define("a", "jobforge::session::tests::no_op", vec![], BTreeMap::new(), false).unwrap();

        let result = session.make("a").unwrap();
        assert_eq!(result.done, vec![JobId::new("a")]);
    }

    #[test]
    fn test_clean_other_jobs_sweeps_unregistered_root() {
        let (_dir, mut session) = session();
        session.define("a", "jobforge::session::tests::no_op", vec![], BTreeMap::new(), false).unwrap();
        session.registered.clear();
        session.define("b", "jobforge::session::tests::no_op", vec![], BTreeMap::new(), false).unwrap();
        session.clean_other_jobs().unwrap();

        assert!(::store::get_job(&session.store, "a").unwrap().is_none());
        assert!(::store::get_job(&session.store, "b").unwrap().is_some());
    }

    #[test]
    fn test_ls_reports_state() {
        let (_dir, mut session) = session();
        session.define("a", "jobforge::session::tests::no_op", vec![], BTreeMap::new(), false).unwrap();

        let rows = session.ls("all").unwrap();
        assert_eq!(rows, vec![(JobId::new("a"), ::model::CacheState::NotStarted)]);
    }

    #[test]
    fn test_dump_writes_json_per_job() {
        let (_dir, mut session) = session();
        session.define("a", "jobforge::session::tests::no_op", vec![], BTreeMap::new(), false).unwrap();
        session.make("a").unwrap();

        let out_dir = TempDir::new().unwrap();
        session.dump(out_dir.path(), "all").unwrap();

        let contents = ::std::fs::read_to_string(out_dir.path().join("a.json")).unwrap();
        assert!(contents.contains("\"job\""));
        assert!(contents.contains("\"user_object\""));
    }
}
